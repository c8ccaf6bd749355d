use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

use crate::core::error::AdmissionError;
use crate::core::metrics;
use crate::generation::job::GenerationJob;

/// An entry handed to a worker: either a job or the shutdown sentinel.
#[derive(Debug)]
pub enum QueueEntry {
    Job(GenerationJob),
    /// Tells one worker to exit its loop
    Stop,
}

/// Bounded FIFO queue decoupling fast submission from slow execution.
///
/// `submit` rejects synchronously when the queue is at capacity — a hard
/// admission-control boundary with no side effects. Workers suspend on
/// `dequeue` when the queue is empty.
pub struct JobQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    notify: Notify,
    capacity: usize,
}

impl JobQueue {
    /// Creates an empty queue holding at most `capacity` jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueues a job, returning its 1-based position.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::QueueFull` immediately when the queue holds
    /// `capacity` jobs. The caller surfaces this to the requester; nothing
    /// has been debited or recorded at this point.
    pub async fn submit(&self, job: GenerationJob) -> Result<usize, AdmissionError> {
        let mut entries = self.entries.lock().await;
        let queued = entries.iter().filter(|e| matches!(e, QueueEntry::Job(_))).count();
        if queued >= self.capacity {
            log::warn!("Queue is full ({} jobs), rejecting job {}", queued, job.id);
            return Err(AdmissionError::QueueFull);
        }

        log::info!(
            "Queued job {} (kind: {}, user: {}, cost: {})",
            job.id,
            job.kind.as_str(),
            job.target_user,
            job.cost
        );
        entries.push_back(QueueEntry::Job(job));
        let position = queued + 1;
        metrics::update_queue_depth(position);
        drop(entries);

        self.notify.notify_one();
        Ok(position)
    }

    /// Removes and returns the next entry, suspending while the queue is
    /// empty. This is the worker loop's only idle suspension point.
    pub async fn dequeue(&self) -> QueueEntry {
        loop {
            // Register for notification before checking, so a submit racing
            // with this check cannot be missed.
            let notified = self.notify.notified();
            {
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.pop_front() {
                    let depth = entries.iter().filter(|e| matches!(e, QueueEntry::Job(_))).count();
                    metrics::update_queue_depth(depth);
                    return entry;
                }
            }
            notified.await;
        }
    }

    /// Pushes one shutdown sentinel; each sentinel stops exactly one worker.
    pub async fn push_stop(&self) {
        let mut entries = self.entries.lock().await;
        entries.push_back(QueueEntry::Stop);
        drop(entries);
        self.notify.notify_one();
    }

    /// Returns the 1-based queue position of the given user's first
    /// pending job, or `None` if the user has nothing queued.
    pub async fn position_for_user(&self, user_id: i64) -> Option<usize> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter_map(|e| match e {
                QueueEntry::Job(job) => Some(job),
                QueueEntry::Stop => None,
            })
            .position(|job| job.target_user == user_id)
            .map(|pos| pos + 1)
    }

    /// Current number of queued jobs (sentinels excluded).
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.iter().filter(|e| matches!(e, QueueEntry::Job(_))).count()
    }

    /// Whether the queue currently holds no jobs.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::job::{AspectRatio, JobKind};

    fn job_for(user: i64) -> GenerationJob {
        GenerationJob::build(user, user, JobKind::ReferenceImage, "prompt".into(), AspectRatio::Square, 1, false)
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_dequeue_fifo() {
        let queue = JobQueue::new(10);
        assert_eq!(queue.submit(job_for(1)).await.unwrap(), 1);
        assert_eq!(queue.submit(job_for(2)).await.unwrap(), 2);

        match queue.dequeue().await {
            QueueEntry::Job(job) => assert_eq!(job.target_user, 1),
            QueueEntry::Stop => panic!("expected job"),
        }
        match queue.dequeue().await {
            QueueEntry::Job(job) => assert_eq!(job.target_user, 2),
            QueueEntry::Stop => panic!("expected job"),
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_synchronously() {
        let queue = JobQueue::new(2);
        queue.submit(job_for(1)).await.unwrap();
        queue.submit(job_for(2)).await.unwrap();

        let err = queue.submit(job_for(3)).await.unwrap_err();
        assert_eq!(err, AdmissionError::QueueFull);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_dequeue_suspends_until_submit() {
        let queue = std::sync::Arc::new(JobQueue::new(10));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.submit(job_for(7)).await.unwrap();
        match waiter.await.unwrap() {
            QueueEntry::Job(job) => assert_eq!(job.target_user, 7),
            QueueEntry::Stop => panic!("expected job"),
        }
    }

    #[tokio::test]
    async fn test_stop_sentinel_passes_through() {
        let queue = JobQueue::new(1);
        // A sentinel does not consume job capacity
        queue.push_stop().await;
        queue.submit(job_for(1)).await.unwrap();

        assert!(matches!(queue.dequeue().await, QueueEntry::Stop));
        assert!(matches!(queue.dequeue().await, QueueEntry::Job(_)));
    }

    #[tokio::test]
    async fn test_position_for_user() {
        let queue = JobQueue::new(10);
        queue.submit(job_for(100)).await.unwrap();
        queue.submit(job_for(200)).await.unwrap();

        assert_eq!(queue.position_for_user(100).await, Some(1));
        assert_eq!(queue.position_for_user(200).await, Some(2));
        assert_eq!(queue.position_for_user(999).await, None);
    }
}
