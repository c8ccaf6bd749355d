use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Per-user cooldown gate enforcing a minimum spacing between accepted
/// generation submissions.
///
/// A mark is set when a submission is accepted and expires on its own after
/// a short fixed duration. The check happens at submission time, before the
/// job is queued, and never blocks.
pub struct CooldownGate {
    /// Expiry instants of the active cooldown marks, keyed by user id
    marks: Mutex<HashMap<i64, Instant>>,
    /// How long each mark lives
    ttl: Duration,
}

impl CooldownGate {
    /// Creates a gate with the given spacing between accepted submissions.
    pub fn new(ttl: Duration) -> Self {
        Self {
            marks: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Checks the user's cooldown and, if clear, sets a fresh mark.
    ///
    /// Returns `true` when the submission may proceed (a new mark was set),
    /// `false` when a mark is still active and the submission must be
    /// rejected with no side effects.
    pub async fn try_acquire(&self, user_id: i64) -> bool {
        let mut marks = self.marks.lock().await;
        let now = Instant::now();
        if let Some(&expires) = marks.get(&user_id) {
            if now < expires {
                return false;
            }
        }
        marks.insert(user_id, now + self.ttl);
        true
    }

    /// Returns the remaining cooldown for the user, or `None` if clear.
    ///
    /// Used to tell the user how long to wait in the "too fast" message.
    pub async fn remaining(&self, user_id: i64) -> Option<Duration> {
        let marks = self.marks.lock().await;
        if let Some(&expires) = marks.get(&user_id) {
            let now = Instant::now();
            if now < expires {
                return Some(expires - now);
            }
        }
        None
    }

    /// Removes the user's cooldown mark.
    ///
    /// Used for administrative resets and to undo the mark set by
    /// `try_acquire` when a later admission check (queue full) rejects the
    /// same submission.
    pub async fn release(&self, user_id: i64) {
        let mut marks = self.marks.lock().await;
        marks.remove(&user_id);
    }

    /// Drops all expired marks. Called periodically by the cleanup task.
    pub async fn cleanup(&self) -> usize {
        let mut marks = self.marks.lock().await;
        let now = Instant::now();
        let before = marks.len();
        marks.retain(|_, expires| now < *expires);
        before - marks.len()
    }

    /// Starts a background task that periodically removes expired marks so
    /// the map does not grow with one dead entry per user ever seen.
    pub fn spawn_cleanup_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.cleanup().await;
                if removed > 0 {
                    log::debug!("Cleaned up {} expired cooldown marks", removed);
                }
            }
        })
    }
}
