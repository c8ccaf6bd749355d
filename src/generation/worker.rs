use async_trait::async_trait;
use std::sync::Arc;

use crate::core::error::AppResult;
use crate::core::metrics;
use crate::generation::error::JobError;
use crate::generation::fetch::{Artifact, ResultFetcher};
use crate::generation::inference::{InferenceClient, InferenceRequest};
use crate::generation::job::GenerationJob;
use crate::generation::limits::{ConcurrencyLimiter, PerUserSerializer};
use crate::generation::queue::{JobQueue, QueueEntry};
use crate::storage::ledger::{GenerationAudit, GenerationLedger, ResourceKind};
use crate::storage::model_cache::{ActiveModelDescriptor, ModelCache};

/// Why a job failed, phrased for the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureNotice {
    /// Avatar job without a ready trained model; user must train first
    NoActiveModel,
    /// The debit found too few units at execution time
    InsufficientBalance,
    /// Provider or fetch failure; cost has been refunded
    GenerationFailed,
}

/// Delivery of results and failure notices. Fire-and-continue: a delivery
/// failure is logged and never rolls the job back.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hands the finished artifacts to the recipient.
    async fn deliver_artifacts(&self, recipient: i64, job: &GenerationJob, artifacts: &[Artifact]) -> AppResult<()>;

    /// Tells the recipient the job failed, once.
    async fn deliver_failure(&self, recipient: i64, job: &GenerationJob, notice: FailureNotice) -> AppResult<()>;
}

/// Everything a worker needs to execute jobs. Shared across the pool.
pub struct WorkerContext {
    pub ledger: Arc<dyn GenerationLedger>,
    pub audit: Arc<dyn GenerationAudit>,
    pub model_cache: Arc<ModelCache>,
    pub inference: Arc<InferenceClient>,
    pub fetcher: Arc<ResultFetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub limits: Arc<ConcurrencyLimiter>,
    pub serializer: Arc<PerUserSerializer>,
}

/// Fixed pool of long-lived workers draining the job queue.
///
/// Each worker loops: dequeue (its only idle suspension point), execute
/// the job end-to-end, log any failure, continue. A `Stop` sentinel ends
/// one worker's loop.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers against the queue.
    pub fn start(count: usize, queue: Arc<JobQueue>, ctx: Arc<WorkerContext>) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    log::debug!("Worker {} started", worker_id);
                    loop {
                        match queue.dequeue().await {
                            QueueEntry::Job(job) => {
                                let job_id = job.id.clone();
                                execute_job(&ctx, job).await;
                                log::debug!("Worker {} finished job {}", worker_id, job_id);
                            }
                            QueueEntry::Stop => {
                                log::info!("Worker {} stopping", worker_id);
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        Self { queue, handles }
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Pushes one stop sentinel per worker and waits for all loops to
    /// exit. Jobs already queued ahead of the sentinels still run.
    pub async fn shutdown(self) {
        for _ in 0..self.handles.len() {
            self.queue.push_stop().await;
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                log::error!("Worker task join failed: {}", e);
            }
        }
        log::info!("Worker pool stopped");
    }
}

/// Runs one job through its full state machine. Never returns an error:
/// every failure is handled here (refund, notice, metrics) so the worker
/// loop cannot be killed by a job.
pub async fn execute_job(ctx: &WorkerContext, job: GenerationJob) {
    // Locked: at most one credit-affecting section per target user.
    let user_lock = ctx.serializer.lock_for(job.target_user);
    let _user_guard = user_lock.lock().await;

    // Admitted: global in-flight cap, a backpressure point rather than a
    // rejection boundary. The permit is released on every path below.
    let _generation_permit = match ctx.limits.acquire_generation().await {
        Ok(permit) => permit,
        Err(e) => {
            log::error!("Failed to acquire generation permit for job {}: {}", job.id, e);
            return;
        }
    };
    metrics::JOBS_IN_FLIGHT.inc();
    log::info!(
        "Executing job {} (kind: {}, user: {}, free permits: {})",
        job.id,
        job.kind.as_str(),
        job.target_user,
        ctx.limits.available_generations()
    );

    run_job(ctx, &job).await;
    metrics::JOBS_IN_FLIGHT.dec();
}

async fn run_job(ctx: &WorkerContext, job: &GenerationJob) {
    // Validated: re-check what may have changed since enqueue.
    let model = match resolve_model(ctx, job).await {
        Ok(model) => model,
        Err(notice) => {
            notify_failure(ctx, job, notice).await;
            metrics::GENERATION_FAILURE_TOTAL
                .with_label_values(&[job.kind.as_str(), "validation"])
                .inc();
            return;
        }
    };

    // Debited: the point of no free failure. Admin-proxy jobs skip the
    // debit entirely and therefore never need the refund path.
    let charged = if job.admin_proxy {
        false
    } else {
        match ctx.ledger.debit(job.target_user, ResourceKind::ImageUnits, job.cost).await {
            Ok(true) => true,
            Ok(false) => {
                notify_failure(ctx, job, FailureNotice::InsufficientBalance).await;
                metrics::GENERATION_FAILURE_TOTAL
                    .with_label_values(&[job.kind.as_str(), "ledger"])
                    .inc();
                return;
            }
            Err(e) => {
                log::error!("Debit failed for job {}: {}", job.id, e);
                notify_failure(ctx, job, FailureNotice::GenerationFailed).await;
                metrics::GENERATION_FAILURE_TOTAL
                    .with_label_values(&[job.kind.as_str(), "ledger"])
                    .inc();
                return;
            }
        }
    };

    // Dispatched + Fetched. Any error from here on triggers the
    // compensating credit before the user hears anything.
    match dispatch_and_fetch(ctx, job, model.as_ref()).await {
        Ok(artifacts) => {
            deliver(ctx, job, &artifacts).await;
            record_audit(ctx, job, model.as_ref()).await;
            metrics::GENERATION_SUCCESS_TOTAL
                .with_label_values(&[job.kind.as_str()])
                .inc();
        }
        Err(e) => {
            log::warn!("Job {} failed at {} stage: {}", job.id, e.stage(), e);
            if charged {
                refund(ctx, job).await;
            }
            metrics::GENERATION_FAILURE_TOTAL
                .with_label_values(&[job.kind.as_str(), e.stage()])
                .inc();
            notify_failure(ctx, job, FailureNotice::GenerationFailed).await;
        }
    }
}

async fn resolve_model(ctx: &WorkerContext, job: &GenerationJob) -> Result<Option<ActiveModelDescriptor>, FailureNotice> {
    if !job.kind.requires_model() {
        return Ok(None);
    }
    match ctx.model_cache.get_active(job.target_user).await {
        Ok(Some(model)) if model.is_ready() => Ok(Some(model)),
        Ok(_) => Err(FailureNotice::NoActiveModel),
        Err(e) => {
            log::error!("Model lookup failed for job {}: {}", job.id, e);
            Err(FailureNotice::GenerationFailed)
        }
    }
}

async fn dispatch_and_fetch(
    ctx: &WorkerContext,
    job: &GenerationJob,
    model: Option<&ActiveModelDescriptor>,
) -> Result<Vec<Artifact>, JobError> {
    let request = InferenceRequest::for_job(job, model);
    let urls = ctx.inference.run(&request).await?;
    let artifacts = ctx.fetcher.fetch_all(&urls).await?;
    Ok(artifacts)
}

/// Delivered: a send failure after a successful generation is a transient
/// messaging problem, not a job failure. Logged, never refunded.
async fn deliver(ctx: &WorkerContext, job: &GenerationJob, artifacts: &[Artifact]) {
    if let Err(e) = ctx.notifier.deliver_artifacts(job.requester_chat, job, artifacts).await {
        log::warn!("Delivery to {} failed for job {}: {}", job.requester_chat, job.id, e);
    }
    // Admin-proxy results also go to the user they were generated for.
    if job.admin_proxy && job.target_user != job.requester_chat {
        if let Err(e) = ctx.notifier.deliver_artifacts(job.target_user, job, artifacts).await {
            log::warn!("Delivery to {} failed for job {}: {}", job.target_user, job.id, e);
        }
    }
}

async fn refund(ctx: &WorkerContext, job: &GenerationJob) {
    metrics::REFUNDS_TOTAL.inc();
    match ctx.ledger.credit(job.target_user, ResourceKind::ImageUnits, job.cost).await {
        Ok(true) => log::info!("Refunded {} units to user {} for job {}", job.cost, job.target_user, job.id),
        Ok(false) => log::error!(
            "Refund of {} units to user {} for job {} was not applied",
            job.cost,
            job.target_user,
            job.id
        ),
        Err(e) => log::error!(
            "Refund of {} units to user {} for job {} errored: {}",
            job.cost,
            job.target_user,
            job.id,
            e
        ),
    }
}

async fn record_audit(ctx: &WorkerContext, job: &GenerationJob, model: Option<&ActiveModelDescriptor>) {
    let model_id = model.map(|m| m.model_id.as_str());
    if let Err(e) = ctx
        .audit
        .record_generation(job.target_user, job.kind.as_str(), model_id, job.cost)
        .await
    {
        log::warn!("Audit write failed for job {}: {}", job.id, e);
    }
}

async fn notify_failure(ctx: &WorkerContext, job: &GenerationJob, notice: FailureNotice) {
    if let Err(e) = ctx.notifier.deliver_failure(job.requester_chat, job, notice).await {
        log::warn!("Failure notice to {} for job {} could not be sent: {}", job.requester_chat, job.id, e);
    }
}
