use std::sync::Arc;

use crate::core::cooldown::CooldownGate;
use crate::core::error::AdmissionError;
use crate::core::metrics;
use crate::generation::job::{AspectRatio, GenerationJob, JobKind};
use crate::generation::queue::JobQueue;
use crate::storage::ledger::GenerationLedger;
use crate::storage::model_cache::ModelCache;

/// A confirmed generation request, as handed over by the request-handling
/// layer. Turned into an immutable [`GenerationJob`] at submission.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Chat that gets status messages and results
    pub requester_chat: i64,
    /// User whose balance and model the job runs against
    pub target_user: i64,
    pub kind: JobKind,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub outputs: u32,
    /// Set when an admin generates on the target user's behalf; such jobs
    /// never debit
    pub admin_proxy: bool,
}

/// The sole entry point into the dispatch core.
///
/// Submission is the fast path: validate, cooldown, balance pre-check,
/// enqueue, return the queue position. Everything slow happens later on a
/// worker. No admission failure ever touches the ledger.
pub struct GenerationService {
    queue: Arc<JobQueue>,
    cooldown: Arc<CooldownGate>,
    ledger: Arc<dyn GenerationLedger>,
    model_cache: Arc<ModelCache>,
}

impl GenerationService {
    pub fn new(
        queue: Arc<JobQueue>,
        cooldown: Arc<CooldownGate>,
        ledger: Arc<dyn GenerationLedger>,
        model_cache: Arc<ModelCache>,
    ) -> Self {
        Self {
            queue,
            cooldown,
            ledger,
            model_cache,
        }
    }

    /// Validates and enqueues a generation request, returning its 1-based
    /// queue position.
    ///
    /// # Errors
    ///
    /// * `InvalidParams` - prompt or output count failed validation
    /// * `NoActiveModel` - an avatar job for a user without a ready model
    /// * `InsufficientBalance` - the pre-check found too few units (the
    ///   authoritative check is still the atomic debit on the worker)
    /// * `CooldownActive` - the user submitted again too fast
    /// * `QueueFull` - hard admission boundary; the cooldown mark set just
    ///   before is rolled back so the rejection has no side effects
    pub async fn submit_generation(&self, request: GenerationRequest) -> Result<usize, AdmissionError> {
        let job = GenerationJob::build(
            request.requester_chat,
            request.target_user,
            request.kind,
            request.prompt,
            request.aspect_ratio,
            request.outputs,
            request.admin_proxy,
        )
        .map_err(|e| {
            metrics::SUBMISSIONS_REJECTED_TOTAL.with_label_values(&["invalid"]).inc();
            e
        })?;

        if job.kind.requires_model() {
            self.check_model(&job).await?;
        }

        if !job.admin_proxy {
            self.check_balance(&job).await?;
        }

        if !self.cooldown.try_acquire(job.target_user).await {
            let retry_in = self
                .cooldown
                .remaining(job.target_user)
                .await
                .unwrap_or_default();
            metrics::SUBMISSIONS_REJECTED_TOTAL.with_label_values(&["cooldown"]).inc();
            return Err(AdmissionError::CooldownActive { retry_in });
        }

        match self.queue.submit(job).await {
            Ok(position) => Ok(position),
            Err(e) => {
                // Undo the mark set above so a queue-full rejection leaves
                // no trace.
                self.cooldown.release(request.target_user).await;
                metrics::SUBMISSIONS_REJECTED_TOTAL.with_label_values(&["queue_full"]).inc();
                Err(e)
            }
        }
    }

    /// Rejects avatar jobs for users without a ready trained model before
    /// anything is queued. The worker re-checks right before dispatch, so
    /// a lookup error here is logged and waved through rather than turned
    /// into a false rejection.
    async fn check_model(&self, job: &GenerationJob) -> Result<(), AdmissionError> {
        match self.model_cache.get_active(job.target_user).await {
            Ok(Some(model)) if model.is_ready() => Ok(()),
            Ok(_) => {
                metrics::SUBMISSIONS_REJECTED_TOTAL.with_label_values(&["no_model"]).inc();
                Err(AdmissionError::NoActiveModel)
            }
            Err(e) => {
                log::warn!("Model pre-check failed for user {}: {}", job.target_user, e);
                Ok(())
            }
        }
    }

    /// Cheap balance pre-check for fast user feedback. Ledger errors here
    /// are logged and waved through: the atomic debit on the worker is the
    /// authoritative gate.
    async fn check_balance(&self, job: &GenerationJob) -> Result<(), AdmissionError> {
        match self.ledger.balance(job.target_user).await {
            Ok(balance) if balance.image_units < job.cost => {
                metrics::SUBMISSIONS_REJECTED_TOTAL.with_label_values(&["balance"]).inc();
                Err(AdmissionError::InsufficientBalance {
                    required: job.cost,
                    available: balance.image_units,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                log::warn!("Balance pre-check failed for user {}: {}", job.target_user, e);
                Ok(())
            }
        }
    }

    /// 1-based queue position of the user's first pending job.
    pub async fn queue_position(&self, user_id: i64) -> Option<usize> {
        self.queue.position_for_user(user_id).await
    }
}
