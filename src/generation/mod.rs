//! Generation dispatch core
//!
//! The bounded, concurrency-controlled pipeline between a confirmed
//! generation request and the delivered artifacts: admission checks,
//! the FIFO job queue, the worker pool, per-user serialization, the
//! concurrency semaphores, the retried inference call, parallel artifact
//! fetching, and the debit/refund transaction around it all.

pub mod error;
pub mod fetch;
pub mod inference;
pub mod job;
pub mod limits;
pub mod queue;
pub mod service;
pub mod worker;

// Re-exports for convenience
pub use error::{FetchError, ProviderError};
pub use fetch::{Artifact, FileStore, ResultFetcher};
pub use inference::{InferenceClient, InferenceProvider, InferenceRequest};
pub use job::{AspectRatio, GenerationJob, JobKind};
pub use limits::{ConcurrencyLimiter, PerUserSerializer};
pub use queue::JobQueue;
pub use service::{GenerationRequest, GenerationService};
pub use worker::{WorkerContext, WorkerPool};
