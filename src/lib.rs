//! Lumora - Telegram bot for AI image and video generation
//!
//! This library provides the core functionality for the Lumora bot:
//! the generation dispatch pipeline (queue, worker pool, concurrency
//! limits, inference retries, artifact fetching, balance accounting),
//! storage operations, and Telegram delivery.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, metrics, and shared primitives
//! - `generation`: The generation dispatch core (queue, workers, inference)
//! - `storage`: SQLite-backed balances, model descriptors, and audit log
//! - `telegram`: Bot command handlers and result delivery

pub mod core;
pub mod generation;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use generation::{GenerationJob, GenerationRequest, GenerationService, JobKind};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
