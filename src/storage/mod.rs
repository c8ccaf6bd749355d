//! Database, balance ledger, and model descriptor cache

pub mod db;
pub mod ledger;
pub mod model_cache;

// Re-exports for convenience
pub use db::{create_pool, get_connection, DbConnection, DbPool};
pub use ledger::{GenerationAudit, GenerationLedger, ResourceBalance, ResourceKind, SqliteLedger};
pub use model_cache::{ActiveModelDescriptor, ModelCache, ModelStatus, ModelStore, SqliteModelStore};
