use async_trait::async_trait;
use std::sync::Arc;

use crate::core::error::AppResult;
use crate::storage::db::{self, DbPool};

/// Which consumable balance an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Units spent on image/video generations
    ImageUnits,
    /// Slots spent on model trainings
    TrainingSlots,
}

impl ResourceKind {
    fn column(&self) -> &'static str {
        match self {
            ResourceKind::ImageUnits => "image_units",
            ResourceKind::TrainingSlots => "training_slots",
        }
    }
}

/// Per-user consumable counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBalance {
    pub image_units: u32,
    pub training_slots: u32,
}

/// Atomic debit/credit of user balances.
///
/// Every balance mutation in the system goes through this trait. The
/// store's own conditional update gives cross-process atomicity; the
/// per-user serializer prevents same-user races within this process.
#[async_trait]
pub trait GenerationLedger: Send + Sync {
    /// Reads a user's current balance.
    async fn balance(&self, user_id: i64) -> AppResult<ResourceBalance>;

    /// Debits `amount`, returning `false` (without mutating) when the
    /// balance cannot cover it.
    async fn debit(&self, user_id: i64, kind: ResourceKind, amount: u32) -> AppResult<bool>;

    /// Credits `amount` back, returning `false` if no balance row exists.
    async fn credit(&self, user_id: i64, kind: ResourceKind, amount: u32) -> AppResult<bool>;
}

/// Append-only audit trail of completed generations. Best-effort: a
/// failed write is logged, never propagated into the job outcome.
#[async_trait]
pub trait GenerationAudit: Send + Sync {
    async fn record_generation(&self, user_id: i64, kind: &str, model_id: Option<&str>, units: u32) -> AppResult<()>;
}

/// SQLite-backed ledger and audit log.
pub struct SqliteLedger {
    pool: Arc<DbPool>,
}

impl SqliteLedger {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

// rusqlite calls are blocking, so every operation hops onto the blocking
// thread pool via `db::with_connection`.
#[async_trait]
impl GenerationLedger for SqliteLedger {
    async fn balance(&self, user_id: i64) -> AppResult<ResourceBalance> {
        db::with_connection(&self.pool, move |conn| {
            let (image_units, training_slots) = db::get_balance(conn, user_id)?;
            Ok(ResourceBalance {
                image_units,
                training_slots,
            })
        })
        .await
    }

    async fn debit(&self, user_id: i64, kind: ResourceKind, amount: u32) -> AppResult<bool> {
        let applied = db::with_connection(&self.pool, move |conn| {
            Ok(db::debit_balance(conn, user_id, kind.column(), amount)?)
        })
        .await?;
        if applied {
            log::info!("Debited {} {:?} from user {}", amount, kind, user_id);
        }
        Ok(applied)
    }

    async fn credit(&self, user_id: i64, kind: ResourceKind, amount: u32) -> AppResult<bool> {
        let applied = db::with_connection(&self.pool, move |conn| {
            Ok(db::credit_balance(conn, user_id, kind.column(), amount)?)
        })
        .await?;
        if applied {
            log::info!("Credited {} {:?} back to user {}", amount, kind, user_id);
        } else {
            log::error!(
                "Refund of {} {:?} to user {} found no balance row",
                amount,
                kind,
                user_id
            );
        }
        Ok(applied)
    }
}

#[async_trait]
impl GenerationAudit for SqliteLedger {
    async fn record_generation(&self, user_id: i64, kind: &str, model_id: Option<&str>, units: u32) -> AppResult<()> {
        let kind = kind.to_string();
        let model_id = model_id.map(str::to_string);
        db::with_connection(&self.pool, move |conn| {
            db::insert_generation_log(conn, user_id, &kind, model_id.as_deref(), units)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::{create_pool, set_balance};

    fn ledger() -> (SqliteLedger, Arc<DbPool>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let pool = Arc::new(create_pool(path.to_str().unwrap()).unwrap());
        (SqliteLedger::new(Arc::clone(&pool)), pool, dir)
    }

    #[tokio::test]
    async fn test_debit_then_credit_roundtrip() {
        let (ledger, pool, _dir) = ledger();
        {
            let conn = pool.get().unwrap();
            set_balance(&conn, 1, 5, 2).unwrap();
        }

        assert!(ledger.debit(1, ResourceKind::ImageUnits, 2).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap().image_units, 3);

        assert!(ledger.credit(1, ResourceKind::ImageUnits, 2).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap().image_units, 5);
    }

    #[tokio::test]
    async fn test_concurrent_ledger_calls_complete_off_the_runtime() {
        let (ledger, pool, _dir) = ledger();
        {
            let conn = pool.get().unwrap();
            set_balance(&conn, 1, 8, 0).unwrap();
        }

        // Eight tasks hammer the ledger at once; every call runs its
        // blocking work on the blocking pool and none deadlocks the
        // runtime.
        let ledger = Arc::new(ledger);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                assert!(ledger.debit(1, ResourceKind::ImageUnits, 1).await.unwrap());
                ledger.balance(1).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.balance(1).await.unwrap().image_units, 0);
    }

    #[tokio::test]
    async fn test_overdraw_is_rejected() {
        let (ledger, pool, _dir) = ledger();
        {
            let conn = pool.get().unwrap();
            set_balance(&conn, 1, 1, 0).unwrap();
        }

        assert!(!ledger.debit(1, ResourceKind::ImageUnits, 2).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap().image_units, 1);
    }
}
