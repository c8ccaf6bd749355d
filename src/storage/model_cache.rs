use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::core::error::AppResult;
use crate::storage::db::{self, DbPool};

/// Readiness of a user's trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Pending,
    Training,
    Ready,
    Failed,
}

impl ModelStatus {
    /// Parses the stored status string; unknown values read as `Pending`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "training" => ModelStatus::Training,
            "ready" => ModelStatus::Ready,
            "failed" => ModelStatus::Failed,
            _ => ModelStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Pending => "pending",
            ModelStatus::Training => "training",
            ModelStatus::Ready => "ready",
            ModelStatus::Failed => "failed",
        }
    }
}

/// A user's currently-selected trained model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveModelDescriptor {
    pub model_id: String,
    pub version: i64,
    pub trigger_phrase: String,
    pub status: ModelStatus,
}

impl ActiveModelDescriptor {
    pub fn is_ready(&self) -> bool {
        self.status == ModelStatus::Ready
    }
}

/// Relational source of model descriptors, written only by the training
/// workflow.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn load_active(&self, user_id: i64) -> AppResult<Option<ActiveModelDescriptor>>;
}

/// SQLite implementation of [`ModelStore`].
pub struct SqliteModelStore {
    pool: Arc<DbPool>,
}

impl SqliteModelStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModelStore for SqliteModelStore {
    async fn load_active(&self, user_id: i64) -> AppResult<Option<ActiveModelDescriptor>> {
        // rusqlite is blocking; keep the lookup off the async workers.
        db::with_connection(&self.pool, move |conn| {
            let row = db::load_active_model(conn, user_id)?;
            Ok(row.map(|(model_id, version, trigger_phrase, status)| ActiveModelDescriptor {
                model_id,
                version,
                trigger_phrase,
                status: ModelStatus::from_str(&status),
            }))
        })
        .await
    }
}

struct CachedDescriptor {
    descriptor: ActiveModelDescriptor,
    cached_at: Instant,
}

/// Read-through TTL cache in front of the model store, sparing a
/// relational lookup on every avatar job.
///
/// Stale reads within the TTL are an accepted tradeoff; the training
/// workflow calls `invalidate` whenever a descriptor changes.
pub struct ModelCache {
    store: Arc<dyn ModelStore>,
    cache: Mutex<HashMap<i64, CachedDescriptor>>,
    ttl: Duration,
    hit_count: Mutex<u64>,
    miss_count: Mutex<u64>,
}

impl ModelCache {
    /// Creates a cache with the given TTL over the given store.
    pub fn new(store: Arc<dyn ModelStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            ttl,
            hit_count: Mutex::new(0),
            miss_count: Mutex::new(0),
        }
    }

    /// Returns the user's active model descriptor, reading through to the
    /// store on a miss or an expired entry. Absent descriptors are not
    /// negatively cached, so a freshly trained model shows up immediately.
    pub async fn get_active(&self, user_id: i64) -> AppResult<Option<ActiveModelDescriptor>> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&user_id) {
                if Instant::now().duration_since(cached.cached_at) < self.ttl {
                    *self.hit_count.lock().await += 1;
                    return Ok(Some(cached.descriptor.clone()));
                }
                cache.remove(&user_id);
            }
        }

        *self.miss_count.lock().await += 1;
        let descriptor = self.store.load_active(user_id).await?;
        if let Some(ref d) = descriptor {
            let mut cache = self.cache.lock().await;
            cache.insert(
                user_id,
                CachedDescriptor {
                    descriptor: d.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(descriptor)
    }

    /// Drops the cached entry for the user. Called whenever the training
    /// workflow writes a new descriptor.
    pub async fn invalidate(&self, user_id: i64) {
        let mut cache = self.cache.lock().await;
        cache.remove(&user_id);
    }

    /// Cache statistics for the admin stats screen.
    pub async fn stats(&self) -> (u64, u64) {
        let hits = *self.hit_count.lock().await;
        let misses = *self.miss_count.lock().await;
        (hits, misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        loads: AtomicUsize,
        descriptor: Mutex<Option<ActiveModelDescriptor>>,
    }

    #[async_trait]
    impl ModelStore for CountingStore {
        async fn load_active(&self, _user_id: i64) -> AppResult<Option<ActiveModelDescriptor>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.descriptor.lock().await.clone())
        }
    }

    fn ready_model() -> ActiveModelDescriptor {
        ActiveModelDescriptor {
            model_id: "mdl_1".into(),
            version: 1,
            trigger_phrase: "TOK person".into(),
            status: ModelStatus::Ready,
        }
    }

    #[tokio::test]
    async fn test_second_read_hits_cache() {
        let store = Arc::new(CountingStore {
            loads: AtomicUsize::new(0),
            descriptor: Mutex::new(Some(ready_model())),
        });
        let cache = ModelCache::new(store.clone(), Duration::from_secs(60));

        assert!(cache.get_active(1).await.unwrap().is_some());
        assert!(cache.get_active(1).await.unwrap().is_some());
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);

        let (hits, misses) = cache.stats().await;
        assert_eq!((hits, misses), (1, 1));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let store = Arc::new(CountingStore {
            loads: AtomicUsize::new(0),
            descriptor: Mutex::new(Some(ready_model())),
        });
        let cache = ModelCache::new(store.clone(), Duration::from_secs(60));

        assert!(cache.get_active(1).await.unwrap().is_some());
        cache.invalidate(1).await;
        assert!(cache.get_active(1).await.unwrap().is_some());
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_absent_descriptor_not_negatively_cached() {
        let store = Arc::new(CountingStore {
            loads: AtomicUsize::new(0),
            descriptor: Mutex::new(None),
        });
        let cache = ModelCache::new(store.clone(), Duration::from_secs(60));

        assert!(cache.get_active(1).await.unwrap().is_none());
        // A model appears between reads
        *store.descriptor.lock().await = Some(ready_model());
        assert!(cache.get_active(1).await.unwrap().is_some());
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = Arc::new(CountingStore {
            loads: AtomicUsize::new(0),
            descriptor: Mutex::new(Some(ready_model())),
        });
        let cache = ModelCache::new(store.clone(), Duration::from_millis(10));

        assert!(cache.get_active(1).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get_active(1).await.unwrap().is_some());
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(ModelStatus::from_str("ready"), ModelStatus::Ready);
        assert_eq!(ModelStatus::from_str("training"), ModelStatus::Training);
        assert_eq!(ModelStatus::from_str("garbage"), ModelStatus::Pending);
        assert_eq!(ModelStatus::Ready.as_str(), "ready");
    }
}
