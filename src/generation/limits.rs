use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};

use crate::core::config;

/// Independent capacity caps for the three bounded operations of the
/// pipeline: whole generation jobs, calls to the inference provider, and
/// artifact downloads.
///
/// Permits are RAII tokens; dropping one releases the capacity even when
/// the holder fails.
pub struct ConcurrencyLimiter {
    generations: Arc<Semaphore>,
    provider_calls: Arc<Semaphore>,
    downloads: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with explicit caps.
    pub fn new(max_generations: usize, max_provider_calls: usize, max_downloads: usize) -> Self {
        Self {
            generations: Arc::new(Semaphore::new(max_generations)),
            provider_calls: Arc::new(Semaphore::new(max_provider_calls)),
            downloads: Arc::new(Semaphore::new(max_downloads)),
        }
    }

    /// Creates a limiter with the configured production caps.
    pub fn from_config() -> Self {
        Self::new(
            config::limits::MAX_CONCURRENT_GENERATIONS,
            config::limits::MAX_CONCURRENT_PROVIDER_CALLS,
            config::limits::MAX_CONCURRENT_DOWNLOADS,
        )
    }

    /// Acquires a permit counting against the total-generations cap.
    /// Suspends while the cap is reached; this is the deliberate
    /// backpressure point, not a rejection boundary.
    pub async fn acquire_generation(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.generations).acquire_owned().await
    }

    /// Acquires a permit for one inference provider call.
    pub async fn acquire_provider_call(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.provider_calls).acquire_owned().await
    }

    /// Acquires a permit for one artifact download.
    pub async fn acquire_download(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.downloads).acquire_owned().await
    }

    /// Free generation permits, for logging.
    pub fn available_generations(&self) -> usize {
        self.generations.available_permits()
    }
}

/// Lazily-created per-user locks guaranteeing at most one job per user
/// inside its credit-affecting section at a time.
///
/// Entries are never evicted: a lock could be removed only while provably
/// unheld, and the map stays small relative to the user table, so eviction
/// is not worth the race.
pub struct PerUserSerializer {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl Default for PerUserSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl PerUserSerializer {
    /// Creates an empty lock registry.
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Returns the lock for the given user, creating it on first use.
    ///
    /// The caller holds the returned `Arc` and awaits `.lock()` on it;
    /// cloning out of the map keeps the registry lock short.
    pub fn lock_for(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of registered user locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no user lock has been created yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_user_gets_same_lock() {
        let serializer = PerUserSerializer::new();
        let a = serializer.lock_for(42);
        let b = serializer.lock_for(42);
        assert!(Arc::ptr_eq(&a, &b));

        let other = serializer.lock_for(43);
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(serializer.len(), 2);
    }

    #[tokio::test]
    async fn test_serializer_allows_one_critical_section_per_user() {
        let serializer = Arc::new(PerUserSerializer::new());
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let serializer = Arc::clone(&serializer);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let lock = serializer.lock_for(1);
                let _guard = lock.lock().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_semaphore_caps_concurrency() {
        let limiter = Arc::new(ConcurrencyLimiter::new(3, 2, 2));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..30 {
            let limiter = Arc::clone(&limiter);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_generation().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.available_generations(), 3);
    }
}
