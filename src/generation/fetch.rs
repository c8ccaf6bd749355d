use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::sync::Arc;

use crate::core::config;
use crate::core::retry::{retry, RetryConfig};
use crate::generation::error::FetchError;
use crate::generation::limits::ConcurrencyLimiter;

/// One downloaded generation output, held in memory until delivery.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub url: String,
    pub bytes: Vec<u8>,
}

/// Where produced artifacts are downloaded from. Production is plain
/// HTTP; tests script per-URL failures.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP implementation of [`FileStore`].
pub struct HttpFileStore {
    client: reqwest::Client,
}

impl HttpFileStore {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config::network::download_timeout())
            .build()
            .map_err(|e| FetchError::Download {
                url: String::new(),
                reason: format!("HTTP client error: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| FetchError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(FetchError::Empty { url: url.to_string() });
        }
        Ok(bytes.to_vec())
    }
}

/// Downloads all artifact URLs of a finished generation in parallel,
/// each under the shared download cap and its own short retry budget.
///
/// Strict all-or-nothing policy: if any URL still fails after its
/// retries, the whole set is discarded and the job is refunded. Partial
/// delivery is deliberately not supported.
pub struct ResultFetcher {
    store: Arc<dyn FileStore>,
    limits: Arc<ConcurrencyLimiter>,
    retry_config: RetryConfig,
}

impl ResultFetcher {
    pub fn new(store: Arc<dyn FileStore>, limits: Arc<ConcurrencyLimiter>, retry_config: RetryConfig) -> Self {
        Self {
            store,
            limits,
            retry_config,
        }
    }

    /// Fetches every URL, failing as a whole on the first URL whose retry
    /// budget is exhausted.
    pub async fn fetch_all(&self, urls: &[String]) -> Result<Vec<Artifact>, FetchError> {
        try_join_all(urls.iter().map(|url| self.fetch_one(url))).await
    }

    async fn fetch_one(&self, url: &str) -> Result<Artifact, FetchError> {
        let _permit = self
            .limits
            .acquire_download()
            .await
            .map_err(|e| FetchError::Download {
                url: url.to_string(),
                reason: format!("download permit unavailable: {}", e),
            })?;

        let outcome = retry(&self.retry_config, || self.store.download(url)).await;
        match outcome.result {
            Ok(bytes) => {
                log::debug!("Fetched {} ({} bytes, {} attempts)", url, bytes.len(), outcome.attempts);
                Ok(Artifact {
                    url: url.to_string(),
                    bytes,
                })
            }
            Err(e) => {
                log::warn!("Giving up on {} after {} attempts", url, outcome.attempts);
                Err(e.into_last_error())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedStore {
        /// URLs that always fail with a retryable error
        failing: HashSet<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FileStore for ScriptedStore {
        async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(url) {
                Err(FetchError::Download {
                    url: url.to_string(),
                    reason: "simulated network error".into(),
                })
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    fn fetcher(store: Arc<ScriptedStore>) -> ResultFetcher {
        let limits = Arc::new(ConcurrencyLimiter::new(4, 2, 2));
        let retry = RetryConfig::download()
            .max_retries(2)
            .initial_delay(Duration::from_millis(2));
        ResultFetcher::new(store, limits, retry)
    }

    #[tokio::test]
    async fn test_all_urls_fetched() {
        let store = Arc::new(ScriptedStore {
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        });
        let urls: Vec<String> = (0..3).map(|i| format!("https://files.example/{}.png", i)).collect();

        let artifacts = fetcher(store.clone()).fetch_all(&urls).await.unwrap();
        assert_eq!(artifacts.len(), 3);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_one_failing_url_fails_the_whole_set() {
        let mut failing = HashSet::new();
        failing.insert("https://files.example/1.png".to_string());
        let store = Arc::new(ScriptedStore {
            failing,
            calls: AtomicUsize::new(0),
        });
        let urls: Vec<String> = (0..3).map(|i| format!("https://files.example/{}.png", i)).collect();

        let err = fetcher(store.clone()).fetch_all(&urls).await.unwrap_err();
        assert!(matches!(err, FetchError::Download { .. }));
        // The failing URL burned its full retry budget: 1 initial + 2 retries
        assert!(store.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        struct NotFoundStore {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl FileStore for NotFoundStore {
            async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            }
        }

        let store = Arc::new(NotFoundStore {
            calls: AtomicUsize::new(0),
        });
        let limits = Arc::new(ConcurrencyLimiter::new(4, 2, 2));
        let fetcher = ResultFetcher::new(store.clone(), limits, RetryConfig::download());

        let urls = vec!["https://files.example/gone.png".to_string()];
        let err = fetcher.fetch_all(&urls).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
