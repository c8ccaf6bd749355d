use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Configuration constants for the bot
/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: database.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "database.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "app.log".to_string()));

/// Base URL of the inference provider API
/// Read from INFERENCE_API_URL environment variable
pub static INFERENCE_API_URL: Lazy<String> = Lazy::new(|| {
    env::var("INFERENCE_API_URL").unwrap_or_else(|_| "https://api.generation.example".to_string())
});

/// API key for the inference provider
/// Read from INFERENCE_API_KEY environment variable
pub static INFERENCE_API_KEY: Lazy<String> =
    Lazy::new(|| env::var("INFERENCE_API_KEY").unwrap_or_else(|_| String::new()));

/// Admin configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    /// Primary admin user id; 0 disables admin-only features
    pub static ADMIN_USER_ID: Lazy<i64> = Lazy::new(|| {
        env::var("ADMIN_USER_ID")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0)
    });
}

/// Queue and worker pool configuration
pub mod queue {
    /// Maximum number of jobs allowed in the queue; submissions beyond
    /// this are rejected immediately instead of queueing
    pub const MAX_QUEUE_SIZE: usize = 200;

    /// Number of long-lived workers draining the queue
    pub const WORKER_COUNT: usize = 30;
}

/// Concurrency caps for the dispatch pipeline
pub mod limits {
    /// Maximum generation jobs past admission at once (backpressure point,
    /// not a rejection boundary)
    pub const MAX_CONCURRENT_GENERATIONS: usize = 10;

    /// Maximum simultaneous calls to the inference provider; stricter than
    /// the generation cap to protect the provider's own rate limit
    pub const MAX_CONCURRENT_PROVIDER_CALLS: usize = 4;

    /// Maximum parallel artifact downloads, independent of the generation
    /// cap so download bursts cannot starve new dispatch
    pub const MAX_CONCURRENT_DOWNLOADS: usize = 8;
}

/// Per-user cooldown between accepted submissions
pub mod cooldown {
    use std::time::Duration;

    /// Minimum spacing between accepted jobs per user (in seconds)
    pub const COOLDOWN_SECONDS: u64 = 5;

    /// Interval between cleanup sweeps of expired cooldown marks (in seconds)
    pub const CLEANUP_INTERVAL_SECS: u64 = 300;

    /// Cooldown duration
    pub fn duration() -> Duration {
        Duration::from_secs(COOLDOWN_SECONDS)
    }

    /// Cleanup sweep interval duration
    pub fn cleanup_interval() -> Duration {
        Duration::from_secs(CLEANUP_INTERVAL_SECS)
    }
}

/// Retry configuration for external calls
pub mod retry {
    /// Retry attempts after the first try for provider calls
    pub const PROVIDER_MAX_RETRIES: u32 = 3;

    /// Initial provider retry delay (in seconds)
    pub const PROVIDER_INITIAL_DELAY_SECS: u64 = 2;

    /// Upper bound on the provider retry delay (in seconds)
    pub const PROVIDER_MAX_DELAY_SECS: u64 = 30;

    /// Retry attempts after the first try for each artifact download
    pub const DOWNLOAD_MAX_RETRIES: u32 = 2;

    /// Delay between artifact download attempts (in milliseconds)
    pub const DOWNLOAD_DELAY_MS: u64 = 500;
}

/// Model descriptor cache configuration
pub mod model_cache {
    use std::time::Duration;

    /// Time-to-live of a cached active-model descriptor (in seconds).
    /// Stale reads within this window are accepted; writes invalidate
    /// the entry explicitly.
    pub const TTL_SECS: u64 = 600;

    /// Cache TTL duration
    pub fn ttl() -> Duration {
        Duration::from_secs(TTL_SECS)
    }
}

/// Generation request validation and cost
pub mod generation {
    /// Maximum prompt length accepted at submission (in characters)
    pub const MAX_PROMPT_CHARS: usize = 1500;

    /// Maximum outputs per image job
    pub const MAX_IMAGE_OUTPUTS: u32 = 4;

    /// Units debited per generated image
    pub const IMAGE_UNIT_COST: u32 = 1;

    /// Units debited per generated video
    pub const VIDEO_UNIT_COST: u32 = 5;
}

/// Network configuration
pub mod network {
    use std::time::Duration;

    /// Timeout for a single inference provider request (in seconds)
    pub const PROVIDER_TIMEOUT_SECS: u64 = 180;

    /// Timeout for a single artifact download (in seconds)
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

    /// Provider request timeout duration
    pub fn provider_timeout() -> Duration {
        Duration::from_secs(PROVIDER_TIMEOUT_SECS)
    }

    /// Artifact download timeout duration
    pub fn download_timeout() -> Duration {
        Duration::from_secs(DOWNLOAD_TIMEOUT_SECS)
    }
}
