use std::env;
use std::time::Duration;

/// Endpoint and timing configuration for the upload-and-poll pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL of the negotiation API; `/upload-url` is appended
    /// (default: "http://127.0.0.1:3000")
    pub api_base_url: String,

    /// Status endpoint; falls back to `<api_base_url>/getresult` when unset
    pub status_url: Option<String>,

    /// Total time allowed for polling (default: 5 minutes)
    pub poll_timeout: Duration,

    /// Pause between status requests (default: 3 seconds)
    pub poll_interval: Duration,

    /// Per-request timeout for negotiation and status requests (default: 30 seconds)
    pub request_timeout: Duration,

    /// TCP connect timeout for every request (default: 10 seconds)
    pub connect_timeout: Duration,

    /// Maximum file size in bytes (default: 256 MB)
    pub max_file_size: usize,

    /// Chunk size used when streaming the upload body (default: 64 KB)
    pub upload_chunk_size: usize,

    /// Consecutive failed polls before a degraded signal is raised (default: 5)
    pub degraded_after: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000".to_string(),
            status_url: None,
            poll_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_millis(3000),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_file_size: 256 * 1024 * 1024, // 256 MB
            upload_chunk_size: 64 * 1024,     // 64 KB
            degraded_after: 5,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            api_base_url: lookup("ANALYSIS_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default.api_base_url),

            status_url: lookup("ANALYSIS_STATUS_URL").filter(|v| !v.trim().is_empty()),

            poll_timeout: parsed("POLL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.poll_timeout),

            poll_interval: parsed("POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.poll_interval),

            request_timeout: parsed("REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),

            connect_timeout: parsed("CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.connect_timeout),

            max_file_size: parsed("MAX_FILE_SIZE")
                .map(|v| v as usize)
                .unwrap_or(default.max_file_size),

            upload_chunk_size: parsed("UPLOAD_CHUNK_SIZE")
                .map(|v| v as usize)
                .filter(|v| *v > 0)
                .unwrap_or(default.upload_chunk_size),

            degraded_after: parsed("POLL_DEGRADED_AFTER")
                .map(|v| v as u32)
                .unwrap_or(default.degraded_after),
        }
    }

    /// Create config for local development (short timeouts, fast polling)
    pub fn development() -> Self {
        Self {
            poll_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            degraded_after: 3,
            ..Self::default()
        }
    }

    pub fn negotiation_url(&self) -> String {
        format!("{}/upload-url", self.api_base_url.trim_end_matches('/'))
    }

    pub fn status_endpoint(&self) -> String {
        match &self.status_url {
            Some(url) => url.clone(),
            None => format!("{}/getresult", self.api_base_url.trim_end_matches('/')),
        }
    }
}
