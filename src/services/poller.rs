use crate::api::PipelineError;
use crate::api::wire::StatusRequest;
use crate::models::{ResultEnvelope, ResultQuery};
use crate::utils::envelope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Issues a single status request for a result object
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Returns the raw response body, whatever its HTTP status.
    async fn fetch_status(&self, query: &ResultQuery) -> Result<String, PipelineError>;
}

pub struct HttpStatusClient {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
}

impl HttpStatusClient {
    pub fn new(client: Client, endpoint: String, request_timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            request_timeout,
        }
    }
}

#[async_trait]
impl StatusClient for HttpStatusClient {
    async fn fetch_status(&self, query: &ResultQuery) -> Result<String, PipelineError> {
        let res = self
            .client
            .post(&self.endpoint)
            .timeout(self.request_timeout)
            .json(&StatusRequest {
                bucket: &query.bucket,
                result_key: &query.result_key,
            })
            .send()
            .await
            .map_err(|e| PipelineError::StatusUnavailable(e.to_string()))?;

        // A missing result object surfaces as a non-JSON body, which the
        // poller treats like any other not-ready response.
        res.text()
            .await
            .map_err(|e| PipelineError::StatusUnavailable(e.to_string()))
    }
}

/// Hooks for observing a poll loop. Both default to no-ops.
pub trait PollListener: Send + Sync {
    fn on_attempt(&self, _attempt: u32, _at: DateTime<Utc>) {}

    /// Fired once per streak when `degraded_after` consecutive attempts fail
    fn on_degraded(&self, _consecutive_failures: u32) {}
}

impl PollListener for () {}

pub struct ResultPoller {
    client: Arc<dyn StatusClient>,
    degraded_after: u32,
}

impl ResultPoller {
    pub fn new(client: Arc<dyn StatusClient>, degraded_after: u32) -> Self {
        Self {
            client,
            degraded_after,
        }
    }

    pub async fn poll(
        &self,
        query: &ResultQuery,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<ResultEnvelope, PipelineError> {
        self.poll_with_listener(query, timeout, interval, cancel, &())
            .await
    }

    /// Polls until a `ready: true` envelope arrives, the deadline passes or
    /// the token fires. Network and parse failures are retried.
    pub async fn poll_with_listener(
        &self,
        query: &ResultQuery,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
        listener: &dyn PollListener,
    ) -> Result<ResultEnvelope, PipelineError> {
        let start = Instant::now();
        let mut attempt = 0u32;
        let mut consecutive_failures = 0u32;
        let mut last_error: Option<String> = None;

        while start.elapsed() < timeout {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            attempt += 1;
            listener.on_attempt(attempt, Utc::now());
            tracing::debug!(
                "🔄 Poll attempt #{} for {}/{}",
                attempt,
                query.bucket,
                query.result_key
            );

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                res = self.client.fetch_status(query) => res,
            };

            match fetched.and_then(|raw| envelope::normalize(&raw)) {
                Ok(value) => {
                    consecutive_failures = 0;
                    let envelope = ResultEnvelope::from_value(&value);
                    if envelope.ready {
                        tracing::info!("✅ Result ready on attempt #{}", attempt);
                        return Ok(envelope);
                    }
                    if let Some(error) = &envelope.error {
                        last_error = Some(error.clone());
                    }
                    tracing::debug!("⏳ Not ready yet (attempt #{})", attempt);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!("⚠️  Poll attempt #{} failed: {}", attempt, e);
                    last_error = Some(e.to_string());

                    if self.degraded_after > 0 && consecutive_failures == self.degraded_after {
                        tracing::warn!(
                            "🩺 Status endpoint degraded: {} consecutive failures",
                            consecutive_failures
                        );
                        listener.on_degraded(consecutive_failures);
                    }
                }
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = sleep(interval.min(remaining)) => {}
            }
        }

        Err(PipelineError::Timeout {
            attempts: attempt,
            elapsed: start.elapsed(),
            last_error,
        })
    }
}
