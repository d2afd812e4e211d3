use crate::api::PipelineError;
use crate::api::wire::{PresignRequest, PresignResponse};
use crate::models::WriteGrant;
use crate::utils::envelope;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Obtains a write destination for a file before it is uploaded
#[async_trait]
pub trait UploadNegotiator: Send + Sync {
    /// Requests a bucket, key and time-limited write URL.
    /// A single attempt; failures are returned to the caller as-is.
    async fn negotiate(&self, filename: &str, content_type: &str)
    -> Result<WriteGrant, PipelineError>;
}

pub struct HttpNegotiator {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
}

impl HttpNegotiator {
    pub fn new(client: Client, endpoint: String, request_timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            request_timeout,
        }
    }
}

#[async_trait]
impl UploadNegotiator for HttpNegotiator {
    async fn negotiate(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<WriteGrant, PipelineError> {
        tracing::debug!("Requesting write URL for {} ({})", filename, content_type);

        let res = self
            .client
            .post(&self.endpoint)
            .timeout(self.request_timeout)
            .json(&PresignRequest {
                filename,
                filetype: content_type,
            })
            .send()
            .await
            .map_err(|e| PipelineError::NegotiationFailed {
                status: None,
                body: e.to_string(),
            })?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(PipelineError::NegotiationFailed {
                status: Some(status.as_u16()),
                body,
            });
        }

        grant_from_body(&body)
    }
}

/// Decodes a (possibly wrapped) negotiation response into a grant
pub fn grant_from_body(body: &str) -> Result<WriteGrant, PipelineError> {
    let value = envelope::normalize(body)?;
    let presign: PresignResponse = serde_json::from_value(value).map_err(|e| {
        PipelineError::MalformedEnvelope(format!("unexpected presign response: {}", e))
    })?;

    let write_url = Url::parse(&presign.presigned_url).map_err(|e| {
        PipelineError::MalformedEnvelope(format!(
            "presigned_url '{}' is not a URL: {}",
            presign.presigned_url, e
        ))
    })?;

    if presign.bucket.is_empty() || presign.key.is_empty() {
        return Err(PipelineError::MalformedEnvelope(
            "presign response is missing bucket or key".to_string(),
        ));
    }

    Ok(WriteGrant::new(
        presign.bucket,
        presign.key,
        write_url,
        presign.expires_in.map(Duration::from_secs),
    ))
}
