use crate::api::PipelineError;
use crate::models::{UploadFile, UploadProgress, WriteGrant};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receives upload progress. Called once per chunk handed to the transport.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Writes a file body directly to a negotiated write URL
#[async_trait]
pub trait DirectUploader: Send + Sync {
    /// Exactly one write attempt. Returns `Cancelled` if the token fires
    /// before or during the transfer.
    async fn upload(
        &self,
        grant: &WriteGrant,
        file: &UploadFile,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError>;
}

pub struct HttpUploader {
    client: Client,
    chunk_size: usize,
}

impl HttpUploader {
    pub fn new(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl DirectUploader for HttpUploader {
    async fn upload(
        &self,
        grant: &WriteGrant,
        file: &UploadFile,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let total = file.body.len() as u64;
        let request = self
            .client
            .put(grant.write_url.clone())
            .header(CONTENT_TYPE, file.request.effective_content_type())
            .header(CONTENT_LENGTH, total)
            .body(progress_body(file.body.clone(), self.chunk_size, on_progress));

        // Dropping the send future tears down the in-flight transfer
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("🛑 Upload of {} cancelled mid-transfer", grant.key);
                return Err(PipelineError::Cancelled);
            }
            res = request.send() => res,
        };

        let res = match sent {
            Ok(res) => res,
            Err(_) if cancel.is_cancelled() => return Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::error!("❌ Upload of {} failed without a response: {}", grant.key, e);
                return Err(PipelineError::UploadNetworkError(e.to_string()));
            }
        };

        let status = res.status();
        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            tracing::info!("✅ Uploaded {} bytes to {}/{}", total, grant.bucket, grant.key);
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let body = res.text().await.unwrap_or_default();
        tracing::error!("❌ Storage rejected upload of {}: {}", grant.key, status);
        Err(PipelineError::UploadFailed {
            status: status.as_u16(),
            body,
        })
    }
}

/// Streams `data` in `chunk_size` slices, reporting progress as each slice is handed over.
fn progress_body(data: Bytes, chunk_size: usize, on_progress: ProgressCallback) -> reqwest::Body {
    let total = data.len() as u64;
    let stream = async_stream::stream! {
        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            on_progress(UploadProgress::new(end as u64, total));
            yield Ok::<Bytes, std::io::Error>(data.slice(offset..end));
            offset = end;
        }
    };
    reqwest::Body::wrap_stream(stream)
}
