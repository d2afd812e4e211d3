use crate::api::PipelineError;
use crate::utils::validation;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Result produced by the downstream analysis job. Passed through verbatim.
pub type AnalysisPayload = Value;

/// Prefix and suffix of the result object written next to the upload.
pub const RESULT_KEY_PREFIX: &str = "results/";
pub const RESULT_KEY_SUFFIX: &str = "-analysis.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
}

impl UploadRequest {
    /// Content type sent with the storage write
    pub fn effective_content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(mime::APPLICATION_OCTET_STREAM.as_ref())
    }
}

/// A file selected for analysis: its metadata plus the full body.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub request: UploadRequest,
    pub body: Bytes,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, body: Bytes) -> Self {
        let filename = filename.into();
        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .or_else(|| validation::detect_content_type(&filename, &body).map(str::to_string));

        Self {
            request: UploadRequest {
                filename,
                content_type,
                size: body.len() as u64,
            },
            body,
        }
    }

    /// Reads a file from disk, inferring its content type when none is given
    pub async fn from_path(
        path: impl AsRef<Path>,
        content_type: Option<String>,
    ) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                PipelineError::InvalidFile(format!("{} has no file name", path.display()))
            })?
            .to_string();
        let body = tokio::fs::read(path).await?;
        Ok(Self::new(filename, content_type, Bytes::from(body)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteGrant {
    pub bucket: String,
    pub key: String,
    pub write_url: Url,
    pub expires_hint: Option<Duration>,
    pub(crate) issued_at: Instant,
}

impl WriteGrant {
    pub fn new(
        bucket: String,
        key: String,
        write_url: Url,
        expires_hint: Option<Duration>,
    ) -> Self {
        Self {
            bucket,
            key,
            write_url,
            expires_hint,
            issued_at: Instant::now(),
        }
    }

    /// True once the backend-reported lifetime of the write URL has passed
    pub fn is_expired(&self) -> bool {
        self.expires_hint
            .is_some_and(|hint| self.issued_at.elapsed() >= hint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub percent: u8,
}

impl UploadProgress {
    pub fn new(bytes_sent: u64, bytes_total: u64) -> Self {
        let percent = if bytes_total == 0 {
            0
        } else {
            let ratio = bytes_sent.min(bytes_total) as f64 / bytes_total as f64;
            (ratio * 100.0).round() as u8
        };
        Self {
            bytes_sent,
            bytes_total,
            percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultQuery {
    pub bucket: String,
    pub result_key: String,
}

impl ResultQuery {
    pub fn from_grant(grant: &WriteGrant) -> Self {
        Self {
            bucket: grant.bucket.clone(),
            result_key: format!("{}{}{}", RESULT_KEY_PREFIX, grant.key, RESULT_KEY_SUFFIX),
        }
    }
}

/// Canonical status response after envelope normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    /// Reads the envelope fields out of a normalized value.
    /// Anything other than a literal `ready: true` counts as not ready.
    pub fn from_value(value: &Value) -> Self {
        Self {
            ready: value.get("ready").and_then(Value::as_bool) == Some(true),
            result: value.get("result").cloned(),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Negotiating,
    Uploading,
    Polling,
    Succeeded,
    Failed,
    Cancelled,
}

/// Stage shown by the UI shell's loading indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageIndicator {
    Negotiating,
    Uploading,
    Polling,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed | Stage::Cancelled)
    }

    pub fn indicator(self) -> Option<StageIndicator> {
        match self {
            Stage::Negotiating => Some(StageIndicator::Negotiating),
            Stage::Uploading => Some(StageIndicator::Uploading),
            Stage::Polling => Some(StageIndicator::Polling),
            _ => None,
        }
    }

    /// Forward-only transition table. `Idle -> Failed` covers input rejected
    /// before negotiation starts.
    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Idle, Negotiating) | (Idle, Failed) => true,
            (Negotiating, Uploading) | (Negotiating, Failed) => true,
            (Uploading, Polling) | (Uploading, Failed) => true,
            (Polling, Succeeded) | (Polling, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}
