use crate::models::Stage;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Presign request failed: {}", status_label(.status))]
    NegotiationFailed { status: Option<u16>, body: String },

    #[error("Upload failed with status {status}")]
    UploadFailed { status: u16, body: String },

    #[error("Upload network error: {0}")]
    UploadNetworkError(String),

    #[error("Status request failed: {0}")]
    StatusUnavailable(String),

    #[error("Result not ready after {attempts} attempts ({elapsed:?})")]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        last_error: Option<String>,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Invalid stage transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no response".to_string(),
    }
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Message handed to the UI shell's error sink
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::NegotiationFailed { body, .. } if !body.is_empty() => {
                format!("{} {}", self, body.trim())
            }
            PipelineError::UploadFailed { status, body } if !body.is_empty() => {
                format!("S3 upload failed: {} {}", status, body.trim())
            }
            PipelineError::UploadFailed { status, .. } => format!("S3 upload failed: {}", status),
            PipelineError::UploadNetworkError(_) => "S3 upload network error".to_string(),
            PipelineError::Timeout {
                last_error: Some(reason),
                ..
            } => format!("Result not ready in time (last error: {})", reason),
            PipelineError::Timeout { .. } => "Result not ready in time".to_string(),
            PipelineError::Cancelled => "Cancelled by user".to_string(),
            other => other.to_string(),
        }
    }
}
