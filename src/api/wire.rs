//! Request and response bodies exchanged with the remote analysis API.

use serde::{Deserialize, Serialize};

/// Body of `POST <api>/upload-url`
#[derive(Debug, Serialize)]
pub struct PresignRequest<'a> {
    pub filename: &'a str,
    pub filetype: &'a str,
}

/// Unwrapped body of the negotiation response
#[derive(Debug, Deserialize)]
pub struct PresignResponse {
    pub presigned_url: String,
    pub bucket: String,
    pub key: String,
    /// Lifetime of the presigned URL in seconds, when the backend reports it
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Body of `POST <status-url>`
#[derive(Debug, Serialize)]
pub struct StatusRequest<'a> {
    pub bucket: &'a str,
    pub result_key: &'a str,
}
