//! Client-side orchestration for a remote file analysis pipeline.
//!
//! A run negotiates a presigned write URL, uploads the file straight to
//! storage, then polls a status endpoint until the analysis result is ready.
//! See [`services::orchestrator::Orchestrator`] for the entry point.

pub mod api;
pub mod config;
pub mod handlers;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use api::PipelineError;
pub use config::PipelineConfig;
pub use models::{
    AnalysisPayload, ResultEnvelope, ResultQuery, Stage, StageIndicator, UploadFile,
    UploadProgress, UploadRequest, WriteGrant,
};
pub use services::orchestrator::{
    OrchestrationRun, Orchestrator, RunHandle, RunObserver, RunOutcome,
};
