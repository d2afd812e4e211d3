use crate::api::PipelineError;
use crate::config::PipelineConfig;
use crate::services::negotiator::HttpNegotiator;
use crate::services::orchestrator::Orchestrator;
use crate::services::poller::HttpStatusClient;
use crate::services::uploader::HttpUploader;
use reqwest::Client;
use std::sync::Arc;
use tracing::info;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client. Only the connect timeout is global; request timeouts
/// are set per call so long uploads are not cut off.
pub fn build_client(config: &PipelineConfig) -> Result<Client, PipelineError> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

pub fn setup_orchestrator(config: PipelineConfig) -> Result<Arc<Orchestrator>, PipelineError> {
    let client = build_client(&config)?;

    info!(
        "☁️  Analysis API: {} (status: {})",
        config.negotiation_url(),
        config.status_endpoint()
    );
    info!(
        "⏱️  Polling every {:?} for up to {:?}",
        config.poll_interval, config.poll_timeout
    );

    let negotiator = Arc::new(HttpNegotiator::new(
        client.clone(),
        config.negotiation_url(),
        config.request_timeout,
    ));
    let uploader = Arc::new(HttpUploader::new(client.clone(), config.upload_chunk_size));
    let status = Arc::new(HttpStatusClient::new(
        client,
        config.status_endpoint(),
        config.request_timeout,
    ));

    Ok(Arc::new(Orchestrator::new(negotiator, uploader, status, config)))
}
