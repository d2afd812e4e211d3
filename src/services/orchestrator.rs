use crate::api::PipelineError;
use crate::config::PipelineConfig;
use crate::models::{
    AnalysisPayload, ResultQuery, Stage, StageIndicator, UploadFile, UploadProgress,
    UploadRequest, WriteGrant,
};
use crate::services::negotiator::UploadNegotiator;
use crate::services::poller::{PollListener, ResultPoller, StatusClient};
use crate::services::uploader::{DirectUploader, ProgressCallback};
use crate::utils::validation;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Final result of one run
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(AnalysisPayload),
    Failed(PipelineError),
    Cancelled,
}

impl RunOutcome {
    pub fn stage(&self) -> Stage {
        match self {
            RunOutcome::Succeeded(_) => Stage::Succeeded,
            RunOutcome::Failed(_) => Stage::Failed,
            RunOutcome::Cancelled => Stage::Cancelled,
        }
    }
}

/// Sink for everything the UI shell shows while a run progresses.
///
/// Exactly one of `on_result`, `on_error` or `on_cancelled` is called per run,
/// after a final `on_stage(None)`.
pub trait RunObserver: Send + Sync {
    fn on_stage(&self, stage: Option<StageIndicator>);
    fn on_progress(&self, progress: UploadProgress);
    fn on_result(&self, payload: &AnalysisPayload);
    fn on_error(&self, message: &str);

    fn on_cancelled(&self) {}
    fn on_poll_attempt(&self, _attempt: u32, _at: DateTime<Utc>) {}
    fn on_degraded(&self, _consecutive_failures: u32) {}
}

struct ObserverListener<'a>(&'a dyn RunObserver);

impl PollListener for ObserverListener<'_> {
    fn on_attempt(&self, attempt: u32, at: DateTime<Utc>) {
        self.0.on_poll_attempt(attempt, at);
    }

    fn on_degraded(&self, consecutive_failures: u32) {
        self.0.on_degraded(consecutive_failures);
    }
}

/// State of a single negotiate -> upload -> poll attempt.
///
/// The grant and query are bound by the transitions that produce them, so a
/// run holds at most one of each.
#[derive(Debug)]
pub struct OrchestrationRun {
    id: Uuid,
    request: UploadRequest,
    grant: Option<WriteGrant>,
    query: Option<ResultQuery>,
    stage: Stage,
    cancel: CancellationToken,
}

impl OrchestrationRun {
    pub fn new(request: UploadRequest, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            grant: None,
            query: None,
            stage: Stage::Idle,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &UploadRequest {
        &self.request
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn grant(&self) -> Option<&WriteGrant> {
        self.grant.as_ref()
    }

    pub fn query(&self) -> Option<&ResultQuery> {
        self.query.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), PipelineError> {
        if !self.stage.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        tracing::debug!("Run {} stage {:?} -> {:?}", self.id, self.stage, next);
        self.stage = next;
        Ok(())
    }

    /// `Negotiating -> Uploading`, binding the grant
    pub fn begin_upload(&mut self, grant: WriteGrant) -> Result<(), PipelineError> {
        self.advance(Stage::Uploading)?;
        self.grant = Some(grant);
        Ok(())
    }

    /// `Uploading -> Polling`, deriving the result query from the grant
    pub fn begin_polling(&mut self) -> Result<&ResultQuery, PipelineError> {
        let query = match &self.grant {
            Some(grant) => ResultQuery::from_grant(grant),
            None => {
                return Err(PipelineError::InvalidTransition {
                    from: self.stage,
                    to: Stage::Polling,
                });
            }
        };
        self.advance(Stage::Polling)?;
        Ok(self.query.insert(query))
    }
}

/// Sequences negotiation, upload and polling for one file at a time.
/// Runs share no mutable state, so one orchestrator can drive many runs.
pub struct Orchestrator {
    negotiator: Arc<dyn UploadNegotiator>,
    uploader: Arc<dyn DirectUploader>,
    poller: ResultPoller,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        negotiator: Arc<dyn UploadNegotiator>,
        uploader: Arc<dyn DirectUploader>,
        status: Arc<dyn StatusClient>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            negotiator,
            uploader,
            poller: ResultPoller::new(status, config.degraded_after),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drives one run to a terminal stage and reports it to `observer`
    pub async fn run(
        &self,
        file: UploadFile,
        observer: Arc<dyn RunObserver>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let mut run = OrchestrationRun::new(file.request.clone(), cancel);
        let span = tracing::info_span!(
            "orchestration_run",
            run_id = %run.id(),
            file = %file.request.filename,
        );

        async move {
            tracing::info!(
                "🚀 Starting analysis run for {} ({} bytes)",
                file.request.filename,
                file.request.size
            );
            let result = self.drive(&mut run, &file, &observer).await;
            self.finish(&mut run, result, observer.as_ref())
        }
        .instrument(span)
        .await
    }

    /// Runs on a background task; the returned handle owns the cancel token
    pub fn spawn(self: &Arc<Self>, file: UploadFile, observer: Arc<dyn RunObserver>) -> RunHandle {
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { this.run(file, observer, token).await });
        RunHandle { cancel, join }
    }

    async fn drive(
        &self,
        run: &mut OrchestrationRun,
        file: &UploadFile,
        observer: &Arc<dyn RunObserver>,
    ) -> Result<AnalysisPayload, PipelineError> {
        let cancel = run.cancel_token().clone();
        ensure_active(&cancel)?;

        let filename = validation::validate_upload(
            &file.request.filename,
            file.request.content_type.as_deref(),
            file.request.size,
            self.config.max_file_size,
        )?;

        // 1. Negotiate
        run.advance(Stage::Negotiating)?;
        observer.on_stage(Some(StageIndicator::Negotiating));
        let content_type = file.request.content_type.as_deref().unwrap_or_default();
        let grant =
            cancellable(&cancel, self.negotiator.negotiate(&filename, content_type)).await?;
        tracing::info!("📝 Write grant issued for {}/{}", grant.bucket, grant.key);

        // 2. Upload
        ensure_active(&cancel)?;
        run.begin_upload(grant.clone())?;
        observer.on_stage(Some(StageIndicator::Uploading));
        observer.on_progress(UploadProgress::new(0, file.request.size));
        if grant.is_expired() {
            tracing::warn!("⏰ Write URL for {} may already have expired", grant.key);
        }

        let progress_observer = Arc::clone(observer);
        let on_progress: ProgressCallback =
            Arc::new(move |progress| progress_observer.on_progress(progress));
        self.uploader
            .upload(&grant, file, on_progress, &cancel)
            .await?;

        // A transfer that finished after cancel was requested still counts as cancelled
        ensure_active(&cancel)?;

        // 3. Poll
        let query = run.begin_polling()?.clone();
        observer.on_stage(Some(StageIndicator::Polling));
        tracing::info!("⏳ Waiting for {}/{}", query.bucket, query.result_key);

        let listener = ObserverListener(observer.as_ref());
        let envelope = self
            .poller
            .poll_with_listener(
                &query,
                self.config.poll_timeout,
                self.config.poll_interval,
                &cancel,
                &listener,
            )
            .await?;

        ensure_active(&cancel)?;
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    fn finish(
        &self,
        run: &mut OrchestrationRun,
        result: Result<AnalysisPayload, PipelineError>,
        observer: &dyn RunObserver,
    ) -> RunOutcome {
        let outcome = match result {
            _ if run.cancel_token().is_cancelled() => RunOutcome::Cancelled,
            Ok(payload) => RunOutcome::Succeeded(payload),
            Err(PipelineError::Cancelled) => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(e),
        };

        if let Err(e) = run.advance(outcome.stage()) {
            tracing::error!("Run {} could not reach terminal stage: {}", run.id(), e);
        }

        observer.on_stage(None);
        match &outcome {
            RunOutcome::Succeeded(payload) => {
                tracing::info!("🎉 Analysis result received");
                observer.on_result(payload);
            }
            RunOutcome::Failed(e) => {
                tracing::error!("❌ Run failed: {}", e);
                observer.on_error(&e.user_message());
            }
            RunOutcome::Cancelled => {
                tracing::info!("🛑 Run cancelled by user");
                observer.on_cancelled();
            }
        }
        outcome
    }
}

/// Handle to a run started with [`Orchestrator::spawn`]
pub struct RunHandle {
    cancel: CancellationToken,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn outcome(self) -> RunOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(PipelineError::Internal(e.to_string())),
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        res = fut => res,
    }
}
