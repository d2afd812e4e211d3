use analysis_uploader::handlers::{ChannelObserver, RunEvent};
use analysis_uploader::models::{
    ResultQuery, StageIndicator, UploadFile, UploadProgress, WriteGrant,
};
use analysis_uploader::services::negotiator::UploadNegotiator;
use analysis_uploader::services::poller::StatusClient;
use analysis_uploader::services::uploader::{DirectUploader, ProgressCallback};
use analysis_uploader::{Orchestrator, PipelineConfig, PipelineError, RunOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use url::Url;

struct MockNegotiator {
    fail_with: Option<u16>,
    calls: AtomicU32,
    seen: Mutex<Vec<(String, String)>>,
}

impl MockNegotiator {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail_with: None,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(status),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl UploadNegotiator for MockNegotiator {
    async fn negotiate(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<WriteGrant, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((filename.to_string(), content_type.to_string()));

        if let Some(status) = self.fail_with {
            return Err(PipelineError::NegotiationFailed {
                status: Some(status),
                body: "presign lambda error".to_string(),
            });
        }

        Ok(WriteGrant::new(
            "b1".to_string(),
            "u/123.csv".to_string(),
            Url::parse("https://storage.example.com/b1/u/123.csv?sig=abc").unwrap(),
            Some(Duration::from_secs(900)),
        ))
    }
}

enum UploadBehavior {
    Succeed,
    Reject(u16),
    CancelThenSucceed,
}

struct MockUploader {
    behavior: UploadBehavior,
    calls: AtomicU32,
}

impl MockUploader {
    fn new(behavior: UploadBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl DirectUploader for MockUploader {
    async fn upload(
        &self,
        _grant: &WriteGrant,
        file: &UploadFile,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total = file.body.len() as u64;
        on_progress(UploadProgress::new(total / 2, total));

        match self.behavior {
            UploadBehavior::Succeed => {
                on_progress(UploadProgress::new(total, total));
                Ok(())
            }
            UploadBehavior::Reject(status) => Err(PipelineError::UploadFailed {
                status,
                body: "AccessDenied".to_string(),
            }),
            UploadBehavior::CancelThenSucceed => {
                // The user hits cancel just as the last byte lands
                cancel.cancel();
                on_progress(UploadProgress::new(total, total));
                Ok(())
            }
        }
    }
}

struct ScriptedStatus {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    queries: Mutex<Vec<ResultQuery>>,
}

impl ScriptedStatus {
    fn new(responses: &[&str], fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            fallback: fallback.to_string(),
            queries: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl StatusClient for ScriptedStatus {
    async fn fetch_status(&self, query: &ResultQuery) -> Result<String, PipelineError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

const NOT_READY: &str = r#"{"ready": false}"#;

fn test_config() -> PipelineConfig {
    PipelineConfig {
        poll_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_secs(3),
        ..PipelineConfig::default()
    }
}

fn ten_kb_file() -> UploadFile {
    UploadFile::new("ledger.csv", None, Bytes::from(vec![b'7'; 10 * 1024]))
}

fn drain(rx: &mut UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn stages(events: &[RunEvent]) -> Vec<Option<StageIndicator>> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Stage { stage } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn final_events(events: &[RunEvent]) -> Vec<&RunEvent> {
    events.iter().filter(|e| e.is_final()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_success() {
    let negotiator = MockNegotiator::ok();
    let uploader = MockUploader::new(UploadBehavior::Succeed);
    let status = ScriptedStatus::new(
        &[NOT_READY, NOT_READY],
        r#"{"ready": true, "result": {"total": 42}}"#,
    );
    let orchestrator = Orchestrator::new(
        negotiator.clone(),
        uploader.clone(),
        status.clone(),
        test_config(),
    );
    let (observer, mut rx) = ChannelObserver::channel();

    let outcome = orchestrator
        .run(ten_kb_file(), Arc::new(observer), CancellationToken::new())
        .await;

    match outcome {
        RunOutcome::Succeeded(payload) => assert_eq!(payload, json!({"total": 42})),
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(status.calls(), 3);
    assert_eq!(
        status.queries.lock().unwrap()[0],
        ResultQuery {
            bucket: "b1".to_string(),
            result_key: "results/u/123.csv-analysis.json".to_string(),
        }
    );
    assert_eq!(
        negotiator.seen.lock().unwrap()[0],
        ("ledger.csv".to_string(), "text/csv".to_string())
    );

    let events = drain(&mut rx);
    assert_eq!(
        stages(&events),
        vec![
            Some(StageIndicator::Negotiating),
            Some(StageIndicator::Uploading),
            Some(StageIndicator::Polling),
            None,
        ]
    );
    assert_eq!(
        final_events(&events),
        vec![&RunEvent::Result {
            payload: json!({"total": 42})
        }]
    );

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![0, 50, 100]);

    let attempts = events
        .iter()
        .filter(|e| matches!(e, RunEvent::PollAttempt { .. }))
        .count();
    assert_eq!(attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_failure_stops_the_run() {
    let uploader = MockUploader::new(UploadBehavior::Succeed);
    let status = ScriptedStatus::new(&[], NOT_READY);
    let orchestrator = Orchestrator::new(
        MockNegotiator::failing(502),
        uploader.clone(),
        status.clone(),
        test_config(),
    );
    let (observer, mut rx) = ChannelObserver::channel();

    let outcome = orchestrator
        .run(ten_kb_file(), Arc::new(observer), CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(PipelineError::NegotiationFailed {
            status: Some(502),
            ..
        })
    ));
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(status.calls(), 0);

    let events = drain(&mut rx);
    assert_eq!(
        final_events(&events),
        vec![&RunEvent::Error {
            message: "Presign request failed: 502 presign lambda error".to_string()
        }]
    );
    assert_eq!(stages(&events).last(), Some(&None));
}

#[tokio::test(start_paused = true)]
async fn test_upload_rejection_fails_the_run() {
    let status = ScriptedStatus::new(&[], NOT_READY);
    let orchestrator = Orchestrator::new(
        MockNegotiator::ok(),
        MockUploader::new(UploadBehavior::Reject(403)),
        status.clone(),
        test_config(),
    );
    let (observer, mut rx) = ChannelObserver::channel();

    let outcome = orchestrator
        .run(ten_kb_file(), Arc::new(observer), CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(PipelineError::UploadFailed { status: 403, .. })
    ));
    assert_eq!(status.calls(), 0);
    assert_eq!(
        final_events(&drain(&mut rx)),
        vec![&RunEvent::Error {
            message: "S3 upload failed: 403 AccessDenied".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_upload_wins_over_success() {
    let status = ScriptedStatus::new(&[], r#"{"ready": true, "result": {}}"#);
    let orchestrator = Orchestrator::new(
        MockNegotiator::ok(),
        MockUploader::new(UploadBehavior::CancelThenSucceed),
        status.clone(),
        test_config(),
    );
    let (observer, mut rx) = ChannelObserver::channel();

    let outcome = orchestrator
        .run(ten_kb_file(), Arc::new(observer), CancellationToken::new())
        .await;

    assert!(matches!(outcome, RunOutcome::Cancelled));
    assert_eq!(status.calls(), 0);

    let events = drain(&mut rx);
    assert_eq!(final_events(&events), vec![&RunEvent::Cancelled]);
    assert!(!stages(&events).contains(&Some(StageIndicator::Polling)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_polling() {
    let status = ScriptedStatus::new(&[], NOT_READY);
    let orchestrator = Arc::new(Orchestrator::new(
        MockNegotiator::ok(),
        MockUploader::new(UploadBehavior::Succeed),
        status.clone(),
        test_config(),
    ));
    let (observer, mut rx) = ChannelObserver::channel();

    let handle = orchestrator.spawn(ten_kb_file(), Arc::new(observer));
    loop {
        match rx.recv().await {
            Some(RunEvent::PollAttempt { attempt: 2, .. }) => break,
            Some(_) => continue,
            None => panic!("run ended before polling"),
        }
    }
    handle.cancel();

    assert!(matches!(handle.outcome().await, RunOutcome::Cancelled));
    assert_eq!(status.calls(), 2);
    assert_eq!(final_events(&drain(&mut rx)), vec![&RunEvent::Cancelled]);
}

#[tokio::test(start_paused = true)]
async fn test_polling_timeout_fails_the_run() {
    let status = ScriptedStatus::new(&[], NOT_READY);
    let config = PipelineConfig {
        poll_timeout: Duration::from_millis(1000),
        poll_interval: Duration::from_millis(2000),
        ..PipelineConfig::default()
    };
    let orchestrator = Orchestrator::new(
        MockNegotiator::ok(),
        MockUploader::new(UploadBehavior::Succeed),
        status.clone(),
        config,
    );
    let (observer, mut rx) = ChannelObserver::channel();

    let outcome = orchestrator
        .run(ten_kb_file(), Arc::new(observer), CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(PipelineError::Timeout { attempts: 1, .. })
    ));
    assert_eq!(status.calls(), 1);
    assert_eq!(
        final_events(&drain(&mut rx)),
        vec![&RunEvent::Error {
            message: "Result not ready in time".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_file_is_rejected_before_negotiation() {
    let negotiator = MockNegotiator::ok();
    let orchestrator = Orchestrator::new(
        negotiator.clone(),
        MockUploader::new(UploadBehavior::Succeed),
        ScriptedStatus::new(&[], NOT_READY),
        test_config(),
    );
    let (observer, mut rx) = ChannelObserver::channel();

    let outcome = orchestrator
        .run(
            UploadFile::new("empty.csv", None, Bytes::new()),
            Arc::new(observer),
            CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(PipelineError::InvalidFile(_))
    ));
    assert_eq!(negotiator.calls.load(Ordering::SeqCst), 0);

    let events = drain(&mut rx);
    assert_eq!(stages(&events), vec![None]);
    match final_events(&events).as_slice() {
        [RunEvent::Error { message }] => assert!(message.contains("EMPTY_FILE")),
        other => panic!("unexpected final events: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_pre_cancelled_token_does_nothing() {
    let negotiator = MockNegotiator::ok();
    let orchestrator = Orchestrator::new(
        negotiator.clone(),
        MockUploader::new(UploadBehavior::Succeed),
        ScriptedStatus::new(&[], NOT_READY),
        test_config(),
    );
    let (observer, mut rx) = ChannelObserver::channel();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = orchestrator
        .run(ten_kb_file(), Arc::new(observer), cancel)
        .await;

    assert!(matches!(outcome, RunOutcome::Cancelled));
    assert_eq!(negotiator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(final_events(&drain(&mut rx)), vec![&RunEvent::Cancelled]);
}

#[tokio::test(start_paused = true)]
async fn test_sanitized_filename_is_negotiated() {
    let negotiator = MockNegotiator::ok();
    let orchestrator = Orchestrator::new(
        negotiator.clone(),
        MockUploader::new(UploadBehavior::Succeed),
        ScriptedStatus::new(&[], r#"{"ready": true}"#),
        test_config(),
    );
    let (observer, _rx) = ChannelObserver::channel();

    let outcome = orchestrator
        .run(
            UploadFile::new(
                "../exports/q3|final.bin",
                None,
                Bytes::from_static(b"\x01\x02\x03"),
            ),
            Arc::new(observer),
            CancellationToken::new(),
        )
        .await;

    // A ready envelope without a result still succeeds, with a null payload
    assert!(matches!(outcome, RunOutcome::Succeeded(serde_json::Value::Null)));
    assert_eq!(
        negotiator.seen.lock().unwrap()[0],
        ("q3_final.bin".to_string(), String::new())
    );
}
