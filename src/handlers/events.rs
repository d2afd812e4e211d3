use crate::models::{AnalysisPayload, StageIndicator, UploadProgress};
use crate::services::orchestrator::RunObserver;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Everything a run reports, as a single event stream for UI subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Stage { stage: Option<StageIndicator> },
    Progress(UploadProgress),
    PollAttempt { attempt: u32, at: DateTime<Utc> },
    Degraded { consecutive_failures: u32 },
    Result { payload: AnalysisPayload },
    Error { message: String },
    Cancelled,
}

impl RunEvent {
    /// True for the event that closes a run
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            RunEvent::Result { .. } | RunEvent::Error { .. } | RunEvent::Cancelled
        )
    }
}

/// Forwards run callbacks into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<RunEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, UnboundedReceiver<RunEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: RunEvent) {
        // A closed receiver means nobody is watching anymore
        let _ = self.tx.send(event);
    }
}

impl RunObserver for ChannelObserver {
    fn on_stage(&self, stage: Option<StageIndicator>) {
        self.emit(RunEvent::Stage { stage });
    }

    fn on_progress(&self, progress: UploadProgress) {
        self.emit(RunEvent::Progress(progress));
    }

    fn on_result(&self, payload: &AnalysisPayload) {
        self.emit(RunEvent::Result {
            payload: payload.clone(),
        });
    }

    fn on_error(&self, message: &str) {
        self.emit(RunEvent::Error {
            message: message.to_string(),
        });
    }

    fn on_cancelled(&self) {
        self.emit(RunEvent::Cancelled);
    }

    fn on_poll_attempt(&self, attempt: u32, at: DateTime<Utc>) {
        self.emit(RunEvent::PollAttempt { attempt, at });
    }

    fn on_degraded(&self, consecutive_failures: u32) {
        self.emit(RunEvent::Degraded {
            consecutive_failures,
        });
    }
}
