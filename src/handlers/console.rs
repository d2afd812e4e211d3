use crate::models::{AnalysisPayload, StageIndicator, UploadProgress};
use crate::services::orchestrator::RunObserver;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{error, info, warn};

/// Percent step between logged progress lines
const PROGRESS_LOG_STEP: u8 = 10;

/// Reports a run through the log, for the terminal shell
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    last_logged_percent: AtomicU8,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn stage_message(stage: StageIndicator) -> &'static str {
    match stage {
        StageIndicator::Negotiating => "Preparing upload...",
        StageIndicator::Uploading => "Uploading...",
        StageIndicator::Polling => "Processing on cloud, waiting for results...",
    }
}

impl RunObserver for ConsoleObserver {
    fn on_stage(&self, stage: Option<StageIndicator>) {
        if let Some(stage) = stage {
            if stage == StageIndicator::Uploading {
                self.last_logged_percent.store(0, Ordering::Relaxed);
            }
            info!("📍 {}", stage_message(stage));
        }
    }

    fn on_progress(&self, progress: UploadProgress) {
        let last = self.last_logged_percent.load(Ordering::Relaxed);
        let due = progress.percent >= last.saturating_add(PROGRESS_LOG_STEP)
            || (progress.percent == 100 && last < 100);
        if due {
            self.last_logged_percent
                .store(progress.percent, Ordering::Relaxed);
            info!(
                "📤 Uploading... {}% ({}/{} bytes)",
                progress.percent, progress.bytes_sent, progress.bytes_total
            );
        }
    }

    fn on_result(&self, payload: &AnalysisPayload) {
        let kind = match payload {
            serde_json::Value::Object(map) => format!("object with {} fields", map.len()),
            serde_json::Value::Array(items) => format!("array with {} items", items.len()),
            other => format!("{}", other),
        };
        info!("✅ Analysis complete: {}", kind);
    }

    fn on_error(&self, message: &str) {
        error!("❌ Error: {}", message);
    }

    fn on_cancelled(&self) {
        warn!("🛑 Cancelled by user");
    }

    fn on_poll_attempt(&self, attempt: u32, at: DateTime<Utc>) {
        info!("🔄 Last poll: {} (attempt #{})", at.format("%H:%M:%S"), attempt);
    }

    fn on_degraded(&self, consecutive_failures: u32) {
        warn!(
            "🩺 Status endpoint has failed {} times in a row, still retrying",
            consecutive_failures
        );
    }
}
