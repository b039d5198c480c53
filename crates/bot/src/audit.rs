use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use uuid::Uuid;

use crate::engine::MergeMode;
use crate::tier::Tier;
use crate::transport::Messenger;

/// Outcome of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { output_size: u64 },
    Failed { reason: String },
}

/// One structured record per completed or failed merge task.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub task_id: Uuid,
    pub user_id: i64,
    pub tier: Tier,
    pub mode: MergeMode,
    pub video_size: u64,
    pub audio_size: u64,
    pub outcome: TaskOutcome,
    pub finished_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn render(&self) -> String {
        match &self.outcome {
            TaskOutcome::Success { output_size } => format!(
                "Task: {}\nUser: {}\nTier: {}\nVideo size: {}\nAudio size: {}\nMode: {}\nFinal size: {}\nStatus: Success",
                self.task_id,
                self.user_id,
                self.tier.as_str(),
                self.video_size,
                self.audio_size,
                self.mode.as_str(),
                output_size,
            ),
            TaskOutcome::Failed { reason } => format!(
                "Task: {}\nUser: {}\nTier: {}\nVideo size: {}\nAudio size: {}\nMode: {}\nStatus: Failed - {}",
                self.task_id,
                self.user_id,
                self.tier.as_str(),
                self.video_size,
                self.audio_size,
                self.mode.as_str(),
                reason,
            ),
        }
    }
}

/// Emits audit records to the operator channel, best-effort. A delivery
/// failure is logged and never propagated into the pipeline.
pub struct AuditSink {
    messenger: Arc<dyn Messenger>,
    channel_id: i64,
}

impl AuditSink {
    pub fn new(messenger: Arc<dyn Messenger>, channel_id: i64) -> Self {
        Self {
            messenger,
            channel_id,
        }
    }

    pub async fn emit(&self, record: &AuditRecord) {
        match &record.outcome {
            TaskOutcome::Success { output_size } => info!(
                "Task {}: user {} merged {} ({} bytes out)",
                record.task_id,
                record.user_id,
                record.mode.as_str(),
                output_size
            ),
            TaskOutcome::Failed { reason } => warn!(
                "Task {}: user {} failed: {}",
                record.task_id, record.user_id, reason
            ),
        }

        if let Err(e) = self
            .messenger
            .send_text(self.channel_id, &record.render())
            .await
        {
            warn!("Failed to deliver audit record {}: {e:#}", record.task_id);
        }
    }
}
