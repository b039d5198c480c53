use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transport::{MessageRef, Messenger};

/// One observation from a transfer: bytes landed so far out of the expected
/// total for the labelled stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub label: &'static str,
    pub current: u64,
    pub total: u64,
}

/// Sending half handed to transfer implementations. One reporter per stage,
/// all feeding the same channel.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    label: &'static str,
    total: u64,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(label: &'static str, total: u64, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self { label, total, tx }
    }

    /// Report bytes transferred so far. Never blocks; a closed channel is
    /// silently ignored.
    pub fn report(&self, current: u64) {
        let _ = self.tx.send(ProgressUpdate {
            label: self.label,
            current,
            total: self.total,
        });
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Consume progress updates and rewrite a single status message with the
/// derived percentage. Ends when every sender is dropped.
///
/// Consecutive identical percentages are skipped; the transport rejects
/// edits that do not change the text. No other rate limiting is applied.
pub fn spawn_status_updater(
    messenger: Arc<dyn Messenger>,
    status: MessageRef,
    mut rx: mpsc::UnboundedReceiver<ProgressUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<(&'static str, u64)> = None;
        while let Some(update) = rx.recv().await {
            if update.total == 0 {
                continue;
            }
            let percent = update.current.min(update.total) * 100 / update.total;
            if last == Some((update.label, percent)) {
                continue;
            }
            last = Some((update.label, percent));
            let text = format!("{} {}%", update.label, percent);
            if let Err(e) = messenger.edit_text(status, &text).await {
                debug!("Progress edit failed: {e:#}");
            }
        }
    })
}
