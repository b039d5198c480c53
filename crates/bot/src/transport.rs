use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::progress::ProgressReporter;

/// Handle to a sent message that can be edited in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Outbound messaging surface of the remote transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef>;

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;

    /// Present the merge-mode choice to the user and return the prompt
    /// message so it can later be edited into a status line.
    async fn prompt_mode_choice(&self, chat_id: i64) -> Result<MessageRef>;
}

/// File plane of the remote transport.
#[async_trait]
pub trait RemoteFiles: Send + Sync {
    /// Stream a remote file to `dest`, reporting byte counts as they land.
    async fn fetch(&self, file_ref: &str, dest: &Path, progress: &ProgressReporter) -> Result<()>;

    /// Send a local file to `chat_id` as a video with `caption`, reporting
    /// bytes as they leave. Returns the remote reference of the delivered
    /// file.
    async fn deliver(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        progress: &ProgressReporter,
    ) -> Result<String>;
}

/// Validates an opaque premium credential by performing a throwaway
/// handshake against the remote service.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Returns the display name of the account behind the credential.
    async fn validate(&self, credential: &str) -> Result<String>;
}
