use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::time::timeout;

use crate::error::TransferError;
use crate::progress::ProgressReporter;
use crate::transport::RemoteFiles;

/// Fetches remote inputs to local disk and delivers the output back, both
/// bounded by the configured transfer timeout.
pub struct TransferPipeline {
    files: Arc<dyn RemoteFiles>,
    timeout: Duration,
}

impl TransferPipeline {
    pub fn new(files: Arc<dyn RemoteFiles>, timeout_secs: u64) -> Self {
        Self {
            files,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Fetch `file_ref` into `dest`. `what` names the artifact ("video",
    /// "audio") in failure messages.
    pub async fn download(
        &self,
        file_ref: &str,
        dest: &Path,
        what: &'static str,
        progress: &ProgressReporter,
    ) -> Result<(), TransferError> {
        debug!("Downloading {what} {file_ref} -> {}", dest.display());
        match timeout(self.timeout, self.files.fetch(file_ref, dest, progress)).await {
            Ok(Ok(())) => {
                info!("Downloaded {what} to {}", dest.display());
                Ok(())
            }
            Ok(Err(e)) => Err(TransferError::DownloadFailed {
                what,
                detail: format!("{e:#}"),
            }),
            Err(_) => Err(TransferError::DownloadFailed {
                what,
                detail: format!("timed out after {} seconds", self.timeout.as_secs()),
            }),
        }
    }

    /// Deliver the merged output back to the user. Returns the remote
    /// reference of the delivered file.
    pub async fn upload(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        progress: &ProgressReporter,
    ) -> Result<String, TransferError> {
        debug!("Uploading {} to chat {chat_id}", path.display());
        match timeout(
            self.timeout,
            self.files.deliver(chat_id, path, caption, progress),
        )
        .await
        {
            Ok(Ok(file_ref)) => {
                info!("Uploaded {} to chat {chat_id}", path.display());
                Ok(file_ref)
            }
            Ok(Err(e)) => Err(TransferError::UploadFailed {
                detail: format!("{e:#}"),
            }),
            Err(_) => Err(TransferError::UploadFailed {
                detail: format!("timed out after {} seconds", self.timeout.as_secs()),
            }),
        }
    }
}
