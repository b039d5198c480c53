use humansize::{format_size, BINARY};
use thiserror::Error;

fn human(bytes: &u64) -> String {
    format_size(*bytes, BINARY)
}

/// Rejection reasons from the upload validation gate.
///
/// Checks short-circuit in order, so a file can only be rejected for the
/// first rule it breaks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("File too large: {} > {}", human(.size), human(.limit))]
    SizeExceeded { size: u64, limit: u64 },
    #[error("MIME type mismatch: expected {declared}, got {inferred}")]
    MimeMismatch { declared: String, inferred: String },
}

/// Session or concurrency violations surfaced at the handler boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The event is not legal in the session's current stage. The session is
    /// left untouched.
    #[error("Invalid state.")]
    InvalidTransition {
        stage: &'static str,
        event: &'static str,
    },
    /// The user already holds an active-task slot.
    #[error("Already processing a request.")]
    DuplicateTask,
}

/// Transfer stage failures. `detail` is the collapsed cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Download failed ({what}): {detail}")]
    DownloadFailed { what: &'static str, detail: String },
    #[error("Upload failed: {detail}")]
    UploadFailed { detail: String },
}

/// The external media tool failed. Carries its diagnostic output verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{diagnostic}")]
pub struct EngineError {
    pub diagnostic: String,
}

/// Pre-flight refusals issued before the pipeline does any work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Insufficient disk space: {} free, {} required.", human(.available), human(.required))]
    InsufficientStorage { available: u64, required: u64 },
    #[error("Bot is under maintenance. Try again later.")]
    MaintenanceMode,
}

/// Union of everything that can stop a pipeline once it has been triggered.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("Merging failed: {0}")]
    Engine(#[from] EngineError),
}
