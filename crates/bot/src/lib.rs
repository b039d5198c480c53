pub mod admin;
pub mod artifacts;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod session;
pub mod state;
pub mod storage;
pub mod tier;
pub mod transfer;
pub mod transport;
pub mod validate;

pub use config::BotConfig;
pub use engine::{MediaMerger, MergeEngine, MergeMode};
pub use error::{
    AdmissionError, EngineError, StateError, TaskError, TransferError, ValidationError,
};
pub use orchestrator::Orchestrator;
pub use session::{SessionStore, Stage};
pub use state::SharedState;
pub use storage::{FileRecord, Storage, UserProfile};
pub use tier::{Tier, TierLimits};
