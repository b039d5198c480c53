use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::engine::MergeMode;
use crate::error::StateError;

/// Position of a user's session within the upload-to-processing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Empty,
    VideoReceived,
    AudioReceived,
    ModeSelected,
    Processing,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Empty => "empty",
            Stage::VideoReceived => "video_received",
            Stage::AudioReceived => "audio_received",
            Stage::ModeSelected => "mode_selected",
            Stage::Processing => "processing",
        }
    }
}

/// Reference to an accepted upload, kept while the session is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_ref: String,
    pub size: u64,
}

/// One mutable session per user.
///
/// `audio` is only ever set after `video`, and `mode` only after both; the
/// transition table below is the sole writer.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub stage: Stage,
    pub video: Option<MediaRef>,
    pub audio: Option<MediaRef>,
    pub mode: Option<MergeMode>,
}

impl Session {
    fn new(user_id: i64) -> Self {
        Self {
            user_id,
            stage: Stage::Empty,
            video: None,
            audio: None,
            mode: None,
        }
    }
}

/// Events that drive a session forward.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Video(MediaRef),
    Audio(MediaRef),
    ModeChoice(MergeMode),
    Start,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Video(_) => "video",
            SessionEvent::Audio(_) => "audio",
            SessionEvent::ModeChoice(_) => "mode_choice",
            SessionEvent::Start => "start",
        }
    }
}

/// Keyed store of per-user sessions.
///
/// Transitions move strictly forward; the only exception is re-selecting the
/// merge mode while already in `ModeSelected`, so a task refused at admission
/// can be re-triggered. `clear` is the single way back to `Empty`.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<i64, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the user's session, if any.
    pub fn get(&self, user_id: i64) -> Option<Session> {
        self.lock().get(&user_id).cloned()
    }

    /// Current stage, `Empty` when no session exists yet.
    pub fn stage(&self, user_id: i64) -> Stage {
        self.lock()
            .get(&user_id)
            .map(|s| s.stage)
            .unwrap_or(Stage::Empty)
    }

    /// Apply an event. Out-of-order events are rejected without mutating the
    /// session. Returns the stage reached on success.
    pub fn transition(&self, user_id: i64, event: SessionEvent) -> Result<Stage, StateError> {
        let mut sessions = self.lock();
        let mut session = sessions
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Session::new(user_id));

        let rejected = StateError::InvalidTransition {
            stage: session.stage.name(),
            event: event.name(),
        };

        match (session.stage, event) {
            (Stage::Empty, SessionEvent::Video(media)) => {
                session.video = Some(media);
                session.stage = Stage::VideoReceived;
            }
            (Stage::VideoReceived, SessionEvent::Audio(media)) => {
                session.audio = Some(media);
                session.stage = Stage::AudioReceived;
            }
            (Stage::AudioReceived | Stage::ModeSelected, SessionEvent::ModeChoice(mode)) => {
                session.mode = Some(mode);
                session.stage = Stage::ModeSelected;
            }
            (Stage::ModeSelected, SessionEvent::Start) => {
                session.stage = Stage::Processing;
            }
            _ => return Err(rejected),
        }

        let stage = session.stage;
        sessions.insert(user_id, session);
        Ok(stage)
    }

    /// Reset the user back to `Empty`. Invoked on every pipeline exit and on
    /// explicit abandonment.
    pub fn clear(&self, user_id: i64) {
        self.lock().remove(&user_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Session>> {
        self.inner.lock().expect("session store lock poisoned")
    }
}
