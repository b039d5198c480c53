use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::info;

use crate::config::BotConfig;
use crate::engine::MergeMode;
use crate::orchestrator::Orchestrator;
use crate::session::{MediaRef, SessionEvent, Stage};
use crate::state::SharedState;
use crate::storage::{FileRecord, Storage};
use crate::tier::resolve_tier;
use crate::transport::{MessageRef, Messenger};
use crate::validate::{sanitize_file_name, validate};

/// Inbound media attachment as reported by the transport.
#[derive(Debug, Clone)]
pub struct IncomingMedia {
    pub file_ref: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
}

/// Boundary layer between the transport and the session machinery.
///
/// Validation and state errors are handled here and reported to the user;
/// they never reach the orchestrator's pipeline.
pub struct Intake {
    cfg: Arc<BotConfig>,
    state: Arc<SharedState>,
    storage: Arc<Storage>,
    messenger: Arc<dyn Messenger>,
    orchestrator: Arc<Orchestrator>,
}

impl Intake {
    pub fn new(
        cfg: Arc<BotConfig>,
        state: Arc<SharedState>,
        storage: Arc<Storage>,
        messenger: Arc<dyn Messenger>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            cfg,
            state,
            storage,
            messenger,
            orchestrator,
        }
    }

    /// A video arrived: gate it, record it, advance the session.
    pub async fn on_video(
        &self,
        user_id: i64,
        username: Option<&str>,
        media: IncomingMedia,
    ) -> Result<()> {
        self.storage.ensure_user(user_id, username).await?;
        let limits = resolve_tier(&self.storage, &self.cfg, user_id).await?;

        let file_name = sanitize_file_name(&media.file_name);
        if let Err(e) = validate(
            &file_name,
            media.file_size,
            media.mime_type.as_deref(),
            &self.cfg.video_formats,
            limits.video_limit,
        ) {
            self.messenger.send_text(user_id, &e.to_string()).await?;
            return Ok(());
        }

        match self.state.sessions.transition(
            user_id,
            SessionEvent::Video(MediaRef {
                file_ref: media.file_ref.clone(),
                size: media.file_size,
            }),
        ) {
            Ok(_) => {
                self.storage
                    .insert_file(&FileRecord {
                        user_id,
                        file_ref: media.file_ref,
                        file_type: "video".to_string(),
                        file_size: media.file_size,
                        timestamp: Utc::now(),
                    })
                    .await?;
                info!("User {user_id}: video accepted ({} bytes)", media.file_size);
                self.messenger
                    .send_text(user_id, "Video received. Now send the audio file.")
                    .await?;
            }
            Err(e) => {
                self.messenger.send_text(user_id, &e.to_string()).await?;
            }
        }
        Ok(())
    }

    /// An audio file arrived: requires a video first, then the same gate.
    pub async fn on_audio(
        &self,
        user_id: i64,
        username: Option<&str>,
        media: IncomingMedia,
    ) -> Result<()> {
        if self.state.sessions.stage(user_id) != Stage::VideoReceived {
            self.messenger
                .send_text(user_id, "Please send a video first.")
                .await?;
            return Ok(());
        }

        self.storage.ensure_user(user_id, username).await?;
        let limits = resolve_tier(&self.storage, &self.cfg, user_id).await?;

        let file_name = sanitize_file_name(&media.file_name);
        if let Err(e) = validate(
            &file_name,
            media.file_size,
            media.mime_type.as_deref(),
            &self.cfg.audio_formats,
            limits.audio_limit,
        ) {
            self.messenger.send_text(user_id, &e.to_string()).await?;
            return Ok(());
        }

        match self.state.sessions.transition(
            user_id,
            SessionEvent::Audio(MediaRef {
                file_ref: media.file_ref.clone(),
                size: media.file_size,
            }),
        ) {
            Ok(_) => {
                self.storage
                    .insert_file(&FileRecord {
                        user_id,
                        file_ref: media.file_ref,
                        file_type: "audio".to_string(),
                        file_size: media.file_size,
                        timestamp: Utc::now(),
                    })
                    .await?;
                info!("User {user_id}: audio accepted ({} bytes)", media.file_size);
                self.messenger.prompt_mode_choice(user_id).await?;
            }
            Err(e) => {
                self.messenger.send_text(user_id, &e.to_string()).await?;
            }
        }
        Ok(())
    }

    /// The user picked a merge mode: advance the session and launch the
    /// pipeline in the background. `prompt` is the keyboard message, reused
    /// as the status line when it can be edited.
    pub async fn on_mode_choice(
        &self,
        user_id: i64,
        mode: MergeMode,
        prompt: Option<MessageRef>,
    ) -> Result<()> {
        if self.state.active.is_active(user_id) {
            self.messenger
                .send_text(user_id, "Already processing a request.")
                .await?;
            return Ok(());
        }

        if let Err(e) = self
            .state
            .sessions
            .transition(user_id, SessionEvent::ModeChoice(mode))
        {
            self.messenger.send_text(user_id, &e.to_string()).await?;
            return Ok(());
        }

        let status = match prompt {
            Some(msg) => {
                if self
                    .messenger
                    .edit_text(msg, "Starting merge process...")
                    .await
                    .is_ok()
                {
                    msg
                } else {
                    self.messenger
                        .send_text(user_id, "Starting merge process...")
                        .await?
                }
            }
            None => {
                self.messenger
                    .send_text(user_id, "Starting merge process...")
                    .await?
            }
        };

        info!(
            "User {user_id}: mode {} selected, launching pipeline",
            mode.as_str()
        );
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.run(user_id, status).await;
        });
        Ok(())
    }

    /// Explicit abandonment: reset the session unless a task is running.
    pub async fn on_cancel(&self, user_id: i64) -> Result<()> {
        if self.state.active.is_active(user_id) {
            self.messenger
                .send_text(user_id, "A merge is already running and cannot be cancelled.")
                .await?;
            return Ok(());
        }
        self.state.sessions.clear(user_id);
        self.messenger
            .send_text(user_id, "Session cleared. Send a video to start over.")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::audit::AuditSink;
    use crate::engine::{MediaMerger, MergeMode};
    use crate::error::EngineError;
    use crate::progress::ProgressReporter;
    use crate::storage::tests::test_storage;
    use crate::storage::UserProfile;
    use crate::transfer::TransferPipeline;
    use crate::transport::RemoteFiles;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<(i64, String)>>,
        prompts: Mutex<Vec<i64>>,
    }

    impl FakeMessenger {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: sent.len() as i64,
            })
        }

        async fn edit_text(&self, _msg: MessageRef, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn prompt_mode_choice(&self, chat_id: i64) -> Result<MessageRef> {
            self.prompts.lock().unwrap().push(chat_id);
            Ok(MessageRef {
                chat_id,
                message_id: 0,
            })
        }
    }

    struct NullFiles;

    #[async_trait]
    impl RemoteFiles for NullFiles {
        async fn fetch(
            &self,
            _file_ref: &str,
            _dest: &std::path::Path,
            _progress: &ProgressReporter,
        ) -> Result<()> {
            Ok(())
        }

        async fn deliver(
            &self,
            _chat_id: i64,
            _path: &std::path::Path,
            _caption: &str,
            _progress: &ProgressReporter,
        ) -> Result<String> {
            Ok(String::new())
        }
    }

    struct NullEngine;

    #[async_trait]
    impl MediaMerger for NullEngine {
        async fn merge(
            &self,
            _video: &std::path::Path,
            _audio: &std::path::Path,
            _output: &std::path::Path,
            _mode: MergeMode,
        ) -> Result<(), EngineError> {
            Err(EngineError {
                diagnostic: "not under test".to_string(),
            })
        }
    }

    struct Fixture {
        intake: Intake,
        state: Arc<SharedState>,
        storage: Arc<Storage>,
        messenger: Arc<FakeMessenger>,
    }

    async fn fixture() -> Fixture {
        let mut cfg = BotConfig::default();
        cfg.temp_dir = std::env::temp_dir().join(format!("muxbot-intake-{}", Uuid::new_v4()));
        let cfg = Arc::new(cfg);
        let state = SharedState::new();
        let storage = Arc::new(test_storage().await);
        let messenger = Arc::new(FakeMessenger::default());
        let orchestrator = Arc::new(Orchestrator::new(
            cfg.clone(),
            state.clone(),
            storage.clone(),
            Arc::new(NullEngine),
            TransferPipeline::new(Arc::new(NullFiles), 60),
            messenger.clone(),
            AuditSink::new(messenger.clone(), -100),
        ));
        let intake = Intake::new(
            cfg,
            state.clone(),
            storage.clone(),
            messenger.clone(),
            orchestrator,
        );
        Fixture {
            intake,
            state,
            storage,
            messenger,
        }
    }

    fn video(size: u64) -> IncomingMedia {
        IncomingMedia {
            file_ref: "video-ref".to_string(),
            file_name: "clip.mp4".to_string(),
            file_size: size,
            mime_type: Some("video/mp4".to_string()),
        }
    }

    fn audio(size: u64) -> IncomingMedia {
        IncomingMedia {
            file_ref: "audio-ref".to_string(),
            file_name: "track.mp3".to_string(),
            file_size: size,
            mime_type: Some("audio/mpeg".to_string()),
        }
    }

    #[tokio::test]
    async fn accepted_video_advances_session_and_records_file() {
        let fx = fixture().await;
        fx.intake.on_video(1, Some("alice"), video(500)).await.unwrap();

        assert_eq!(fx.state.sessions.stage(1), Stage::VideoReceived);
        assert_eq!(fx.storage.count_files().await.unwrap(), 1);
        assert!(fx
            .messenger
            .texts()
            .contains(&"Video received. Now send the audio file.".to_string()));
        // first contact created a profile row
        assert!(fx.storage.get_user(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_video_is_rejected_without_session_mutation() {
        let fx = fixture().await;
        let too_big = 3 * 1024 * 1024 * 1024; // over the 2 GiB normal limit
        fx.intake.on_video(1, None, video(too_big)).await.unwrap();

        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
        assert_eq!(fx.storage.count_files().await.unwrap(), 0);
        assert!(fx
            .messenger
            .texts()
            .iter()
            .any(|t| t.starts_with("File too large")));
    }

    #[tokio::test]
    async fn premium_user_gets_the_higher_limit() {
        let fx = fixture().await;
        let mut user = UserProfile::new(1, None);
        user.premium = true;
        fx.storage.upsert_user(&user).await.unwrap();

        let three_gib = 3 * 1024 * 1024 * 1024;
        fx.intake.on_video(1, None, video(three_gib)).await.unwrap();
        assert_eq!(fx.state.sessions.stage(1), Stage::VideoReceived);
    }

    #[tokio::test]
    async fn audio_without_video_is_turned_away() {
        let fx = fixture().await;
        fx.intake.on_audio(1, None, audio(100)).await.unwrap();

        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
        assert!(fx
            .messenger
            .texts()
            .contains(&"Please send a video first.".to_string()));
        // nothing recorded for a refused upload
        assert_eq!(fx.storage.count_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn accepted_audio_prompts_for_the_mode() {
        let fx = fixture().await;
        fx.intake.on_video(1, None, video(100)).await.unwrap();
        fx.intake.on_audio(1, None, audio(50)).await.unwrap();

        assert_eq!(fx.state.sessions.stage(1), Stage::AudioReceived);
        assert_eq!(*fx.messenger.prompts.lock().unwrap(), vec![1]);
        assert_eq!(fx.storage.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn oversized_audio_leaves_session_at_video_received() {
        let fx = fixture().await;
        fx.intake.on_video(1, None, video(100)).await.unwrap();
        let over = 2 * 1024 * 1024 * 1024; // over the 1 GiB normal audio limit
        fx.intake.on_audio(1, None, audio(over)).await.unwrap();

        assert_eq!(fx.state.sessions.stage(1), Stage::VideoReceived);
        assert!(fx
            .messenger
            .texts()
            .iter()
            .any(|t| t.starts_with("File too large")));
    }

    #[tokio::test]
    async fn mode_choice_before_audio_is_invalid() {
        let fx = fixture().await;
        fx.intake.on_video(1, None, video(100)).await.unwrap();
        fx.intake
            .on_mode_choice(1, MergeMode::Replace, None)
            .await
            .unwrap();

        assert!(fx.messenger.texts().contains(&"Invalid state.".to_string()));
        assert_eq!(fx.state.sessions.stage(1), Stage::VideoReceived);
    }

    #[tokio::test]
    async fn mode_choice_while_active_is_rejected_up_front() {
        let fx = fixture().await;
        fx.intake.on_video(1, None, video(100)).await.unwrap();
        fx.intake.on_audio(1, None, audio(50)).await.unwrap();

        let _slot = fx.state.active.try_acquire(1).unwrap();
        fx.intake
            .on_mode_choice(1, MergeMode::Mix, None)
            .await
            .unwrap();

        assert!(fx
            .messenger
            .texts()
            .contains(&"Already processing a request.".to_string()));
        // the running task's session was not advanced
        assert_eq!(fx.state.sessions.stage(1), Stage::AudioReceived);
    }

    #[tokio::test]
    async fn cancel_resets_an_idle_session() {
        let fx = fixture().await;
        fx.intake.on_video(1, None, video(100)).await.unwrap();
        fx.intake.on_cancel(1).await.unwrap();

        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
        assert!(fx
            .messenger
            .texts()
            .iter()
            .any(|t| t.starts_with("Session cleared")));
    }

    #[tokio::test]
    async fn cancel_is_refused_while_processing() {
        let fx = fixture().await;
        fx.intake.on_video(1, None, video(100)).await.unwrap();
        let _slot = fx.state.active.try_acquire(1).unwrap();

        fx.intake.on_cancel(1).await.unwrap();

        assert_eq!(fx.state.sessions.stage(1), Stage::VideoReceived);
        assert!(fx
            .messenger
            .texts()
            .iter()
            .any(|t| t.contains("cannot be cancelled")));
    }

    #[tokio::test]
    async fn mime_mismatch_is_rejected() {
        let fx = fixture().await;
        let media = IncomingMedia {
            file_ref: "r".to_string(),
            file_name: "clip.mp4".to_string(),
            file_size: 100,
            mime_type: Some("video/x-matroska".to_string()),
        };
        fx.intake.on_video(1, None, media).await.unwrap();
        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
        assert!(fx
            .messenger
            .texts()
            .iter()
            .any(|t| t.starts_with("MIME type mismatch")));
    }
}
