use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::artifacts::TaskPaths;
use crate::audit::{AuditRecord, AuditSink, TaskOutcome};
use crate::config::BotConfig;
use crate::engine::{MediaMerger, MergeMode};
use crate::error::{AdmissionError, EngineError, StateError, TaskError};
use crate::progress::{spawn_status_updater, ProgressReporter, ProgressUpdate};
use crate::session::{MediaRef, SessionEvent};
use crate::state::SharedState;
use crate::storage::Storage;
use crate::tier::{resolve_tier, Tier};
use crate::transfer::TransferPipeline;
use crate::transport::{MessageRef, Messenger};

/// Free bytes on the filesystem holding `path`, resolved via the longest
/// matching mount point. Fails open when the mount table is unavailable.
pub fn free_space_under(path: &Path) -> u64 {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();

    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let depth = mount.components().count();
            if best.map_or(true, |(d, _)| depth >= d) {
                best = Some((depth, disk.available_space()));
            }
        }
    }

    best.map(|(_, free)| free).unwrap_or(u64::MAX)
}

/// Drives one user's merge pipeline end to end.
///
/// The pipeline is strictly sequential per user: download video, download
/// audio, merge, upload. Past slot acquisition, every exit path releases the
/// slot (RAII guard) and clears the session exactly once.
pub struct Orchestrator {
    cfg: Arc<BotConfig>,
    state: Arc<SharedState>,
    storage: Arc<Storage>,
    engine: Arc<dyn MediaMerger>,
    transfer: TransferPipeline,
    messenger: Arc<dyn Messenger>,
    audit: AuditSink,
}

impl Orchestrator {
    pub fn new(
        cfg: Arc<BotConfig>,
        state: Arc<SharedState>,
        storage: Arc<Storage>,
        engine: Arc<dyn MediaMerger>,
        transfer: TransferPipeline,
        messenger: Arc<dyn Messenger>,
        audit: AuditSink,
    ) -> Self {
        Self {
            cfg,
            state,
            storage,
            engine,
            transfer,
            messenger,
            audit,
        }
    }

    /// Run the pipeline for one user, reporting every outcome through
    /// `status`. Pipeline errors never propagate out of this method.
    pub async fn run(&self, user_id: i64, status: MessageRef) {
        // Maintenance is checked before acquisition, so there is nothing to
        // release on this path. An in-flight task that was admitted before
        // the toggle runs to completion.
        if self.state.maintenance_enabled() {
            self.notify(status, &AdmissionError::MaintenanceMode.to_string())
                .await;
            return;
        }

        let Some(slot) = self.state.active.try_acquire(user_id) else {
            self.notify(status, &StateError::DuplicateTask.to_string())
                .await;
            return;
        };

        // Slot held. The guard plus the unconditional clear at the bottom
        // make cleanup happen exactly once on every path below.
        let task_id = Uuid::new_v4();

        let inputs = self.state.sessions.get(user_id).and_then(|s| {
            match (s.video, s.audio, s.mode) {
                (Some(video), Some(audio), Some(mode)) => Some((video, audio, mode)),
                _ => None,
            }
        });
        let Some((video, audio, mode)) = inputs else {
            self.notify(status, "Invalid state.").await;
            self.state.sessions.clear(user_id);
            drop(slot);
            return;
        };

        if let Err(e) = self.state.sessions.transition(user_id, SessionEvent::Start) {
            self.notify(status, &e.to_string()).await;
            self.state.sessions.clear(user_id);
            drop(slot);
            return;
        }

        info!(
            "Task {task_id}: user {user_id} mode {} (video {} bytes, audio {} bytes)",
            mode.as_str(),
            video.size,
            audio.size
        );

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let updater = spawn_status_updater(self.messenger.clone(), status, progress_rx);

        let paths = TaskPaths::for_user(&self.cfg.temp_dir, user_id);
        let result = self
            .execute(user_id, &video, &audio, mode, &paths, status, &progress_tx)
            .await;

        // Quiesce the updater before the final status edit so a late
        // percentage cannot overwrite it.
        drop(progress_tx);
        let _ = updater.await;

        let tier = resolve_tier(&self.storage, &self.cfg, user_id)
            .await
            .map(|l| l.tier)
            .unwrap_or(Tier::Normal);
        let record = |outcome: TaskOutcome| AuditRecord {
            task_id,
            user_id,
            tier,
            mode,
            video_size: video.size,
            audio_size: audio.size,
            outcome,
            finished_at: Utc::now(),
        };

        match result {
            Ok(output_size) => {
                self.notify(status, "✅ Merge complete.").await;
                if let Err(e) = paths.remove_all() {
                    error!("Task {task_id}: artifact cleanup failed: {e:#}");
                }
                self.audit
                    .emit(&record(TaskOutcome::Success { output_size }))
                    .await;
                info!("Task {task_id}: ✅ completed");
            }
            Err(TaskError::Admission(e)) => {
                // Refused before any work started: no audit record, and the
                // artifacts were never written.
                self.notify(status, &e.to_string()).await;
                info!("Task {task_id}: refused at admission: {e}");
            }
            Err(e) => {
                // Failed artifacts stay on disk for the startup sweep.
                self.notify(status, &e.to_string()).await;
                self.audit
                    .emit(&record(TaskOutcome::Failed {
                        reason: e.to_string(),
                    }))
                    .await;
                error!("Task {task_id}: ❌ failed: {e}");
            }
        }

        self.state.sessions.clear(user_id);
        drop(slot);
    }

    async fn execute(
        &self,
        user_id: i64,
        video: &MediaRef,
        audio: &MediaRef,
        mode: MergeMode,
        paths: &TaskPaths,
        status: MessageRef,
        progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<u64, TaskError> {
        // Admission: the temp filesystem needs headroom for both inputs and
        // the merged output. Checked once, with no reservation held across
        // concurrent tasks.
        let required = self.cfg.min_free_bytes;
        let available = free_space_under(&self.cfg.temp_dir);
        if available < required {
            return Err(AdmissionError::InsufficientStorage {
                available,
                required,
            }
            .into());
        }

        self.notify(status, "⏬ Downloading video...").await;
        let reporter =
            ProgressReporter::new("⏬ Downloading video:", video.size, progress_tx.clone());
        self.transfer
            .download(&video.file_ref, &paths.video, "video", &reporter)
            .await?;

        self.notify(status, "⏬ Downloading audio...").await;
        let reporter =
            ProgressReporter::new("⏬ Downloading audio:", audio.size, progress_tx.clone());
        self.transfer
            .download(&audio.file_ref, &paths.audio, "audio", &reporter)
            .await?;

        self.notify(status, "🎛 Merging media...").await;
        self.engine
            .merge(&paths.video, &paths.audio, &paths.output, mode)
            .await?;

        let output_size = tokio::fs::metadata(&paths.output)
            .await
            .map(|m| m.len())
            .map_err(|e| EngineError {
                diagnostic: format!("failed to stat merge output: {e}"),
            })?;

        self.notify(status, "⏫ Uploading final video...").await;
        let reporter = ProgressReporter::new(
            "⏫ Uploading final video:",
            output_size,
            progress_tx.clone(),
        );
        let caption = format!("Merged successfully! Mode: {}", mode.as_str());
        self.transfer
            .upload(user_id, &paths.output, &caption, &reporter)
            .await?;

        Ok(output_size)
    }

    async fn notify(&self, status: MessageRef, text: &str) {
        if let Err(e) = self.messenger.edit_text(status, text).await {
            debug!("Status edit failed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::session::Stage;
    use crate::storage::tests::test_storage;
    use crate::transport::RemoteFiles;

    const LOG_CHANNEL: i64 = -100;

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<(i64, String)>>,
        edits: Mutex<Vec<String>>,
    }

    impl FakeMessenger {
        fn sent_to_channel(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(chat, _)| *chat == LOG_CHANNEL)
                .map(|(_, text)| text.clone())
                .collect()
        }

        fn edits(&self) -> Vec<String> {
            self.edits.lock().unwrap().clone()
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

        async fn edit_text(&self, _msg: MessageRef, text: &str) -> Result<()> {
            self.edits.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn prompt_mode_choice(&self, chat_id: i64) -> Result<MessageRef> {
            Ok(MessageRef {
                chat_id,
                message_id: 0,
            })
        }
    }

    struct FakeFiles {
        fail_fetch: bool,
        fail_deliver: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl RemoteFiles for FakeFiles {
        async fn fetch(
            &self,
            file_ref: &str,
            dest: &std::path::Path,
            progress: &ProgressReporter,
        ) -> Result<()> {
            if self.fail_fetch {
                bail!("remote ref {file_ref} not found");
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            tokio::fs::write(dest, b"payload").await?;
            progress.report(progress.total());
            Ok(())
        }

        async fn deliver(
            &self,
            _chat_id: i64,
            path: &std::path::Path,
            _caption: &str,
            progress: &ProgressReporter,
        ) -> Result<String> {
            if self.fail_deliver {
                bail!("connection reset");
            }
            if !path.exists() {
                bail!("nothing to deliver");
            }
            progress.report(progress.total());
            Ok("remote-output".to_string())
        }
    }

    struct FakeEngine {
        fail: bool,
    }

    #[async_trait]
    impl MediaMerger for FakeEngine {
        async fn merge(
            &self,
            video: &std::path::Path,
            audio: &std::path::Path,
            output: &std::path::Path,
            _mode: MergeMode,
        ) -> Result<(), EngineError> {
            if self.fail {
                return Err(EngineError {
                    diagnostic: "Stream map '0:a' matches no streams.".to_string(),
                });
            }
            if !video.exists() || !audio.exists() {
                return Err(EngineError {
                    diagnostic: "missing input".to_string(),
                });
            }
            std::fs::write(output, b"merged-output").map_err(|e| EngineError {
                diagnostic: e.to_string(),
            })?;
            Ok(())
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        state: Arc<SharedState>,
        messenger: Arc<FakeMessenger>,
        cfg: Arc<BotConfig>,
    }

    async fn fixture(engine_fail: bool, files: FakeFiles) -> Fixture {
        let mut cfg = BotConfig::default();
        cfg.temp_dir = std::env::temp_dir().join(format!("muxbot-orch-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&cfg.temp_dir).unwrap();
        cfg.min_free_bytes = 0;
        cfg.log_channel_id = LOG_CHANNEL;
        let cfg = Arc::new(cfg);

        let state = SharedState::new();
        let storage = Arc::new(test_storage().await);
        let messenger = Arc::new(FakeMessenger::default());

        let orchestrator = Orchestrator::new(
            cfg.clone(),
            state.clone(),
            storage,
            Arc::new(FakeEngine { fail: engine_fail }),
            TransferPipeline::new(Arc::new(files), 60),
            messenger.clone(),
            AuditSink::new(messenger.clone(), LOG_CHANNEL),
        );

        Fixture {
            orchestrator,
            state,
            messenger,
            cfg,
        }
    }

    fn quiet_files() -> FakeFiles {
        FakeFiles {
            fail_fetch: false,
            fail_deliver: false,
            delay: None,
        }
    }

    fn seed_session(state: &SharedState, user_id: i64) {
        state
            .sessions
            .transition(
                user_id,
                SessionEvent::Video(MediaRef {
                    file_ref: "video-ref".to_string(),
                    size: 100,
                }),
            )
            .unwrap();
        state
            .sessions
            .transition(
                user_id,
                SessionEvent::Audio(MediaRef {
                    file_ref: "audio-ref".to_string(),
                    size: 50,
                }),
            )
            .unwrap();
        state
            .sessions
            .transition(user_id, SessionEvent::ModeChoice(MergeMode::Replace))
            .unwrap();
    }

    fn status() -> MessageRef {
        MessageRef {
            chat_id: 1,
            message_id: 1,
        }
    }

    #[tokio::test]
    async fn success_clears_session_releases_slot_and_removes_artifacts() {
        let fx = fixture(false, quiet_files()).await;
        seed_session(&fx.state, 1);

        fx.orchestrator.run(1, status()).await;

        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
        assert!(fx.state.active.is_empty());
        assert!(fx.messenger.edits().iter().any(|e| e == "✅ Merge complete."));

        let paths = TaskPaths::for_user(&fx.cfg.temp_dir, 1);
        assert!(!paths.video.exists());
        assert!(!paths.audio.exists());
        assert!(!paths.output.exists());

        let audit = fx.messenger.sent_to_channel();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].contains("Status: Success"));
        assert!(audit[0].contains("Mode: replace"));
        assert!(audit[0].contains("Video size: 100"));
    }

    #[tokio::test]
    async fn engine_failure_reports_diagnostic_and_still_cleans_up() {
        let fx = fixture(true, quiet_files()).await;
        seed_session(&fx.state, 1);

        fx.orchestrator.run(1, status()).await;

        // diagnostic surfaced to the user
        assert!(fx
            .messenger
            .edits()
            .iter()
            .any(|e| e == "Merging failed: Stream map '0:a' matches no streams."));
        // failed audit record emitted
        let audit = fx.messenger.sent_to_channel();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].contains("Status: Failed - Merging failed"));
        // slot released, session cleared: the user can start over
        assert!(fx.state.active.is_empty());
        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
        // inputs are left behind for the startup sweep
        let paths = TaskPaths::for_user(&fx.cfg.temp_dir, 1);
        assert!(paths.video.exists());
        assert!(paths.audio.exists());
    }

    #[tokio::test]
    async fn download_failure_reports_and_cleans_up() {
        let fx = fixture(
            false,
            FakeFiles {
                fail_fetch: true,
                fail_deliver: false,
                delay: None,
            },
        )
        .await;
        seed_session(&fx.state, 1);

        fx.orchestrator.run(1, status()).await;

        assert!(fx
            .messenger
            .edits()
            .iter()
            .any(|e| e.starts_with("Download failed (video)")));
        let audit = fx.messenger.sent_to_channel();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].contains("Status: Failed"));
        assert!(fx.state.active.is_empty());
        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
    }

    #[tokio::test]
    async fn upload_failure_reports_and_cleans_up() {
        let fx = fixture(
            false,
            FakeFiles {
                fail_fetch: false,
                fail_deliver: true,
                delay: None,
            },
        )
        .await;
        seed_session(&fx.state, 1);

        fx.orchestrator.run(1, status()).await;

        assert!(fx
            .messenger
            .edits()
            .iter()
            .any(|e| e.starts_with("Upload failed")));
        assert!(fx.state.active.is_empty());
        assert_eq!(fx.state.sessions.stage(1), Stage::Empty);
    }

    #[tokio::test]
    async fn duplicate_trigger_is_rejected_without_touching_the_session() {
        let fx = fixture(false, quiet_files()).await;
        seed_session(&fx.state, 1);

        let held = fx.state.active.try_acquire(1).unwrap();
        fx.orchestrator.run(1, status()).await;
        drop(held);

        assert!(fx
            .messenger
            .edits()
            .iter()
            .any(|e| e == "Already processing a request."));
        // the rejected trigger must not clear the active task's session
        assert_eq!(fx.state.sessions.stage(1), Stage::ModeSelected);
        assert!(fx.messenger.sent_to_channel().is_empty());
    }

    #[tokio::test]
    async fn double_trigger_runs_exactly_one_pipeline() {
        let fx = fixture(
            false,
            FakeFiles {
                fail_fetch: false,
                fail_deliver: false,
                delay: Some(Duration::from_millis(100)),
            },
        )
        .await;
        seed_session(&fx.state, 1);

        let s1 = MessageRef {
            chat_id: 1,
            message_id: 1,
        };
        let s2 = MessageRef {
            chat_id: 1,
            message_id: 2,
        };
        tokio::join!(fx.orchestrator.run(1, s1), fx.orchestrator.run(1, s2));

        let audit = fx.messenger.sent_to_channel();
        assert_eq!(audit.len(), 1, "exactly one pipeline may execute");
        assert!(audit[0].contains("Status: Success"));
        assert_eq!(
            fx.messenger
                .edits()
                .iter()
                .filter(|e| *e == "Already processing a request.")
                .count(),
            1
        );
        assert!(fx.state.active.is_empty());
    }

    #[tokio::test]
    async fn maintenance_blocks_before_acquisition_and_preserves_the_session() {
        let fx = fixture(false, quiet_files()).await;
        seed_session(&fx.state, 1);
        fx.state.toggle_maintenance();

        fx.orchestrator.run(1, status()).await;

        assert!(fx
            .messenger
            .edits()
            .iter()
            .any(|e| e.contains("maintenance")));
        // nothing was acquired, nothing is cleared: the user can retry later
        assert_eq!(fx.state.sessions.stage(1), Stage::ModeSelected);
        assert!(fx.state.active.is_empty());
        assert!(fx.messenger.sent_to_channel().is_empty());
    }

    #[tokio::test]
    async fn maintenance_toggle_after_admission_does_not_abort_the_task() {
        let fx = fixture(
            false,
            FakeFiles {
                fail_fetch: false,
                fail_deliver: false,
                delay: Some(Duration::from_millis(100)),
            },
        )
        .await;
        seed_session(&fx.state, 1);

        let state = fx.state.clone();
        let toggle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            state.toggle_maintenance();
        });

        fx.orchestrator.run(1, status()).await;
        toggle.await.unwrap();

        let audit = fx.messenger.sent_to_channel();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].contains("Status: Success"));
    }

    #[tokio::test]
    async fn missing_session_is_invalid_state() {
        let fx = fixture(false, quiet_files()).await;

        fx.orchestrator.run(1, status()).await;

        assert!(fx.messenger.edits().iter().any(|e| e == "Invalid state."));
        assert!(fx.state.active.is_empty());
        assert!(fx.messenger.sent_to_channel().is_empty());
    }

    #[test]
    fn free_space_probe_reports_something_usable() {
        let free = free_space_under(&std::env::temp_dir());
        assert!(free > 0);
    }
}
