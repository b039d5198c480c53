use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use walkdir::WalkDir;

/// Deterministic on-disk locations for one user's task artifacts.
///
/// The naming is stable per user and kind so that a crash mid-task leaves
/// identifiable orphans for the startup sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPaths {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
}

impl TaskPaths {
    pub fn for_user(temp_dir: &Path, user_id: i64) -> Self {
        Self {
            video: temp_dir.join(format!("{user_id}_video.mp4")),
            audio: temp_dir.join(format!("{user_id}_audio.mp3")),
            output: temp_dir.join(format!("{user_id}_output.mp4")),
        }
    }

    /// Remove whatever artifacts exist. Missing files are fine.
    pub fn remove_all(&self) -> Result<()> {
        for path in [&self.video, &self.audio, &self.output] {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to delete artifact: {}", path.display()))?;
                debug!("Deleted artifact: {}", path.display());
            }
        }
        Ok(())
    }
}

fn is_task_artifact(name: &str) -> bool {
    let Some((user, rest)) = name.split_once('_') else {
        return false;
    };
    user.parse::<i64>().is_ok()
        && matches!(rest, "video.mp4" | "audio.mp3" | "output.mp4")
}

/// Delete stale task artifacts under the temp directory.
///
/// Run at startup, before any pipeline is admitted: nothing is active, so
/// every matching file was left behind by a failed or interrupted task.
pub fn sweep_orphaned_artifacts(temp_dir: &Path) -> Result<usize> {
    if !temp_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(temp_dir)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_task_artifact(name) {
            continue;
        }
        fs::remove_file(path)
            .with_context(|| format!("Failed to delete orphaned artifact: {}", path.display()))?;
        info!("🗑️  Deleted orphaned artifact: {}", path.display());
        removed += 1;
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("muxbot-artifacts-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn paths_are_deterministic_per_user_and_kind() {
        let a = TaskPaths::for_user(Path::new("temp"), 42);
        let b = TaskPaths::for_user(Path::new("temp"), 42);
        assert_eq!(a, b);
        assert_eq!(a.video, Path::new("temp/42_video.mp4"));
        assert_eq!(a.audio, Path::new("temp/42_audio.mp3"));
        assert_eq!(a.output, Path::new("temp/42_output.mp4"));
    }

    #[test]
    fn artifact_name_matching() {
        assert!(is_task_artifact("42_video.mp4"));
        assert!(is_task_artifact("-12_output.mp4"));
        assert!(is_task_artifact("7_audio.mp3"));
        assert!(!is_task_artifact("42_video.mkv"));
        assert!(!is_task_artifact("user_video.mp4"));
        assert!(!is_task_artifact("42-video.mp4"));
        assert!(!is_task_artifact("notes.txt"));
    }

    #[test]
    fn remove_all_tolerates_missing_files() {
        let dir = scratch_dir();
        let paths = TaskPaths::for_user(&dir, 1);
        fs::write(&paths.video, b"v").unwrap();
        paths.remove_all().unwrap();
        assert!(!paths.video.exists());
        // second pass is a no-op
        paths.remove_all().unwrap();
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sweep_removes_only_task_artifacts() {
        let dir = scratch_dir();
        fs::write(dir.join("42_video.mp4"), b"v").unwrap();
        fs::write(dir.join("42_output.mp4"), b"o").unwrap();
        fs::write(dir.join("keep.txt"), b"k").unwrap();

        let removed = sweep_orphaned_artifacts(&dir).unwrap();
        assert_eq!(removed, 2);
        assert!(!dir.join("42_video.mp4").exists());
        assert!(dir.join("keep.txt").exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sweep_of_missing_dir_is_a_noop() {
        let dir = std::env::temp_dir().join(format!("muxbot-missing-{}", Uuid::new_v4()));
        assert_eq!(sweep_orphaned_artifacts(&dir).unwrap(), 0);
    }
}
