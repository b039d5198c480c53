use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::error::EngineError;

/// Merge mode selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Discard the video's own audio and mux in the new track.
    Replace,
    /// Blend the video's audio with the new track at half amplitude each.
    Mix,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Replace => "replace",
            MergeMode::Mix => "mix",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "replace" => Some(MergeMode::Replace),
            "mix" => Some(MergeMode::Mix),
            _ => None,
        }
    }
}

/// Black-box contract of the media engine.
#[async_trait]
pub trait MediaMerger: Send + Sync {
    /// Produce `output` from `video` and `audio` under `mode`. On failure
    /// the error carries the tool's diagnostic output verbatim.
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        mode: MergeMode,
    ) -> Result<(), EngineError>;
}

/// Adapter around the external ffmpeg binary.
pub struct MergeEngine {
    ffmpeg_bin: PathBuf,
    timeout_secs: u64,
}

impl MergeEngine {
    pub fn new(ffmpeg_bin: PathBuf, timeout_secs: u64) -> Self {
        Self {
            ffmpeg_bin,
            timeout_secs,
        }
    }

    /// Verify the binary runs and log its version line.
    pub async fn probe(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .output()
            .await
            .with_context(|| {
                format!("Failed to execute ffmpeg at: {}", self.ffmpeg_bin.display())
            })?;

        if !output.status.success() {
            return Err(anyhow!("ffmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("Empty output from ffmpeg -version"))?
            .to_string();

        info!("🎬 Merge engine: {}", first_line);
        Ok(first_line)
    }

    /// Build the ffmpeg command line for a merge.
    ///
    /// Both graphs keep the video stream untouched (`-c:v copy`) and encode
    /// the resulting audio to AAC.
    pub fn build_args(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        mode: MergeMode,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
        ];

        match mode {
            MergeMode::Replace => {
                // First video stream, new audio only.
                args.push("-map".to_string());
                args.push("0:v:0".to_string());
                args.push("-map".to_string());
                args.push("1:a:0".to_string());
            }
            MergeMode::Mix => {
                // Attenuate both tracks to half amplitude, mix to the longer
                // of the two durations.
                args.push("-filter_complex".to_string());
                args.push(
                    "[0:a]volume=0.5[a0];[1:a]volume=0.5[a1];\
                     [a0][a1]amix=inputs=2:duration=longest[aout]"
                        .to_string(),
                );
                args.push("-map".to_string());
                args.push("0:v:0".to_string());
                args.push("-map".to_string());
                args.push("[aout]".to_string());
            }
        }

        args.push("-c:v".to_string());
        args.push("copy".to_string());
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-y".to_string());
        args.push(output.to_string_lossy().to_string());

        args
    }
}

#[async_trait]
impl MediaMerger for MergeEngine {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        mode: MergeMode,
    ) -> Result<(), EngineError> {
        let args = self.build_args(video, audio, output, mode);
        debug!(
            "Executing ffmpeg: {} {}",
            self.ffmpeg_bin.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(&args);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| EngineError {
            diagnostic: format!(
                "failed to spawn ffmpeg at {}: {e}",
                self.ffmpeg_bin.display()
            ),
        })?;

        let stderr = child.stderr.take().ok_or_else(|| EngineError {
            diagnostic: "failed to capture ffmpeg stderr".to_string(),
        })?;

        // Drain stderr while the process runs so the pipe cannot fill up.
        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            let reader = BufReader::new(stderr);
            let mut line_stream = reader.lines();
            while let Ok(Some(line)) = line_stream.next_line().await {
                lines.push(line);
            }
            lines.join("\n")
        });

        let status = match timeout(Duration::from_secs(self.timeout_secs), child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(EngineError {
                    diagnostic: format!("failed to wait for ffmpeg: {e}"),
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(EngineError {
                    diagnostic: format!(
                        "ffmpeg timed out after {} seconds and was killed",
                        self.timeout_secs
                    ),
                });
            }
        };

        let diagnostic = stderr_handle.await.unwrap_or_default();

        if !status.success() {
            return Err(EngineError {
                diagnostic: if diagnostic.is_empty() {
                    format!(
                        "ffmpeg exited with code {}",
                        status.code().unwrap_or(-1)
                    )
                } else {
                    diagnostic
                },
            });
        }

        if !output.exists() {
            return Err(EngineError {
                diagnostic: "ffmpeg exited cleanly but produced no output file".to_string(),
            });
        }

        info!("Merge completed: {}", output.display());
        Ok(())
    }
}
