use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

/// Configuration for the merge service.
///
/// Values resolve in three layers: built-in defaults, then an optional
/// TOML/JSON config file, then environment variables (which is where the
/// secrets normally come from).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Remote API identity
    pub api_id: i64,
    /// Remote API secret
    pub api_hash: String,
    /// Bot credential used by the transport
    pub bot_token: String,
    /// Database connection string
    pub database_url: String,
    /// Operator channel receiving audit records
    pub log_channel_id: i64,
    /// Users allowed to run admin commands
    pub admin_ids: Vec<i64>,
    /// Base64-encoded 32-byte key for credentials at rest
    pub encryption_key: String,
    /// Directory holding per-task artifacts
    pub temp_dir: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Free space required under `temp_dir` before a task is admitted
    pub min_free_bytes: u64,
    /// Upper bound on one engine invocation
    pub merge_timeout_secs: u64,
    /// Upper bound on each download/upload
    pub transfer_timeout_secs: u64,
    pub normal_video_limit: u64,
    pub normal_audio_limit: u64,
    pub premium_video_limit: u64,
    pub premium_audio_limit: u64,
    /// Accepted video extensions, lowercase
    pub video_formats: Vec<String>,
    /// Accepted audio extensions, lowercase
    pub audio_formats: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            bot_token: String::new(),
            database_url: "sqlite://muxbot.db?mode=rwc".to_string(),
            log_channel_id: 0,
            admin_ids: Vec::new(),
            // base64 of 32 zero characters, same placeholder the service
            // shipped with before a real key is provisioned
            encryption_key: "MDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDA=".to_string(),
            temp_dir: PathBuf::from("temp"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            min_free_bytes: 2 * GIB,
            merge_timeout_secs: 3600,
            transfer_timeout_secs: 7200,
            normal_video_limit: 2 * GIB,
            normal_audio_limit: GIB,
            premium_video_limit: 4 * GIB,
            premium_audio_limit: 4 * GIB,
            video_formats: vec![
                "mp4".to_string(),
                "mkv".to_string(),
                "mov".to_string(),
                "avi".to_string(),
            ],
            audio_formats: vec![
                "mp3".to_string(),
                "aac".to_string(),
                "wav".to_string(),
                "m4a".to_string(),
                "ogg".to_string(),
            ],
        }
    }
}

impl BotConfig {
    /// Load configuration from an optional file, then apply env overrides.
    ///
    /// The bot credential has no sensible default, so loading fails if it is
    /// still empty afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path).with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    cfg = toml::from_str(&content).with_context(|| {
                        format!("Failed to parse TOML config: {}", config_path.display())
                    })?;
                } else {
                    cfg = serde_json::from_str(&content).with_context(|| {
                        format!("Failed to parse JSON config: {}", config_path.display())
                    })?;
                }
            }
        }

        cfg.apply_env()?;

        if cfg.bot_token.is_empty() {
            anyhow::bail!("bot credential missing: set BOT_TOKEN or put bot_token in the config file");
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("API_ID") {
            self.api_id = v.parse().context("API_ID must be an integer")?;
        }
        if let Ok(v) = std::env::var("API_HASH") {
            self.api_hash = v;
        }
        if let Ok(v) = std::env::var("BOT_TOKEN") {
            self.bot_token = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("LOG_CHANNEL_ID") {
            self.log_channel_id = v.parse().context("LOG_CHANNEL_ID must be an integer")?;
        }
        if let Ok(v) = std::env::var("ADMIN_IDS") {
            self.admin_ids = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<i64>()
                        .with_context(|| format!("ADMIN_IDS contains a non-integer: {s}"))
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Ok(v) = std::env::var("ENCRYPTION_KEY") {
            self.encryption_key = v;
        }
        if let Ok(v) = std::env::var("TEMP_DIR") {
            self.temp_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FFMPEG_BIN") {
            self.ffmpeg_bin = PathBuf::from(v);
        }
        Ok(())
    }
}
