use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::BotConfig;
use crate::storage::Storage;

/// Service level determining size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Normal,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Normal => "normal",
            Tier::Premium => "premium",
        }
    }
}

/// Resolved limits for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub tier: Tier,
    pub video_limit: u64,
    pub audio_limit: u64,
}

/// Look up a user's tier and the matching size limits. Read-only; a user
/// without a profile is normal tier.
pub async fn resolve_tier(storage: &Storage, cfg: &BotConfig, user_id: i64) -> Result<TierLimits> {
    let premium = storage
        .get_user(user_id)
        .await?
        .map(|u| u.premium)
        .unwrap_or(false);

    Ok(if premium {
        TierLimits {
            tier: Tier::Premium,
            video_limit: cfg.premium_video_limit,
            audio_limit: cfg.premium_audio_limit,
        }
    } else {
        TierLimits {
            tier: Tier::Normal,
            video_limit: cfg.normal_video_limit,
            audio_limit: cfg.normal_audio_limit,
        }
    })
}
