use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use log::{info, warn};

use crate::config::BotConfig;
use crate::crypto::SecretCipher;
use crate::state::SharedState;
use crate::storage::{Storage, UserProfile};
use crate::transport::{CredentialValidator, Messenger};

/// Command surface for premium management and operator tooling.
///
/// Every method returns the reply text; the dispatcher sends it. The
/// user-facing activation and the admin-facing grant are two distinct
/// operations with distinct names.
pub struct AdminOps {
    cfg: Arc<BotConfig>,
    state: Arc<SharedState>,
    storage: Arc<Storage>,
    messenger: Arc<dyn Messenger>,
    validator: Arc<dyn CredentialValidator>,
    cipher: SecretCipher,
}

impl AdminOps {
    pub fn new(
        cfg: Arc<BotConfig>,
        state: Arc<SharedState>,
        storage: Arc<Storage>,
        messenger: Arc<dyn Messenger>,
        validator: Arc<dyn CredentialValidator>,
        cipher: SecretCipher,
    ) -> Self {
        Self {
            cfg,
            state,
            storage,
            messenger,
            validator,
            cipher,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.cfg.admin_ids.contains(&user_id)
    }

    /// Self-service premium activation. The credential is checked with a
    /// throwaway handshake, then stored encrypted on the caller's profile.
    pub async fn activate_premium(
        &self,
        user_id: i64,
        username: Option<&str>,
        credential: &str,
    ) -> Result<String> {
        let account = match self.validator.validate(credential).await {
            Ok(account) => account,
            Err(e) => return Ok(format!("Invalid session: {e:#}")),
        };

        let encrypted = self.cipher.encrypt(credential)?;
        let mut user = self
            .storage
            .get_user(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(user_id, username.map(str::to_string)));
        if user.username.is_none() {
            user.username = username.map(str::to_string);
        }
        user.premium = true;
        user.encrypted_credential = Some(encrypted);
        self.storage.upsert_user(&user).await?;

        info!("User {user_id}: premium activated ({account})");
        Ok("Premium activated successfully!".to_string())
    }

    /// Admin grant of premium for another user. No credential involved.
    pub async fn grant_premium(&self, target_id: i64) -> Result<String> {
        let mut user = self
            .storage
            .get_user(target_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(target_id, None));
        user.premium = true;
        self.storage.upsert_user(&user).await?;

        info!("User {target_id}: premium granted by admin");
        Ok(format!("Premium set for user {target_id}"))
    }

    pub async fn stats(&self) -> Result<String> {
        let total = self.storage.count_users().await?;
        let premium = self.storage.count_premium_users().await?;
        let files = self.storage.count_files().await?;
        Ok(format!(
            "Total users: {total}\nPremium users: {premium}\nTotal files: {files}"
        ))
    }

    /// Delete file records older than 24 hours.
    pub async fn clean(&self) -> Result<String> {
        let cutoff = Utc::now() - Duration::hours(24);
        let deleted = self.storage.delete_files_before(cutoff).await?;
        info!("Cleaned {deleted} file records older than 24h");
        Ok(format!("Cleaned {deleted} old records."))
    }

    /// Send `text` to every known user. Per-recipient failures are logged
    /// and skipped so one bad recipient cannot abort the batch.
    pub async fn broadcast(&self, text: &str) -> Result<String> {
        let ids = self.storage.user_ids().await?;
        let mut delivered = 0usize;
        for id in ids {
            match self.messenger.send_text(id, text).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!("Broadcast to {id} failed: {e:#}"),
            }
        }
        Ok(format!("Broadcasted to {delivered} users."))
    }

    /// Flip the global maintenance flag.
    pub fn toggle_maintenance(&self) -> String {
        let on = self.state.toggle_maintenance();
        info!("Maintenance mode: {}", if on { "ON" } else { "OFF" });
        format!("Maintenance mode: {}", if on { "ON" } else { "OFF" })
    }
}
