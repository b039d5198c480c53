use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use bot::admin::AdminOps;
use bot::engine::MergeMode;
use bot::handlers::{IncomingMedia, Intake};
use bot::transport::{MessageRef, Messenger};

use crate::botapi::{BotApi, CallbackQuery, Message, Update};

const POLL_TIMEOUT_SECS: u64 = 30;

/// Routes long-polled updates to the intake handlers and command surface.
/// Each update is handled in its own task so one user's pipeline cannot
/// stall another's messages.
pub struct Dispatcher {
    pub api: Arc<BotApi>,
    pub intake: Arc<Intake>,
    pub admin: Arc<AdminOps>,
    pub messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut offset = 0i64;
        info!("Dispatch loop started");
        loop {
            let updates = match self.api.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("getUpdates failed: {e:#}");
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = this.handle_update(update).await {
                        error!("Update handling failed: {e:#}");
                    }
                });
            }
        }
    }

    async fn handle_update(&self, update: Update) -> Result<()> {
        if let Some(message) = update.message {
            self.handle_message(message).await
        } else if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await
        } else {
            Ok(())
        }
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let Some(from) = message.from.clone() else {
            return Ok(());
        };
        let user_id = from.id;
        let username = from.username.as_deref();

        if let Some(video) = &message.video {
            let media = IncomingMedia {
                file_ref: video.file_id.clone(),
                file_name: video
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "video.mp4".to_string()),
                file_size: video.file_size.unwrap_or(0),
                mime_type: video.mime_type.clone(),
            };
            return self.intake.on_video(user_id, username, media).await;
        }

        if let Some(audio) = &message.audio {
            let media = IncomingMedia {
                file_ref: audio.file_id.clone(),
                file_name: audio
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "audio.mp3".to_string()),
                file_size: audio.file_size.unwrap_or(0),
                mime_type: audio.mime_type.clone(),
            };
            return self.intake.on_audio(user_id, username, media).await;
        }

        if let Some(text) = &message.text {
            if let Some(command_line) = text.strip_prefix('/') {
                return self
                    .handle_command(user_id, username, command_line, &message)
                    .await;
            }
        }

        Ok(())
    }

    async fn handle_command(
        &self,
        user_id: i64,
        username: Option<&str>,
        command_line: &str,
        message: &Message,
    ) -> Result<()> {
        let mut parts = command_line.split_whitespace();
        let command = parts.next().unwrap_or("");
        // "/stats@muxbot" arrives in group chats
        let command = command.split('@').next().unwrap_or(command);
        let arg = parts.next();
        let admin = self.admin.is_admin(user_id);

        let reply = match command {
            "premium" => match arg {
                Some(credential) => {
                    self.admin
                        .activate_premium(user_id, username, credential)
                        .await?
                }
                None => "Please provide your session credential after /premium".to_string(),
            },
            "grantpremium" if admin => match arg.and_then(|a| a.parse::<i64>().ok()) {
                Some(target) => self.admin.grant_premium(target).await?,
                None => "Usage: /grantpremium <user_id>".to_string(),
            },
            "stats" if admin => self.admin.stats().await?,
            "clean" if admin => self.admin.clean().await?,
            "broadcast" if admin => {
                let body = message
                    .reply_to_message
                    .as_deref()
                    .and_then(|m| m.text.clone().or_else(|| m.caption.clone()));
                match body {
                    Some(text) => self.admin.broadcast(&text).await?,
                    None => "Reply to a message to broadcast.".to_string(),
                }
            }
            "maintenance" if admin => self.admin.toggle_maintenance(),
            "cancel" => return self.intake.on_cancel(user_id).await,
            // unknown commands and unauthorized admin commands stay silent
            _ => return Ok(()),
        };

        self.messenger.send_text(message.chat.id, &reply).await?;
        Ok(())
    }

    async fn handle_callback(&self, callback: CallbackQuery) -> Result<()> {
        let user_id = callback.from.id;
        let Some(mode) = callback.data.as_deref().and_then(MergeMode::parse) else {
            self.api
                .answer_callback_query(&callback.id, Some("Unknown action."))
                .await?;
            return Ok(());
        };

        self.api.answer_callback_query(&callback.id, None).await?;
        let prompt = callback.message.map(|m| MessageRef {
            chat_id: m.chat.id,
            message_id: m.message_id,
        });
        self.intake.on_mode_choice(user_id, mode, prompt).await
    }
}
