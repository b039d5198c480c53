use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use bot::progress::ProgressReporter;
use bot::transport::{CredentialValidator, MessageRef, Messenger, RemoteFiles};

/// Envelope every Bot API response arrives in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub video: Option<MediaAttachment>,
    pub audio: Option<MediaAttachment>,
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Fields shared by video and audio attachments.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaAttachment {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    #[allow(dead_code)]
    file_id: String,
    file_path: Option<String>,
}

/// Minimal Telegram Bot API client: long-poll updates, messaging, and the
/// file plane with streamed transfers.
pub struct BotApi {
    http: reqwest::Client,
    base: String,
    file_base: String,
}

impl BotApi {
    pub fn new(token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base: format!("https://api.telegram.org/bot{token}"),
            file_base: format!("https://api.telegram.org/file/bot{token}"),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: &serde_json::Value) -> Result<T> {
        let url = format!("{}/{}", self.base, method);
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;
        let body: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("{method} returned malformed JSON"))?;
        if !body.ok {
            bail!(
                "{method} rejected: {}",
                body.description.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        body.result
            .ok_or_else(|| anyhow!("{method} returned no result"))
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        self.call("sendMessage", &json!({"chat_id": chat_id, "text": text}))
            .await
    }

    pub async fn edit_message_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        // The result payload varies (Message or bool); only the ok flag matters.
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &json!({
                    "chat_id": msg.chat_id,
                    "message_id": msg.message_id,
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "answerCallbackQuery",
                &json!({"callback_query_id": id, "text": text}),
            )
            .await?;
        Ok(())
    }

    pub async fn send_mode_keyboard(&self, chat_id: i64) -> Result<Message> {
        self.call(
            "sendMessage",
            &json!({
                "chat_id": chat_id,
                "text": "Choose merge mode:",
                "reply_markup": {"inline_keyboard": [
                    [{"text": "🔁 Replace Video Audio", "callback_data": "replace"}],
                    [{"text": "➕ Mix With Original Audio", "callback_data": "mix"}],
                ]},
            }),
        )
        .await
    }

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        self.call("getFile", &json!({"file_id": file_id})).await
    }

    /// Stream a remote file to `dest`, reporting bytes as they land.
    pub async fn download_file(
        &self,
        file_id: &str,
        dest: &Path,
        progress: &ProgressReporter,
    ) -> Result<()> {
        let file = self.get_file(file_id).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| anyhow!("getFile returned no path for {file_id}"))?;
        let url = format!("{}/{}", self.file_base, file_path);
        debug!("Fetching {url} -> {}", dest.display());

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("file download request failed")?;
        if !resp.status().is_success() {
            bail!("file download failed with status {}", resp.status());
        }

        let mut out = File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut stream = resp.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("file download stream failed")?;
            out.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            received += chunk.len() as u64;
            progress.report(received);
        }
        out.flush().await.context("Failed to flush download")?;
        Ok(())
    }

    /// Upload a local file as a video, counting bytes through a wrapped
    /// reader stream.
    pub async fn send_video_file(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        progress: &ProgressReporter,
    ) -> Result<Message> {
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat upload: {}", path.display()))?
            .len();
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open upload: {}", path.display()))?;

        let progress = progress.clone();
        let mut sent: u64 = 0;
        let counted = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                progress.report(sent);
            }
            chunk
        });

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output.mp4")
            .to_string();
        let part = Part::stream_with_length(Body::wrap_stream(counted), size)
            .file_name(file_name)
            .mime_str("video/mp4")
            .context("invalid mime for upload part")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("video", part);

        let url = format!("{}/sendVideo", self.base);
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .context("sendVideo request failed")?;
        let body: ApiResponse<Message> = resp
            .json()
            .await
            .context("sendVideo returned malformed JSON")?;
        if !body.ok {
            bail!(
                "sendVideo rejected: {}",
                body.description.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        body.result
            .ok_or_else(|| anyhow!("sendVideo returned no result"))
    }
}

/// One Bot API client behind the collaborator traits of the core.
pub struct Transport {
    pub api: Arc<BotApi>,
}

#[async_trait]
impl Messenger for Transport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef> {
        let message = self.api.send_message(chat_id, text).await?;
        Ok(MessageRef {
            chat_id,
            message_id: message.message_id,
        })
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.api.edit_message_text(msg, text).await
    }

    async fn prompt_mode_choice(&self, chat_id: i64) -> Result<MessageRef> {
        let message = self.api.send_mode_keyboard(chat_id).await?;
        Ok(MessageRef {
            chat_id,
            message_id: message.message_id,
        })
    }
}

#[async_trait]
impl RemoteFiles for Transport {
    async fn fetch(&self, file_ref: &str, dest: &Path, progress: &ProgressReporter) -> Result<()> {
        self.api.download_file(file_ref, dest, progress).await
    }

    async fn deliver(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
        progress: &ProgressReporter,
    ) -> Result<String> {
        let message = self
            .api
            .send_video_file(chat_id, path, caption, progress)
            .await?;
        Ok(message
            .video
            .map(|v| v.file_id)
            .unwrap_or_default())
    }
}

/// Validates a premium credential by opening a throwaway session with it:
/// one `getMe` call against the remote API, nothing persisted.
pub struct BotApiCredentialValidator {
    http: reqwest::Client,
}

impl BotApiCredentialValidator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .build()
                .context("Failed to build HTTP client")?,
        })
    }
}

#[async_trait]
impl CredentialValidator for BotApiCredentialValidator {
    async fn validate(&self, credential: &str) -> Result<String> {
        let url = format!("https://api.telegram.org/bot{credential}/getMe");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("credential handshake failed")?;
        let body: ApiResponse<User> = resp
            .json()
            .await
            .context("credential handshake returned malformed JSON")?;
        if !body.ok {
            bail!(
                "credential rejected: {}",
                body.description.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let me = body
            .result
            .ok_or_else(|| anyhow!("credential handshake returned no account"))?;
        Ok(me
            .username
            .or(me.first_name)
            .unwrap_or_else(|| me.id.to_string()))
    }
}
