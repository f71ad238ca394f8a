//! [`Transport`] and [`MediaSource`] backed by the Telegram Bot API.

use async_trait::async_trait;
use futures_util::StreamExt;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId, ReplyParameters};
use url::Url;

use crate::core::{config, AppError, AppResult};
use crate::pipeline::{ByteStream, ChatRef, MediaKind, MediaSource, MessageRef, OutgoingFile, Transport};

/// Path prefix a local telegram-bot-api server reports for stored files.
const LOCAL_API_CONTAINER_PREFIX: &str = "/var/lib/telegram-bot-api/";

/// Builds `<base>/file/bot<token>/<path>`.
///
/// A local Bot API server returns absolute paths inside its data directory;
/// only the part after that directory is used.
pub fn build_file_url(base: &Url, token: &str, file_path: &str) -> AppResult<Url> {
    let mut url = base.clone();

    let normalized_path = if base.host_str() != Some("api.telegram.org") {
        file_path.strip_prefix(LOCAL_API_CONTAINER_PREFIX).unwrap_or(file_path)
    } else {
        file_path
    };

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| AppError::Config("BOT_API_URL cannot be a base URL".to_string()))?;
        segments.pop_if_empty();
        segments.push("file");
        segments.push(&format!("bot{token}"));
        for seg in normalized_path.split('/') {
            if !seg.is_empty() {
                segments.push(seg);
            }
        }
    }
    Ok(url)
}

fn chat_id(chat: ChatRef) -> ChatId {
    ChatId(chat.0)
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    http: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(config::network::timeout()).build()?;
        Ok(Self { bot, http })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, chat: ChatRef, text: &str) -> AppResult<MessageRef> {
        let message = self.bot.send_message(chat_id(chat), text).await?;
        Ok(MessageRef(message.id.0))
    }

    async fn edit_text(&self, chat: ChatRef, message: MessageRef, text: &str) -> AppResult<()> {
        self.bot
            .edit_message_text(chat_id(chat), MessageId(message.0), text)
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ChatRef, message: MessageRef) -> AppResult<()> {
        self.bot.delete_message(chat_id(chat), MessageId(message.0)).await?;
        Ok(())
    }

    async fn send_file(&self, chat: ChatRef, file: OutgoingFile<'_>) -> AppResult<()> {
        let input = InputFile::file(file.path.to_path_buf());
        let reply = file.reply_to.map(|m| ReplyParameters::new(MessageId(m.0)));

        match file.kind {
            MediaKind::Audio => {
                let mut request = self.bot.send_audio(chat_id(chat), input).caption(file.caption);
                if let Some(reply) = reply {
                    request = request.reply_parameters(reply);
                }
                request.await?;
            }
            MediaKind::Video | MediaKind::Animation | MediaKind::Document => {
                let mut request = self
                    .bot
                    .send_video(chat_id(chat), input)
                    .caption(file.caption)
                    .supports_streaming(true);
                if let Some(reply) = reply {
                    request = request.reply_parameters(reply);
                }
                request.await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSource for TelegramTransport {
    async fn open(&self, source_ref: &str) -> AppResult<ByteStream> {
        let file = self.bot.get_file(FileId(source_ref.to_string())).await?;
        let url = build_file_url(&self.bot.api_url(), self.bot.token(), &file.path)?;
        log::debug!("Fetching {} ({} bytes)", file.path, file.size);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus(status));
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(AppError::from))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_official_api_file_url() {
        let base = Url::parse("https://api.telegram.org").unwrap();
        let url = build_file_url(&base, "123:abc", "videos/file_1.mp4").unwrap();
        assert_eq!(url.as_str(), "https://api.telegram.org/file/bot123:abc/videos/file_1.mp4");
    }

    #[test]
    fn test_local_api_strips_container_prefix() {
        let base = Url::parse("http://localhost:8081").unwrap();
        let url = build_file_url(
            &base,
            "123:abc",
            "/var/lib/telegram-bot-api/123:abc/videos/file_1.mp4",
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8081/file/bot123:abc/123:abc/videos/file_1.mp4");
    }

    #[test]
    fn test_non_base_url_rejected() {
        let base = Url::parse("mailto:someone@example.com").unwrap();
        assert!(build_file_url(&base, "t", "a/b").is_err());
    }
}
