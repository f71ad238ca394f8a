//! Bot initialization, commands and the start menu

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::command::BotCommands;

use crate::core::config;

pub const CALLBACK_COMPRESS_AUDIO: &str = "compress:audio";
pub const CALLBACK_COMPRESS_VIDEO: &str = "compress:video";

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "I can do this:")]
pub enum Command {
    #[command(description = "show the main menu")]
    Start,
    #[command(description = "explain what the bot does")]
    Help,
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Missing token or invalid BOT_API_URL
pub fn create_bot() -> anyhow::Result<Bot> {
    if config::BOT_TOKEN.is_empty() {
        anyhow::bail!("BOT_TOKEN (or TELOXIDE_TOKEN) is not set");
    }

    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(config::BOT_TOKEN.as_str(), client);

    // Check if local Bot API server is configured
    let bot = match config::BOT_API_URL.as_deref() {
        Some(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            let url = url::Url::parse(bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
            bot.set_api_url(url)
        }
        None => bot,
    };

    Ok(bot)
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}

pub fn welcome_text() -> &'static str {
    "👋 Hi! I make videos and audio smaller.\n\n\
     Send me a video, a GIF, a video file (mkv, mp4, avi, mov, wmv, flv, webm, m4v) \
     or an audio track and I'll send back a compressed copy."
}

pub fn help_text() -> String {
    format!(
        "{}\n\nVideos are re-encoded with scale {} at {} fps; audio to {} {}.",
        Command::descriptions(),
        config::encode::VIDEO_SCALE.as_str(),
        *config::encode::VIDEO_FPS,
        config::audio::AUDIO_FORMAT.as_str(),
        config::audio::AUDIO_BITRATE.as_str()
    )
}

/// Two-button start menu.
pub fn start_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Compress Audio 🎧", CALLBACK_COMPRESS_AUDIO),
        InlineKeyboardButton::callback("Compress Video 🎥", CALLBACK_COMPRESS_VIDEO),
    ]])
}

/// Reply to a start menu button, if `data` is one of ours.
pub fn callback_reply(data: &str) -> Option<&'static str> {
    match data {
        CALLBACK_COMPRESS_AUDIO => Some("🎧 Send me an audio file."),
        CALLBACK_COMPRESS_VIDEO => Some("🎥 Send me a video file."),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn test_command_descriptions() {
        let command_list = format!("{}", Command::descriptions());
        assert!(command_list.contains("I can do this"));
        assert!(command_list.contains("start"));
        assert!(command_list.contains("help"));
    }

    #[test]
    fn test_start_keyboard_buttons() {
        let keyboard = start_keyboard();
        let row = &keyboard.inline_keyboard[0];
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].text, "Compress Audio 🎧");
        assert_eq!(row[1].text, "Compress Video 🎥");

        let data: Vec<String> = row
            .iter()
            .filter_map(|btn| match &btn.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(data, vec![CALLBACK_COMPRESS_AUDIO, CALLBACK_COMPRESS_VIDEO]);
    }

    #[test]
    fn test_callback_reply() {
        assert!(callback_reply(CALLBACK_COMPRESS_VIDEO).is_some());
        assert!(callback_reply("something:else").is_none());
    }
}
