//! Logger setup and the startup configuration banner

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Installs the global logger: `Info` and above to the terminal, `Debug` and
/// above to `log_file_path` (truncated on every start).
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("cannot create log file {}: {}", log_file_path, e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("logger already installed or unusable: {}", e))?;

    Ok(())
}

/// Prints the effective encode profile, fetch policy and temp directory once at startup.
pub fn log_pipeline_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("🎬 Pipeline Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Encoder binary: {}", config::FFMPEG_BIN.as_str());
    log::info!("Temp directory: {}", config::TEMP_FILES_DIR.as_str());
    log::info!(
        "Video: scale={} fps={} codec={} crf={} preset={} bitrate={}",
        config::encode::VIDEO_SCALE.as_str(),
        *config::encode::VIDEO_FPS,
        config::encode::VIDEO_CODEC.as_str(),
        *config::encode::VIDEO_CRF,
        config::encode::VIDEO_PRESET.as_str(),
        config::encode::VIDEO_BITRATE.as_str(),
    );
    log::info!(
        "Audio: codec={} bitrate={} channels={} rate={}",
        config::audio::AUDIO_CODEC.as_str(),
        config::audio::AUDIO_BITRATE.as_str(),
        *config::audio::AUDIO_CHANNELS,
        *config::audio::AUDIO_SAMPLE_RATE,
    );
    log::info!(
        "Fetch: {} attempts, backoff unit {}s",
        *config::fetch::MAX_ATTEMPTS,
        *config::fetch::BACKOFF_SECS
    );
    log::info!("Max concurrent jobs: {}", *config::pipeline::MAX_CONCURRENT_JOBS);

    if let Some(url) = config::BOT_API_URL.as_deref() {
        log::info!("Bot API: {} (custom)", url);
    }

    let temp_dir = std::path::Path::new(config::TEMP_FILES_DIR.as_str());
    if !temp_dir.is_dir() {
        log::error!("❌ TEMP_FILES_DIR {} does not exist - every job will fail!", temp_dir.display());
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
