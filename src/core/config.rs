use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Reads an environment variable and parses it, falling back to `default` when it is
/// missing or malformed. Malformed values are logged so a typo never goes unnoticed.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Configuration constants for the bot
/// Cached ffmpeg binary path
/// Read once at startup from FFMPEG_BIN environment variable or defaults to "ffmpeg"
pub static FFMPEG_BIN: Lazy<String> = Lazy::new(|| env_string("FFMPEG_BIN", "ffmpeg"));

/// Temporary files directory for inputs and encoder outputs
/// Read from TEMP_FILES_DIR environment variable
/// Defaults to the system temp dir, supports tilde (~) expansion
pub static TEMP_FILES_DIR: Lazy<String> = Lazy::new(|| {
    let raw = env::var("TEMP_FILES_DIR").unwrap_or_else(|_| env::temp_dir().to_string_lossy().into_owned());
    shellexpand::tilde(&raw).into_owned()
});

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: kompressor.log
pub static LOG_FILE_PATH: Lazy<String> = Lazy::new(|| env_string("LOG_FILE_PATH", "kompressor.log"));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Custom Bot API server (local telegram-bot-api), if any
/// Read from BOT_API_URL environment variable
pub static BOT_API_URL: Lazy<Option<String>> = Lazy::new(|| env::var("BOT_API_URL").ok());

/// Video compression profile.
///
/// Every value is fixed for the lifetime of the process; users cannot negotiate them.
pub mod encode {
    use super::{env_parse, env_string, Lazy};

    /// Scale filter argument (`W:H`, `-2` keeps the aspect ratio with an even size)
    pub static VIDEO_SCALE: Lazy<String> = Lazy::new(|| env_string("VIDEO_SCALE", "-2:720"));
    /// Output frame rate
    pub static VIDEO_FPS: Lazy<u32> = Lazy::new(|| env_parse("VIDEO_FPS", 30));
    pub static VIDEO_CODEC: Lazy<String> = Lazy::new(|| env_string("VIDEO_CODEC", "libx264"));
    pub static VIDEO_PIXEL_FORMAT: Lazy<String> = Lazy::new(|| env_string("VIDEO_PIXEL_FORMAT", "yuv420p"));
    pub static VIDEO_BITRATE: Lazy<String> = Lazy::new(|| env_string("VIDEO_BITRATE", "1M"));
    /// Constant rate factor (0-51, higher = smaller file)
    pub static VIDEO_CRF: Lazy<u8> = Lazy::new(|| env_parse("VIDEO_CRF", 28));
    pub static VIDEO_PRESET: Lazy<String> = Lazy::new(|| env_string("VIDEO_PRESET", "veryfast"));
    pub static VIDEO_PROFILE: Lazy<String> = Lazy::new(|| env_string("VIDEO_PROFILE", "main"));
    pub static VIDEO_AUDIO_CODEC: Lazy<String> = Lazy::new(|| env_string("VIDEO_AUDIO_CODEC", "aac"));
    pub static VIDEO_AUDIO_BITRATE: Lazy<String> = Lazy::new(|| env_string("VIDEO_AUDIO_BITRATE", "96k"));
    pub static VIDEO_AUDIO_CHANNELS: Lazy<u8> = Lazy::new(|| env_parse("VIDEO_AUDIO_CHANNELS", 2));
    pub static VIDEO_AUDIO_SAMPLE_RATE: Lazy<u32> = Lazy::new(|| env_parse("VIDEO_AUDIO_SAMPLE_RATE", 44_100));
}

/// Audio (voice / music) compression profile.
pub mod audio {
    use super::{env_parse, env_string, Lazy};

    pub static AUDIO_CHANNELS: Lazy<u8> = Lazy::new(|| env_parse("AUDIO_CHANNELS", 1));
    pub static AUDIO_SAMPLE_RATE: Lazy<u32> = Lazy::new(|| env_parse("AUDIO_SAMPLE_RATE", 22_050));
    pub static AUDIO_BITRATE: Lazy<String> = Lazy::new(|| env_string("AUDIO_BITRATE", "64k"));
    pub static AUDIO_CODEC: Lazy<String> = Lazy::new(|| env_string("AUDIO_CODEC", "libmp3lame"));
    /// Container extension without the dot (e.g. "mp3")
    pub static AUDIO_FORMAT: Lazy<String> = Lazy::new(|| env_string("AUDIO_FORMAT", "mp3"));
}

/// Fetch (download from Telegram) configuration
pub mod fetch {
    use super::{env_parse, Duration, Lazy};

    /// Maximum number of download attempts
    pub static MAX_ATTEMPTS: Lazy<u32> = Lazy::new(|| env_parse("FETCH_MAX_ATTEMPTS", 3));

    /// Linear backoff unit: after failed attempt `n` the fetcher waits `n * unit`
    pub static BACKOFF_SECS: Lazy<u64> = Lazy::new(|| env_parse("FETCH_BACKOFF_SECS", 5));

    /// Write buffer size in bytes (4 MiB)
    pub const CHUNK_SIZE_BYTES: usize = 4 * 1024 * 1024;

    /// Minimum interval between download progress events (in seconds)
    pub const PROGRESS_INTERVAL_SECS: u64 = 3;

    /// Byte threshold between download progress events (10 MiB)
    pub const PROGRESS_BYTES: u64 = 10 * 1024 * 1024;

    /// Timeout for a single download attempt (in seconds)
    pub static ATTEMPT_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("FETCH_ATTEMPT_TIMEOUT_SECS", 900));

    pub fn backoff_unit() -> Duration {
        Duration::from_secs(*BACKOFF_SECS)
    }

    pub fn progress_interval() -> Duration {
        Duration::from_secs(PROGRESS_INTERVAL_SECS)
    }

    pub fn attempt_timeout() -> Duration {
        Duration::from_secs(*ATTEMPT_TIMEOUT_SECS)
    }
}

/// Encoder process configuration
pub mod encoder {
    use super::{env_parse, Duration, Lazy};

    /// Wall-clock bound for one ffmpeg run (in seconds)
    pub static TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("ENCODE_TIMEOUT_SECS", 3600));

    /// Number of trailing stderr lines kept for error reports
    pub const STDERR_TAIL_LINES: usize = 20;

    /// Maximum accepted length of one diagnostic line (bytes)
    pub const MAX_LINE_BYTES: usize = 64 * 1024;

    pub fn timeout() -> Duration {
        Duration::from_secs(*TIMEOUT_SECS)
    }
}

/// Progress message configuration
pub mod progress {
    use super::Duration;

    /// Minimum interval between status message edits (in milliseconds)
    pub const MIN_EDIT_INTERVAL_MS: u64 = 2000;

    /// Number of segments in the progress bar
    pub const BAR_SEGMENTS: usize = 20;

    pub fn min_edit_interval() -> Duration {
        Duration::from_millis(MIN_EDIT_INTERVAL_MS)
    }
}

/// Worker configuration
pub mod pipeline {
    use super::{env_parse, Lazy};

    /// Maximum number of pipeline runs executing at the same time
    pub static MAX_CONCURRENT_JOBS: Lazy<usize> = Lazy::new(|| env_parse("MAX_CONCURRENT_JOBS", 2));
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for HTTP requests (in seconds)
    /// 15 minutes so large uploads to a local Bot API are not cut off
    pub const REQUEST_TIMEOUT_SECS: u64 = 900;

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("KOMPRESSOR_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse::<u32>("KOMPRESSOR_TEST_GARBAGE", 7), 7);
        std::env::remove_var("KOMPRESSOR_TEST_GARBAGE");
    }

    #[test]
    fn test_env_parse_reads_value() {
        std::env::set_var("KOMPRESSOR_TEST_NUMBER", " 42 ");
        assert_eq!(env_parse::<u32>("KOMPRESSOR_TEST_NUMBER", 7), 42);
        std::env::remove_var("KOMPRESSOR_TEST_NUMBER");
    }

    #[test]
    fn test_fetch_defaults() {
        assert_eq!(fetch::CHUNK_SIZE_BYTES, 4 * 1024 * 1024);
        assert_eq!(fetch::progress_interval(), Duration::from_secs(3));
        assert_eq!(fetch::PROGRESS_BYTES, 10 * 1024 * 1024);
    }
}
