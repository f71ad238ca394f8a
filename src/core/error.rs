use thiserror::Error;

/// Infrastructure failures shared by every layer of the bot
///
/// Bot API calls, HTTP downloads and filesystem access all surface as an
/// `AppError`. Stage failures of a compression run are reported separately as
/// [`crate::pipeline::PipelineError`].
///
/// ```no_run
/// use kompressor::core::error::AppError;
///
/// fn log_failure(err: &AppError) {
///     log::warn!("request failed: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// File server answered with a non-success status
    #[error("file server returned {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Failures from adapters with no richer error type (test doubles included)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing binary, unreadable token and similar startup problems
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Transport(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Transport(err.to_owned())
    }
}
