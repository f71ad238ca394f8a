//! Kompressor - Telegram bot that shrinks media files with ffmpeg
//!
//! Users send a video, an animation, a video document or an audio track; the bot
//! downloads it, re-encodes it with a fixed profile and replies with the smaller
//! file and a size report.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, metrics and retry helpers
//! - `pipeline`: Fetch, encode, progress reporting and delivery, independent of Telegram
//! - `telegram`: Bot setup, handler tree and the Bot API transport
//! - `cli`: Command-line interface

pub mod cli;
pub mod core;
pub mod pipeline;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use pipeline::{MediaKind, MediaRequest, Orchestrator, PipelineOutcome, PipelineSettings};
