//! Capability seams between the pipeline and the messenger.
//!
//! The pipeline never touches a bot client directly; everything it needs from the
//! outside world goes through these two traits, injected as `Arc<dyn ...>`.

use crate::core::AppResult;
use crate::pipeline::request::{ChatRef, MediaKind, MessageRef};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::path::Path;
use std::pin::Pin;

/// Chunked byte stream of a remote file.
pub type ByteStream = Pin<Box<dyn Stream<Item = AppResult<Bytes>> + Send>>;

/// Resolves an opaque file reference into its bytes.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Opens a fresh stream for `source_ref`. Called once per download attempt.
    async fn open(&self, source_ref: &str) -> AppResult<ByteStream>;
}

/// A finished file to hand back to the user.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingFile<'a> {
    pub path: &'a Path,
    pub caption: &'a str,
    pub kind: MediaKind,
    pub reply_to: Option<MessageRef>,
}

/// Outbound messaging capabilities.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, chat: ChatRef, text: &str) -> AppResult<MessageRef>;

    async fn edit_text(&self, chat: ChatRef, message: MessageRef, text: &str) -> AppResult<()>;

    async fn delete_message(&self, chat: ChatRef, message: MessageRef) -> AppResult<()>;

    async fn send_file(&self, chat: ChatRef, file: OutgoingFile<'_>) -> AppResult<()>;
}
