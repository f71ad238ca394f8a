use std::path::Path;

/// Document extensions accepted as video input (compared case-insensitively).
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v"];

/// Returns true if `file_name` ends with a known video extension.
///
/// Only the final extension counts, so `clip.mkv.txt` is rejected and a bare
/// `.mkv` (a hidden file with no extension) is rejected as well.
pub fn is_video_file_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Kind of inbound media; selects the encode profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    /// GIF-like clip; remuxed to mp4 before compression
    Animation,
    /// Document whose file name carries a video extension
    Document,
    /// Audio track or voice note
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Animation => "animation",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
        }
    }

    /// Whether the run needs a preliminary remux before the main encode.
    pub fn is_two_stage(&self) -> bool {
        matches!(self, MediaKind::Animation)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaKind::Audio)
    }

    fn default_input_suffix(&self) -> &'static str {
        match self {
            MediaKind::Video | MediaKind::Animation => ".mp4",
            MediaKind::Document => ".bin",
            MediaKind::Audio => ".ogg",
        }
    }
}

/// Opaque chat identifier of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatRef(pub i64);

/// Opaque message identifier of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef(pub i32);

/// One inbound file to compress. Immutable once created.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    source_ref: String,
    declared_size_bytes: u64,
    declared_name: Option<String>,
    kind: MediaKind,
    chat: ChatRef,
    reply_to: Option<MessageRef>,
}

impl MediaRequest {
    /// Builds a request, or `None` when the media is not something the pipeline accepts.
    ///
    /// Documents must carry a file name with a known video extension; every other
    /// document is rejected here, before any file is touched.
    pub fn new(
        kind: MediaKind,
        source_ref: impl Into<String>,
        declared_size_bytes: u64,
        declared_name: Option<String>,
        chat: ChatRef,
    ) -> Option<Self> {
        if kind == MediaKind::Document && !declared_name.as_deref().map(is_video_file_name).unwrap_or(false) {
            return None;
        }

        Some(Self {
            source_ref: source_ref.into(),
            declared_size_bytes,
            declared_name,
            kind,
            chat,
            reply_to: None,
        })
    }

    /// Sets the message the result should reply to.
    #[must_use]
    pub fn reply_to(mut self, message: MessageRef) -> Self {
        self.reply_to = Some(message);
        self
    }

    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    pub fn declared_size_bytes(&self) -> u64 {
        self.declared_size_bytes
    }

    pub fn declared_name(&self) -> Option<&str> {
        self.declared_name.as_deref()
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn chat(&self) -> ChatRef {
        self.chat
    }

    pub fn reply_message(&self) -> Option<MessageRef> {
        self.reply_to
    }

    /// Suffix for the local input file: the declared extension when it is short and
    /// alphanumeric, otherwise a per-kind default.
    pub fn input_suffix(&self) -> String {
        self.declared_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_else(|| self.kind.default_input_suffix().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_extensions_case_insensitive() {
        assert!(is_video_file_name("movie.MKV"));
        assert!(is_video_file_name("clip.mp4"));
        assert!(is_video_file_name("Holiday.WebM"));
        assert!(is_video_file_name("a.b.m4v"));
    }

    #[test]
    fn test_non_video_documents_rejected() {
        assert!(!is_video_file_name("notes.txt"));
        assert!(!is_video_file_name("archive.mkv.zip"));
        assert!(!is_video_file_name("noext"));
        assert!(!is_video_file_name(".mkv"));
        assert!(!is_video_file_name(""));
    }

    #[test]
    fn test_document_request_requires_video_name() {
        let chat = ChatRef(1);
        assert!(MediaRequest::new(MediaKind::Document, "id", 10, Some("notes.txt".into()), chat).is_none());
        assert!(MediaRequest::new(MediaKind::Document, "id", 10, None, chat).is_none());
        assert!(MediaRequest::new(MediaKind::Document, "id", 10, Some("MOVIE.MKV".into()), chat).is_some());
    }

    #[test]
    fn test_non_document_kinds_need_no_name() {
        let chat = ChatRef(1);
        for kind in [MediaKind::Video, MediaKind::Animation, MediaKind::Audio] {
            assert!(MediaRequest::new(kind, "id", 10, None, chat).is_some());
        }
    }

    #[test]
    fn test_input_suffix() {
        let chat = ChatRef(1);
        let doc = MediaRequest::new(MediaKind::Document, "id", 0, Some("Film.MKV".into()), chat).unwrap();
        assert_eq!(doc.input_suffix(), ".mkv");

        let video = MediaRequest::new(MediaKind::Video, "id", 0, None, chat).unwrap();
        assert_eq!(video.input_suffix(), ".mp4");

        let odd = MediaRequest::new(MediaKind::Audio, "id", 0, Some("voice.$(rm)".into()), chat).unwrap();
        assert_eq!(odd.input_suffix(), ".ogg");
    }

    #[test]
    fn test_two_stage_only_for_animation() {
        assert!(MediaKind::Animation.is_two_stage());
        assert!(!MediaKind::Video.is_two_stage());
        assert!(!MediaKind::Document.is_two_stage());
        assert!(!MediaKind::Audio.is_two_stage());
    }
}
