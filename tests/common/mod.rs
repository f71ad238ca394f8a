//! Common test utilities
//!
//! In-memory [`Transport`] and [`MediaSource`] doubles plus a shell script that
//! stands in for ffmpeg.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use kompressor::core::retry::RetryConfig;
use kompressor::core::{AppError, AppResult};
use kompressor::pipeline::{
    AudioParams, ByteStream, ChatRef, EncodeParams, FetchConfig, MediaKind, MediaRequest, MediaSource, MessageRef,
    OutgoingFile, PipelineSettings, ReporterConfig, Transport,
};

pub const MIB: u64 = 1024 * 1024;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SendText(String),
    Edit(String),
    Delete(MessageRef),
    SendFile {
        caption: String,
        size_bytes: u64,
        kind: MediaKind,
        file_name: String,
    },
}

/// Records every call; individual operations can be made to fail.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI32,
    fail_status: bool,
    fail_send_file: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The initial status message cannot be sent.
    pub fn failing_status() -> Self {
        Self {
            fail_status: true,
            ..Self::default()
        }
    }

    /// Uploading the result fails.
    pub fn failing_delivery() -> Self {
        Self {
            fail_send_file: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SendText(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn error_texts(&self) -> Vec<String> {
        self.texts().into_iter().filter(|t| t.starts_with('❌')).collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Edit(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Percentages shown in "Compressing..." edits, in order.
    pub fn encode_percents(&self) -> Vec<u8> {
        self.edits()
            .iter()
            .filter_map(|text| text.strip_prefix("⏳ Compressing... "))
            .filter_map(|rest| rest.split('%').next())
            .filter_map(|num| num.parse().ok())
            .collect()
    }

    pub fn sent_files(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::SendFile { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, _chat: ChatRef, text: &str) -> AppResult<MessageRef> {
        if self.fail_status && text.starts_with("⬇️") {
            return Err(AppError::Transport("chat not found".into()));
        }
        self.record(Call::SendText(text.to_string()));
        Ok(MessageRef(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn edit_text(&self, _chat: ChatRef, _message: MessageRef, text: &str) -> AppResult<()> {
        self.record(Call::Edit(text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, _chat: ChatRef, message: MessageRef) -> AppResult<()> {
        self.record(Call::Delete(message));
        Ok(())
    }

    async fn send_file(&self, _chat: ChatRef, file: OutgoingFile<'_>) -> AppResult<()> {
        if self.fail_send_file {
            return Err(AppError::Transport("Request Entity Too Large".into()));
        }
        let size_bytes = std::fs::metadata(file.path).map(|m| m.len()).unwrap_or(0);
        self.record(Call::SendFile {
            caption: file.caption.to_string(),
            size_bytes,
            kind: file.kind,
            file_name: file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        });
        Ok(())
    }
}

/// Serves `total_bytes` of zeros in 1 MiB chunks after `failures` failed opens.
pub struct MemorySource {
    total_bytes: u64,
    failures: u32,
    opens: AtomicU32,
}

impl MemorySource {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            failures: 0,
            opens: AtomicU32::new(0),
        }
    }

    pub fn failing_first(total_bytes: u64, failures: u32) -> Self {
        Self {
            total_bytes,
            failures,
            opens: AtomicU32::new(0),
        }
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for MemorySource {
    async fn open(&self, _source_ref: &str) -> AppResult<ByteStream> {
        let open = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if open <= self.failures {
            // Some bytes arrive before the connection drops
            let items: Vec<AppResult<Bytes>> = vec![
                Ok(Bytes::from(vec![1u8; 1024])),
                Err(AppError::Transport("connection reset by peer".into())),
            ];
            return Ok(Box::pin(futures_util::stream::iter(items)));
        }

        let chunk = Bytes::from(vec![0u8; MIB as usize]);
        let mut items: Vec<AppResult<Bytes>> = Vec::new();
        let mut remaining = self.total_bytes;
        while remaining > 0 {
            let len = remaining.min(MIB);
            items.push(Ok(chunk.slice(0..len as usize)));
            remaining -= len;
        }
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// Writes an executable `ffmpeg` stand-in whose body is `body`.
///
/// `$out` holds the last argument (the output path) when the body runs.
pub fn write_fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    let script = format!("#!/bin/sh\nfor arg in \"$@\"; do out=\"$arg\"; done\n{}\n", body);
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(script.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Prints a 100 s duration and progress at 20 s steps, then writes `output_bytes`.
pub fn successful_encoder_body(output_bytes: u64) -> String {
    format!(
        r#"printf '  Duration: 00:01:40.00, start: 0.000000, bitrate: 4000 kb/s\n' >&2
for t in 00:00:20.00 00:00:40.00 00:01:00.00 00:01:20.00 00:01:40.00; do
  printf 'frame=  100 fps=30 q=28.0 size=    1024kB time=%s bitrate=1000.0kbits/s speed=2x\r' "$t" >&2
done
printf '\n' >&2
head -c {} /dev/zero > "$out"
exit 0"#,
        output_bytes
    )
}

pub fn settings(temp_dir: &Path, encoder: &Path) -> PipelineSettings {
    PipelineSettings {
        temp_dir: temp_dir.to_path_buf(),
        encoder_bin: encoder.to_string_lossy().into_owned(),
        encode_timeout: Duration::from_secs(30),
        encode: EncodeParams::default(),
        audio: AudioParams::default(),
        fetch: FetchConfig {
            retry: RetryConfig::new()
                .max_attempts(3)
                .backoff_unit(Duration::from_millis(10)),
            ..FetchConfig::default()
        },
        reporter: ReporterConfig {
            min_interval: Duration::ZERO,
        },
    }
}

pub fn request(kind: MediaKind, size_bytes: u64, name: Option<&str>) -> MediaRequest {
    MediaRequest::new(kind, "file-id", size_bytes, name.map(str::to_string), ChatRef(1001))
        .unwrap()
        .reply_to(MessageRef(500))
}

/// Names of the files left in `dir`.
pub fn leftover_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect()
}
