//! ffmpeg invocation: argument building, diagnostic parsing and process supervision.

use crate::core::config;
use crate::core::utils::truncate_tail_utf8;
use crate::core::{metrics, AppError, AppResult};
use crate::pipeline::error::{PipelineError, Stage};
use crate::pipeline::progress::{ProgressEvent, ProgressSender};
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};

static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Duration: (\d{2}:\d{2}:\d{2}\.\d{2})").unwrap());
static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"time=(\d{2}:\d{2}:\d{2}\.\d{2})").unwrap());

/// Upper bound for the error excerpt carried in [`PipelineError::EncodeRuntime`].
const STDERR_TAIL_CHARS: usize = 2000;

/// Video compression parameters. Fixed per process.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub scale: String,
    pub fps: u32,
    pub video_codec: String,
    pub pixel_format: String,
    pub video_bitrate: String,
    pub crf: u8,
    pub preset: String,
    pub profile: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_channels: u8,
    pub audio_sample_rate: u32,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            scale: "-2:720".to_string(),
            fps: 30,
            video_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            video_bitrate: "1M".to_string(),
            crf: 28,
            preset: "veryfast".to_string(),
            profile: "main".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "96k".to_string(),
            audio_channels: 2,
            audio_sample_rate: 44_100,
        }
    }
}

impl EncodeParams {
    pub fn from_env() -> Self {
        use config::encode::*;
        Self {
            scale: VIDEO_SCALE.clone(),
            fps: *VIDEO_FPS,
            video_codec: VIDEO_CODEC.clone(),
            pixel_format: VIDEO_PIXEL_FORMAT.clone(),
            video_bitrate: VIDEO_BITRATE.clone(),
            crf: *VIDEO_CRF,
            preset: VIDEO_PRESET.clone(),
            profile: VIDEO_PROFILE.clone(),
            audio_codec: VIDEO_AUDIO_CODEC.clone(),
            audio_bitrate: VIDEO_AUDIO_BITRATE.clone(),
            audio_channels: *VIDEO_AUDIO_CHANNELS,
            audio_sample_rate: *VIDEO_AUDIO_SAMPLE_RATE,
        }
    }
}

/// Audio compression parameters. Fixed per process.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub channels: u8,
    pub sample_rate: u32,
    pub bitrate: String,
    pub codec: String,
    /// Output container extension without the dot
    pub format: String,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 22_050,
            bitrate: "64k".to_string(),
            codec: "libmp3lame".to_string(),
            format: "mp3".to_string(),
        }
    }
}

impl AudioParams {
    pub fn from_env() -> Self {
        use config::audio::*;
        Self {
            channels: *AUDIO_CHANNELS,
            sample_rate: *AUDIO_SAMPLE_RATE,
            bitrate: AUDIO_BITRATE.clone(),
            codec: AUDIO_CODEC.clone(),
            format: AUDIO_FORMAT.clone(),
        }
    }

    pub fn output_suffix(&self) -> String {
        format!(".{}", self.format)
    }
}

/// Which kind of encoder run a job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeStep {
    Remux,
    Compress,
    Audio,
}

impl EncodeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodeStep::Remux => "remux",
            EncodeStep::Compress => "compress",
            EncodeStep::Audio => "audio",
        }
    }
}

impl fmt::Display for EncodeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeProfile {
    /// Container change only (animation → mp4), default stream settings
    Remux,
    Compress(EncodeParams),
    Audio(AudioParams),
}

impl EncodeProfile {
    pub fn step(&self) -> EncodeStep {
        match self {
            EncodeProfile::Remux => EncodeStep::Remux,
            EncodeProfile::Compress(_) => EncodeStep::Compress,
            EncodeProfile::Audio(_) => EncodeStep::Audio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: EncodeProfile,
}

/// Builds the full ffmpeg argument list for `job`.
///
/// The output path is always pre-created by the temp manager, so `-y` is required.
/// `-nostdin` keeps ffmpeg from waiting on a terminal.
pub fn build_args(job: &EncodeJob) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"].iter().map(OsString::from).collect();
    args.push(job.input.clone().into_os_string());

    let mut push = |values: &[&str]| args.extend(values.iter().map(OsString::from));

    match &job.profile {
        EncodeProfile::Remux => {}
        EncodeProfile::Compress(p) => {
            let fps = p.fps.to_string();
            let crf = p.crf.to_string();
            let channels = p.audio_channels.to_string();
            let sample_rate = p.audio_sample_rate.to_string();
            push(&[
                "-filter_complex",
                &format!("scale={}", p.scale),
                "-r",
                &fps,
                "-c:v",
                &p.video_codec,
                "-pix_fmt",
                &p.pixel_format,
                "-b:v",
                &p.video_bitrate,
                "-crf",
                &crf,
                "-preset",
                &p.preset,
                "-c:a",
                &p.audio_codec,
                "-b:a",
                &p.audio_bitrate,
                "-ac",
                &channels,
                "-ar",
                &sample_rate,
                "-profile:v",
                &p.profile,
                "-map_metadata",
                "-1",
            ]);
        }
        EncodeProfile::Audio(p) => {
            let channels = p.channels.to_string();
            let sample_rate = p.sample_rate.to_string();
            push(&[
                "-vn",
                "-ac",
                &channels,
                "-ar",
                &sample_rate,
                "-c:a",
                &p.codec,
                "-b:a",
                &p.bitrate,
                "-map_metadata",
                "-1",
            ]);
        }
    }

    args.push(job.output.clone().into_os_string());
    args
}

/// Parses `HH:MM:SS.ff` into seconds. Anything that is not three `:`-separated
/// numeric fields, or that overflows, yields 0.
pub fn parse_timestamp(value: &str) -> f64 {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }

    let hours = parts[0].parse::<u64>();
    let minutes = parts[1].parse::<u64>();
    let seconds = parts[2].parse::<f64>();

    match (hours, minutes, seconds) {
        (Ok(h), Ok(m), Ok(s)) if s.is_finite() && s >= 0.0 => h
            .checked_mul(3600)
            .zip(m.checked_mul(60))
            .and_then(|(hs, ms)| hs.checked_add(ms))
            .map_or(0.0, |whole| whole as f64 + s),
        _ => 0.0,
    }
}

/// Extracts progress from ffmpeg diagnostic lines.
///
/// The first `Duration:` seen fixes the total; later ones (other inputs, chapters)
/// are ignored. A percentage is emitted only when it is higher than the last one,
/// so the sequence is strictly increasing and never exceeds 100.
#[derive(Debug, Default)]
pub struct ProgressParser {
    duration: Option<f64>,
    last_percent: Option<u8>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total duration in seconds, once seen.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn feed(&mut self, line: &str) -> Option<u8> {
        if self.duration.is_none() {
            if let Some(caps) = DURATION_RE.captures(line) {
                self.duration = Some(parse_timestamp(&caps[1]));
            }
        }

        let total = self.duration.filter(|d| *d > 0.0)?;
        let current = parse_timestamp(&TIME_RE.captures(line)?[1]);
        let percent = (current / total * 100.0).floor().clamp(0.0, 100.0) as u8;

        match self.last_percent {
            Some(last) if percent <= last => None,
            _ => {
                self.last_percent = Some(percent);
                Some(percent)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeReport {
    pub step: EncodeStep,
    pub duration_seconds: Option<f64>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Diagnostics {
    duration: Option<f64>,
    tail: VecDeque<String>,
}

impl Diagnostics {
    fn tail_text(&self) -> String {
        let joined = self.tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        truncate_tail_utf8(&joined, STDERR_TAIL_CHARS).to_string()
    }
}

/// Reads stderr to EOF, splitting on both `\r` and `\n` since ffmpeg rewrites its
/// status line in place.
async fn read_diagnostics<R>(stderr: R, progress: &ProgressSender) -> Diagnostics
where
    R: AsyncRead + Unpin,
{
    let codec = AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), Vec::new(), config::encoder::MAX_LINE_BYTES);
    let mut lines = FramedRead::new(stderr, codec);
    let mut parser = ProgressParser::new();
    let mut diagnostics = Diagnostics::default();

    while let Some(item) = lines.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("Stopped parsing encoder diagnostics: {}", e);
                break;
            }
        };

        let text = String::from_utf8_lossy(&chunk);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(percent) = parser.feed(line) {
            let _ = progress.send(ProgressEvent::encode(percent));
        }

        if diagnostics.tail.len() == config::encoder::STDERR_TAIL_LINES {
            diagnostics.tail.pop_front();
        }
        diagnostics.tail.push_back(line.to_string());
    }

    // Keep the pipe empty after a decode error so the child never blocks on write.
    let mut rest = lines.into_inner();
    let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;

    diagnostics.duration = parser.duration();
    diagnostics
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) {
    if let Some(mut reader) = reader {
        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    }
}

fn display_args(args: &[OsString]) -> String {
    args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
}

/// Runs ffmpeg jobs under a wall-clock limit.
#[derive(Debug, Clone)]
pub struct EncoderInvoker {
    binary: String,
    timeout: Duration,
}

impl EncoderInvoker {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Runs one job to completion.
    ///
    /// Both output pipes are drained while the process runs. Percentages parsed
    /// from stderr go to `progress`. A non-zero exit carries the last diagnostic
    /// lines; exceeding the timeout kills the process.
    pub async fn run(&self, job: &EncodeJob, progress: &ProgressSender) -> Result<EncodeReport, PipelineError> {
        let step = job.profile.step();
        let args = build_args(job);
        log::info!("🎬 [{}] {} {}", step, self.binary, display_args(&args));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::EncodeLaunch {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr = child.stderr.take();
        let started = Instant::now();

        let work = async {
            let diagnostics = match stderr {
                Some(stderr) => read_diagnostics(stderr, progress).await,
                None => Diagnostics::default(),
            };
            let status = child.wait().await;
            (diagnostics, status)
        };
        let outcome = tokio::time::timeout(self.timeout, work).await;

        let (diagnostics, status) = match outcome {
            Ok(finished) => finished,
            Err(_) => {
                log::error!("❌ [{}] encoder exceeded {:?}, killing it", step, self.timeout);
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill encoder: {}", e);
                }
                stdout_task.abort();
                return Err(PipelineError::Timeout {
                    stage: Stage::Encoding,
                    after: self.timeout,
                });
            }
        };
        let _ = stdout_task.await;

        let elapsed = started.elapsed();
        metrics::ENCODE_DURATION_SECONDS
            .with_label_values(&[step.as_str()])
            .observe(elapsed.as_secs_f64());

        let status = status.map_err(|e| PipelineError::EncodeRuntime {
            step,
            code: None,
            stderr_tail: format!("failed to wait for encoder: {}", e),
        })?;

        if !status.success() {
            let stderr_tail = diagnostics.tail_text();
            log::error!("❌ [{}] encoder exited with {:?}: {}", step, status.code(), stderr_tail);
            return Err(PipelineError::EncodeRuntime {
                step,
                code: status.code(),
                stderr_tail,
            });
        }

        log::info!("✅ [{}] encoder finished in {:?}", step, elapsed);
        Ok(EncodeReport {
            step,
            duration_seconds: diagnostics.duration,
            elapsed,
        })
    }
}

/// Verifies that `binary` runs and returns the first line of its version banner.
pub async fn check_encoder(binary: &str) -> AppResult<String> {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::Config(format!("cannot run '{}': {}", binary, e)))?;

    if !output.status.success() {
        return Err(AppError::Config(format!(
            "'{} -version' exited with {:?}",
            binary,
            output.status.code()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}
