//! Runs one media request through fetch → encode → validate → deliver.

use crate::core::utils::{bytes_to_mb, round_to};
use crate::core::{config, metrics};
use crate::pipeline::encoder::{AudioParams, EncodeJob, EncodeParams, EncodeProfile, EncoderInvoker};
use crate::pipeline::error::{PipelineError, Stage};
use crate::pipeline::fetch::{FetchConfig, RetryingFetcher};
use crate::pipeline::progress::{ProgressReporter, ProgressSender, ReporterConfig};
use crate::pipeline::request::{MediaKind, MediaRequest, MessageRef};
use crate::pipeline::temp::{TempFileManager, TempKind, TempScope};
use crate::pipeline::transport::{MediaSource, OutgoingFile, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const STATUS_DOWNLOADING: &str = "⬇️ Downloading...";
const STATUS_SENDING: &str = "✅ Processing complete! Sending...";

/// Everything a run needs besides the two capabilities.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub temp_dir: PathBuf,
    pub encoder_bin: String,
    pub encode_timeout: Duration,
    pub encode: EncodeParams,
    pub audio: AudioParams,
    pub fetch: FetchConfig,
    pub reporter: ReporterConfig,
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        Self {
            temp_dir: PathBuf::from(config::TEMP_FILES_DIR.as_str()),
            encoder_bin: config::FFMPEG_BIN.clone(),
            encode_timeout: config::encoder::timeout(),
            encode: EncodeParams::from_env(),
            audio: AudioParams::from_env(),
            fetch: FetchConfig::from_env(),
            reporter: ReporterConfig::default(),
        }
    }
}

/// State of one run. Transitions only move forward; `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Encoding,
    Validating,
    Delivering,
    Done,
    Failed(Stage),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (*self, next),
            (Idle, Fetching)
                | (Fetching, Encoding)
                | (Encoding, Validating)
                | (Validating, Delivering)
                | (Delivering, Done)
                | (_, Failed(_))
        )
    }
}

/// Tracks and logs the state of one run.
#[derive(Debug)]
struct RunState {
    kind: MediaKind,
    state: PipelineState,
}

impl RunState {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            state: PipelineState::Idle,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        if self.state.can_transition_to(next) {
            log::debug!("[{}] {:?} → {:?}", self.kind.as_str(), self.state, next);
            self.state = next;
        } else {
            log::error!(
                "[{}] rejected state transition {:?} → {:?}",
                self.kind.as_str(),
                self.state,
                next
            );
        }
    }
}

/// Size comparison shown in the result caption. Megabyte values are rounded to 2 places.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeReport {
    pub original_bytes: u64,
    pub output_bytes: u64,
    pub original_mb: f64,
    pub output_mb: f64,
    /// Negative when the output grew
    pub reduction_percent: f64,
    pub savings_mb: f64,
}

impl SizeReport {
    pub fn new(original_bytes: u64, output_bytes: u64) -> Self {
        let original_mb = bytes_to_mb(original_bytes);
        let output_mb = round_to(bytes_to_mb(output_bytes), 2);
        let reduction_percent = if original_mb > 0.0 {
            round_to((original_mb - output_mb) / original_mb * 100.0, 2)
        } else {
            0.0
        };

        Self {
            original_bytes,
            output_bytes,
            original_mb: round_to(original_mb, 2),
            output_mb,
            reduction_percent,
            savings_mb: round_to(original_mb - output_mb, 2),
        }
    }

    pub fn caption(&self, kind: MediaKind) -> String {
        let title = if kind.is_audio() {
            "✅ Audio compressed!"
        } else {
            "✅ Video compressed!"
        };
        format!(
            "{}\n\n📁 Original size: {:.2} MB\n📦 New size: {:.2} MB\n📉 Reduction: {:.2}% ({:.2} MB saved)",
            title, self.original_mb, self.output_mb, self.reduction_percent, self.savings_mb
        )
    }
}

/// How a run ended. Exactly one per request.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Success {
        output: PathBuf,
        size_bytes: u64,
        original_size_bytes: u64,
        report: SizeReport,
    },
    Failure {
        stage: Stage,
        reason: String,
    },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success { .. })
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            PipelineOutcome::Failure { stage, .. } => Some(*stage),
            PipelineOutcome::Success { .. } => None,
        }
    }
}

/// Output of the fetch/encode/validate part of a run.
struct Encoded {
    output: PathBuf,
    output_bytes: u64,
    original_bytes: u64,
}

/// Drives requests through the pipeline. Shared by all concurrent runs.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    fetcher: RetryingFetcher,
    invoker: EncoderInvoker,
    temp: TempFileManager,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, source: Arc<dyn MediaSource>, settings: PipelineSettings) -> Self {
        Self {
            fetcher: RetryingFetcher::new(source, settings.fetch.clone()),
            invoker: EncoderInvoker::new(settings.encoder_bin.clone(), settings.encode_timeout),
            temp: TempFileManager::new(settings.temp_dir.clone()),
            transport,
            settings,
        }
    }

    /// Runs `request` to completion.
    ///
    /// The user sees one status message that is edited with progress and removed at
    /// the end, then either the compressed file or exactly one error message.
    /// Scratch files are removed on every path.
    pub async fn run(&self, request: MediaRequest) -> PipelineOutcome {
        let _active = metrics::ActiveJobGuard::start();
        let started = Instant::now();
        let chat = request.chat();
        let kind = request.kind();
        log::info!(
            "📥 [{}] starting run for chat {} ({} bytes declared)",
            kind.as_str(),
            chat.0,
            request.declared_size_bytes()
        );

        let mut state = RunState::new(kind);
        let mut scope = self.temp.scope();

        let status = match self.transport.send_text(chat, STATUS_DOWNLOADING).await {
            Ok(message) => Some(message),
            Err(e) => {
                log::warn!("Failed to send status message: {}", e);
                None
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(self.transport.clone(), chat, status, self.settings.reporter.clone());
        let reporter_task = tokio::spawn(reporter.run(rx));

        // `tx` is dropped when `prepare` returns, which ends the reporter.
        let prepared = self.prepare(&request, &mut state, &mut scope, tx).await;
        if let Err(e) = reporter_task.await {
            log::warn!("Progress reporter task failed: {}", e);
        }

        let result = match prepared {
            Ok(encoded) => self.deliver(&request, &mut state, status, encoded).await,
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(outcome) => {
                state.advance(PipelineState::Done);
                outcome
            }
            Err(e) => {
                let stage = e.stage();
                state.advance(PipelineState::Failed(stage));
                log::error!("❌ [{}] run failed during {}: {}", kind.as_str(), stage, e);
                self.report_failure(&request, status, &e).await;
                metrics::record_stage_failure(stage.as_str());
                PipelineOutcome::Failure {
                    stage,
                    reason: e.to_string(),
                }
            }
        };

        let removed = scope.release_all().await;
        log::debug!("[{}] removed {} temp file(s)", kind.as_str(), removed);

        metrics::record_run(kind.as_str(), outcome.is_success());
        log::info!(
            "🏁 [{}] run finished in {:?}: {}",
            kind.as_str(),
            started.elapsed(),
            if outcome.is_success() { "success" } else { "failure" }
        );
        outcome
    }

    async fn prepare(
        &self,
        request: &MediaRequest,
        state: &mut RunState,
        scope: &mut TempScope,
        progress: ProgressSender,
    ) -> Result<Encoded, PipelineError> {
        let kind = request.kind();

        state.advance(PipelineState::Fetching);
        let input = scope
            .acquire(TempKind::Input, &request.input_suffix())
            .await
            .map_err(|source| PipelineError::TempFile {
                stage: Stage::Fetching,
                source,
            })?;
        let fetched = self
            .fetcher
            .fetch(request.source_ref(), request.declared_size_bytes(), &input, &progress)
            .await?;

        state.advance(PipelineState::Encoding);
        let encode_input = if kind.is_two_stage() {
            let intermediate = scope
                .acquire(TempKind::Intermediate, ".mp4")
                .await
                .map_err(|source| PipelineError::TempFile {
                    stage: Stage::Encoding,
                    source,
                })?;
            // The remux has its own timeline; its percentages are not shown.
            let (muted, _) = mpsc::unbounded_channel();
            let remux = EncodeJob {
                input,
                output: intermediate.clone(),
                profile: EncodeProfile::Remux,
            };
            self.invoker.run(&remux, &muted).await?;
            intermediate
        } else {
            input
        };

        let (suffix, profile) = if kind.is_audio() {
            (
                self.settings.audio.output_suffix(),
                EncodeProfile::Audio(self.settings.audio.clone()),
            )
        } else {
            (".mp4".to_string(), EncodeProfile::Compress(self.settings.encode.clone()))
        };
        let output = scope
            .acquire(TempKind::Output, &suffix)
            .await
            .map_err(|source| PipelineError::TempFile {
                stage: Stage::Encoding,
                source,
            })?;

        let job = EncodeJob {
            input: encode_input,
            output: output.clone(),
            profile,
        };
        self.invoker.run(&job, &progress).await?;

        state.advance(PipelineState::Validating);
        let output_bytes = match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => return Err(PipelineError::EmptyOutput { path: output }),
        };

        let original_bytes = match request.declared_size_bytes() {
            0 => fetched.bytes,
            declared => declared,
        };

        Ok(Encoded {
            output,
            output_bytes,
            original_bytes,
        })
    }

    async fn deliver(
        &self,
        request: &MediaRequest,
        state: &mut RunState,
        status: Option<MessageRef>,
        encoded: Encoded,
    ) -> Result<PipelineOutcome, PipelineError> {
        state.advance(PipelineState::Delivering);
        let chat = request.chat();

        if let Some(status) = status {
            if let Err(e) = self.transport.edit_text(chat, status, STATUS_SENDING).await {
                log::debug!("Failed to update status message: {}", e);
            }
        }

        let report = SizeReport::new(encoded.original_bytes, encoded.output_bytes);
        let caption = report.caption(request.kind());
        let file = OutgoingFile {
            path: &encoded.output,
            caption: &caption,
            kind: request.kind(),
            reply_to: request.reply_message(),
        };

        self.transport
            .send_file(chat, file)
            .await
            .map_err(|e| PipelineError::Delivery(e.to_string()))?;

        if let Some(status) = status {
            if let Err(e) = self.transport.delete_message(chat, status).await {
                log::debug!("Failed to delete status message: {}", e);
            }
        }

        log::info!(
            "✅ [{}] {:.2} MB → {:.2} MB ({:.2}% smaller)",
            request.kind().as_str(),
            report.original_mb,
            report.output_mb,
            report.reduction_percent
        );
        metrics::record_bytes_saved(encoded.original_bytes, encoded.output_bytes);

        Ok(PipelineOutcome::Success {
            output: encoded.output,
            size_bytes: encoded.output_bytes,
            original_size_bytes: encoded.original_bytes,
            report,
        })
    }

    async fn report_failure(&self, request: &MediaRequest, status: Option<MessageRef>, error: &PipelineError) {
        let chat = request.chat();
        if let Some(status) = status {
            if let Err(e) = self.transport.delete_message(chat, status).await {
                log::debug!("Failed to delete status message: {}", e);
            }
        }
        if let Err(e) = self.transport.send_text(chat, error.user_message()).await {
            log::warn!("Failed to send error message to chat {}: {}", chat.0, e);
        }
    }
}
