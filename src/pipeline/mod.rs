//! Media transfer-and-transcode pipeline.
//!
//! Source-agnostic: the pipeline only talks to the messenger through the
//! [`Transport`] and [`MediaSource`] traits. A run goes
//!   fetch → (remux) → encode → validate → deliver → cleanup
//! and always finishes with a [`PipelineOutcome`].
//!
//! - `temp`: uniquely named scratch files with scoped cleanup
//! - `fetch`: download with retries, large buffered writes and coarse progress
//! - `encoder`: ffmpeg argument building, diagnostic parsing, process supervision
//! - `progress`: throttled status message rendering
//! - `orchestrator`: the state machine tying it together

pub mod encoder;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod progress;
pub mod request;
pub mod temp;
pub mod transport;

pub use encoder::{AudioParams, EncodeJob, EncodeParams, EncodeProfile, EncoderInvoker, ProgressParser};
pub use error::{PipelineError, Stage};
pub use fetch::{FetchConfig, RetryingFetcher};
pub use orchestrator::{Orchestrator, PipelineOutcome, PipelineSettings, PipelineState, SizeReport};
pub use progress::{ProgressEvent, ProgressReporter, ProgressStage, ReporterConfig};
pub use request::{is_video_file_name, ChatRef, MediaKind, MediaRequest, MessageRef};
pub use temp::{TempAsset, TempFileManager, TempKind, TempScope};
pub use transport::{ByteStream, MediaSource, OutgoingFile, Transport};
