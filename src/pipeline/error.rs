use crate::pipeline::encoder::EncodeStep;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Outward-facing pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetching,
    Encoding,
    Delivering,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Encoding => "encoding",
            Stage::Delivering => "delivering",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Every download attempt failed
    #[error("download failed after {attempts} attempt(s): {reason}")]
    Fetch { attempts: u32, reason: String },

    /// The encoder binary could not be started
    #[error("failed to launch encoder '{binary}': {source}")]
    EncodeLaunch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The encoder exited unsuccessfully (`code` is None when killed by a signal)
    #[error("{step} exited with code {code:?}: {stderr_tail}")]
    EncodeRuntime {
        step: EncodeStep,
        code: Option<i32>,
        stderr_tail: String,
    },

    /// The encoder reported success but left no usable output
    #[error("encoder produced an empty or missing output file: {}", path.display())]
    EmptyOutput { path: PathBuf },

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// A scratch file could not be created
    #[error("failed to create temp file: {source}")]
    TempFile {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    /// Sending the result back failed
    #[error("failed to deliver result: {0}")]
    Delivery(String),
}

impl PipelineError {
    /// The stage reported in the outcome and in metrics.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch { .. } => Stage::Fetching,
            PipelineError::EncodeLaunch { .. } | PipelineError::EncodeRuntime { .. } | PipelineError::EmptyOutput { .. } => {
                Stage::Encoding
            }
            PipelineError::Timeout { stage, .. } | PipelineError::TempFile { stage, .. } => *stage,
            PipelineError::Delivery(_) => Stage::Delivering,
        }
    }

    /// Short text for the end user. Never includes paths or encoder output.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::EncodeRuntime {
                step: EncodeStep::Remux, ..
            } => "❌ Failed to prepare the animation for compression. Please try again.",
            PipelineError::Timeout { stage: Stage::Encoding, .. } => {
                "❌ Compression took too long and was stopped. Try a shorter file."
            }
            other => match other.stage() {
                Stage::Fetching => "❌ Failed to download the file. Please try again.",
                Stage::Encoding => "❌ Failed to compress the file. Please try again.",
                Stage::Delivering => "❌ Failed to send the compressed file. Please try again.",
            },
        }
    }
}
