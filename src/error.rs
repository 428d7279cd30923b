//! Error taxonomy for the slice pipeline.
//!
//! Errors fall into two families:
//!
//! - [`JobError`]: per-job failures. These are recovered at the job boundary
//!   (or the per-job export boundary), recorded on the job as an
//!   [`ErrorRecord`], and only lower the success count.
//! - [`SetupError`]: fatal failures raised while establishing the run
//!   (output directories, input discovery). These abort the run before any
//!   work is scheduled.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Pipeline stage a job was in when something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Import,
    Preprocess,
    Segment,
    Postprocess,
    Export,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Import,
        Stage::Preprocess,
        Stage::Segment,
        Stage::Postprocess,
        Stage::Export,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Import => "import",
            Stage::Preprocess => "preprocess",
            Stage::Segment => "segment",
            Stage::Postprocess => "postprocess",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an engine collaborator (stage invoker or render target).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Per-job failure kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("failed to import slice: {0}")]
    ImportFailure(String),

    #[error("image dimensions too small: {width}x{height} (minimum {minimum}x{minimum})")]
    DimensionTooSmall {
        width: u32,
        height: u32,
        minimum: u32,
    },

    #[error("{stage} stage failed: {message}")]
    StageFailure { stage: Stage, message: String },

    #[error("export failed: {0}")]
    ExportFailure(String),
}

/// A failure attached to a job. Never propagated past the job boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Stage that failed
    pub stage: Stage,

    /// What went wrong
    pub error: JobError,

    /// Slice the job was processing
    pub source_path: PathBuf,
}

impl ErrorRecord {
    pub fn new(stage: Stage, error: JobError, source_path: &Path) -> Self {
        Self {
            stage,
            error,
            source_path: source_path.to_path_buf(),
        }
    }

    /// Human-readable failure message.
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.stage,
            self.source_path.display(),
            self.error
        )
    }
}

/// Fatal run-setup failures.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to set up output directory {}: {source}", path.display())]
    DirectorySetupFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery failed: {0}")]
    DiscoveryFailure(String),
}
