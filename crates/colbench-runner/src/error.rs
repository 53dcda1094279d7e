use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::trial::TrialStage;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("failed to launch `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "Command failed:\n  cmd: {command}\n  code: {code}\n  stdout:\n{stdout}\n  stderr:\n{stderr}"
    )]
    Subprocess {
        command: String,
        code: String,
        stdout: String,
        stderr: String,
    },

    #[error("Size mismatch: {} ({left_len}) != {} ({right_len})", .left.display(), .right.display())]
    SizeMismatch {
        left: PathBuf,
        right: PathBuf,
        left_len: u64,
        right_len: u64,
    },

    #[error("Content mismatch: {} != {} (first difference at byte {offset})", .left.display(), .right.display())]
    ContentMismatch {
        left: PathBuf,
        right: PathBuf,
        offset: u64,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize {what}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("trial {trial} failed during {stage}")]
    Trial {
        trial: u32,
        stage: TrialStage,
        #[source]
        source: Box<HarnessError>,
    },
}

impl HarnessError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        Self::io(format!("failed to {} {}", action, path.display()), source)
    }

    /// The innermost error, skipping trial wrappers.
    pub fn root(&self) -> &HarnessError {
        match self {
            Self::Trial { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short machine-readable code, used by the JSON report.
    pub fn code(&self) -> &'static str {
        match self.root() {
            Self::Usage(_) => "usage_error",
            Self::Spawn { .. } => "spawn_failed",
            Self::Subprocess { .. } => "subprocess_failed",
            Self::SizeMismatch { .. } | Self::ContentMismatch { .. } => "verification_failed",
            Self::Io { .. } => "io_error",
            Self::Serialize { .. } => "serialization_error",
            Self::Trial { .. } => "trial_failed",
        }
    }
}
