//! Error taxonomy for the repair engine.
//!
//! Tool-level failures are values: they are captured into the session's
//! invocation log and handed back to the decision policy. Only the variants
//! for which [`RepairError::is_fatal`] returns true end a session.

use std::path::PathBuf;

use thiserror::Error;

use crate::encoding::EncodingTag;

#[derive(Debug, Error)]
pub enum RepairError {
    /// A source file could not be read or written.
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backup store could not capture or restore content. Reversibility
    /// can no longer be guaranteed once this happens.
    #[error("backup store failure on {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not decode as {encoding}")]
    EncodingConversion { path: String, encoding: EncodingTag },

    #[error("line {line} out of range ({path} has {total} lines)")]
    OutOfRange {
        path: String,
        line: usize,
        total: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{path} is {encoding}; run fixEncoding before editing lines")]
    NotNormalized { path: String, encoding: EncodingTag },

    #[error("path escapes the source tree: {0}")]
    PathEscape(String),

    #[error("invalid tool call: {0}")]
    InvalidToolCall(String),

    #[error("decision policy unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("compiler unavailable: {0}")]
    CompilerUnavailable(String),
}

impl RepairError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RepairError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn backup(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RepairError::Backup {
            path: path.into(),
            source,
        }
    }

    /// Short stable name used in invocation logs and policy context.
    pub fn kind(&self) -> &'static str {
        match self {
            RepairError::Io { .. } => "IOFailure",
            RepairError::Backup { .. } => "BackupFailure",
            RepairError::EncodingConversion { .. } => "EncodingConversionFailure",
            RepairError::OutOfRange { .. } => "OutOfRange",
            RepairError::InvalidArgument(_) => "InvalidArgument",
            RepairError::NotNormalized { .. } => "NotNormalized",
            RepairError::PathEscape(_) => "PathEscape",
            RepairError::InvalidToolCall(_) => "InvalidToolCall",
            RepairError::PolicyUnavailable(_) => "PolicyUnavailable",
            RepairError::CompilerUnavailable(_) => "CompilerUnavailable",
        }
    }

    /// Whether the error must end the session instead of being reported back
    /// to the decision policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RepairError::Backup { .. }
                | RepairError::PolicyUnavailable(_)
                | RepairError::CompilerUnavailable(_)
        )
    }
}

pub type RepairResult<T> = std::result::Result<T, RepairError>;
