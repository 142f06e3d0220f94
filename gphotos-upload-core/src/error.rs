use std::path::PathBuf;

use crate::contract::CallError;

/// Everything that can end a pipeline run.
///
/// Only the first genuine failure of a run is reported; stages that stop
/// because another stage already failed return [`PipelineError::Cancelled`],
/// which the coordinator swallows.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error uploading {path:?} after {attempts} attempt(s)")]
    Upload {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: CallError,
    },

    #[error("error committing batch of {size} token(s) after {attempts} attempt(s)")]
    Commit {
        size: usize,
        attempts: u32,
        #[source]
        source: CallError,
    },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("pipeline task failed")]
    TaskFailed(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// True for errors caused by the shared cancellation signal rather than by a failing stage.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
