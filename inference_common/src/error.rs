use std::path::PathBuf;

use thiserror::Error;

/// Failures a pipeline run can report to its front-end.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file {0:?} does not exist")]
    InvalidInputPath(PathBuf),

    #[error("could not open video {path:?}: {reason}")]
    OpenError { path: PathBuf, reason: String },

    #[error("could not create output video {path:?}: {reason}")]
    CreateError { path: PathBuf, reason: String },

    #[error("confidence threshold {value} must lie between {min:.1} and {max:.1}")]
    InvalidThreshold { value: f32, min: f32, max: f32 },

    #[error(transparent)]
    Processing(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OpenError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn create(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CreateError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
