//! Error types for chained generation.

use std::path::PathBuf;

/// Result type alias using [`ChainError`].
pub type Result<T> = std::result::Result<T, ChainError>;

/// Everything that can stop a stage.
///
/// Every variant is fatal to the stage it occurs in, and the orchestrator
/// stops the chain at the first one.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Tempo or step resolution that cannot produce a positive step duration.
    #[error("invalid time base: qpm={qpm}, steps_per_quarter={steps_per_quarter} (both must be > 0)")]
    InvalidTimeBase { qpm: f64, steps_per_quarter: u32 },

    /// The primer carries more than one tempo record.
    #[error("primer has {count} tempo records; only a single tempo is supported")]
    MultipleTempos { count: usize },

    /// The requested length leaves no room after the primer.
    #[error(
        "total length in steps too small ({total_steps}), needs to be at least one step longer than the primer ({primer_steps})"
    )]
    InsufficientLength { total_steps: u64, primer_steps: u64 },

    /// A primer file, stage output, or bundle reference did not resolve.
    #[error("not found: {reference}")]
    NotFound { reference: String },

    /// The external generator failed.
    #[error("generation failed at stage {stage}: {message}")]
    Generation { stage: usize, message: String },

    /// The schedule failed validation before anything ran.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// MIDI decode or encode failure.
    #[error("midi: {0}")]
    Midi(String),

    /// Artifact storage failure.
    #[error("storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    /// Bundle download or cache failure.
    #[error("bundle {name}: {message}")]
    Bundle { name: String, message: String },

    /// The run was cancelled before this stage started.
    #[error("cancelled before stage {stage} started")]
    Cancelled { stage: usize },
}

impl ChainError {
    pub(crate) fn storage(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

impl From<midly::Error> for ChainError {
    fn from(error: midly::Error) -> Self {
        ChainError::Midi(error.to_string())
    }
}
