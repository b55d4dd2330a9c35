//! Error taxonomy for the preprocessing pipeline and metrics.
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// All failure modes surfaced by the core.
///
/// Configuration and shape errors indicate a misconfigured run and abort the
/// pass; `SliceIo` identifies a single bad slice so the caller can exclude or
/// re-fetch it without losing the rest of the batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Filter arity mismatch, out-of-range channel index, or a transform
    /// pipeline referencing parameters the data cannot satisfy.
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Split strategy name not in the recognized set.
    #[error("unknown split strategy `{0}`")]
    UnknownStrategy(String),

    /// Split fractions out of range, not summing to 1, or producing an empty
    /// split where at least one record is expected.
    #[error("invalid split fractions: {0}")]
    InvalidFractions(String),

    /// A slice's channel count disagrees with the normalization statistics'.
    #[error("channel count mismatch: expected {expected} channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// The statistics artifact cannot be written or read back.
    #[error("statistics artifact at `{}`: {message}", .path.display())]
    StatsPersistence { path: PathBuf, message: String },

    /// Filtering or splitting produced nothing for a stage that requires at
    /// least one record.
    #[error("empty selection: {0}")]
    EmptySelection(String),

    /// Predicted and ground-truth tensors disagree in shape.
    #[error("tensor shape mismatch: predicted {pred:?}, ground truth {truth:?}")]
    ShapeMismatch { pred: Vec<usize>, truth: Vec<usize> },

    /// One slice's arrays could not be read or written. Isolated per slice;
    /// never aborts the surrounding pass.
    #[error("slice `{id}`: {message}")]
    SliceIo { id: String, message: String },

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
