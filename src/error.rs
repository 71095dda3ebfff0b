//! Error types for the loss engine

use thiserror::Error;

/// Result type for loss-engine operations
pub type Result<T> = std::result::Result<T, LossError>;

/// Errors that can occur while configuring or evaluating the loss
#[derive(Error, Debug)]
pub enum LossError {
    /// Differentiation was requested on points that are not linked into the
    /// prediction's autodiff graph (e.g. `requires_grad` was never set, or
    /// the forward pass detached them).
    #[error("invalid computation graph: {0}")]
    InvalidComputationGraph(String),

    /// The loss recipe string does not name any known recipe.
    #[error("unrecognized loss configuration: {0:?}")]
    UnrecognizedConfiguration(String),

    /// The annealing schedule control points are malformed.
    #[error("malformed annealing schedule: {0}")]
    MalformedSchedule(String),

    /// The decay mode string does not name any known mode.
    #[error("unsupported decay mode: {0:?}")]
    UnsupportedDecayMode(String),

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A required input tensor was not supplied.
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    /// Point and prediction tensors disagree on rank or leading dimensions.
    #[error("tensor shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Expected shape, rendered as a string.
        expected: String,
        /// Actual shape, rendered as a string.
        got: String,
    },
}
