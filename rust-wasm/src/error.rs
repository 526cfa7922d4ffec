//! Error types for ROI reduction

/// Result type for ROI operations
pub type ReduceResult<T> = Result<T, ReduceError>;

/// Errors that can occur while reducing voxel data to regions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReduceError {
    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown mappable id: {0}")]
    UnknownMappable(String),

    #[error("NIfTI error: {0}")]
    Nifti(String),
}

impl ReduceError {
    pub(crate) fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        ReduceError::ShapeMismatch { what, expected, actual }
    }
}
