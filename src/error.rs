//! Error taxonomy for the computational core.
//!
//! The core never touches the network or the database, so every failure here
//! is either "not enough data to compute" (expected, common for new cities or
//! API gaps) or a defect in how the core was called. Collaborators at the
//! application layer wrap these in `anyhow` errors.

use thiserror::Error;

// ---

/// Errors raised by AQI, feature, forecast and risk computations.
#[derive(Debug, Error)]
pub enum CoreError {
    // ---
    /// Fewer rows than a window, lag depth or minimum series length needs.
    #[error("insufficient data for {context}: need at least {required} rows, got {available}")]
    InsufficientData {
        context: &'static str,
        required: usize,
        available: usize,
    },

    /// A prediction row lacks a column the trained model expects.
    #[error("schema mismatch: trained model expects column `{column}`")]
    SchemaMismatch { column: String },

    /// The requested target column is not present in the feature table.
    #[error("unknown target column `{column}`")]
    UnknownTarget { column: String },

    /// A series was built from measurements of more than one city.
    #[error("series for `{expected}` contains a measurement for `{found}`")]
    MixedSeries { expected: String, found: String },

    /// Numerical fitting failed (singular system, non-finite likelihood).
    #[error("model fit failed: {0}")]
    ModelFit(String),
}

impl CoreError {
    /// Whether this error means "no data" rather than a computation defect.
    ///
    /// Presentation layers use this to show an empty state instead of an
    /// error banner.
    pub fn is_no_data(&self) -> bool {
        // ---
        matches!(self, CoreError::InsufficientData { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
