use datafusion::error::DataFusionError;
use thiserror::Error;

/// Errors surfaced synchronously by a spatial join invocation.
///
/// Configuration errors are raised before any indexing work starts. Data
/// errors abort the whole join instead of silently dropping a record.
#[derive(Error, Debug)]
pub enum ErrorCode {
    /// Unknown join type (`how`).
    #[error("Invalid join type '{value}', expected one of: {valid}")]
    InvalidJoinType { value: String, valid: String },

    /// Unknown spatial predicate (`op`).
    #[error("Invalid spatial predicate '{value}', expected one of: {valid}")]
    InvalidPredicate { value: String, valid: String },

    /// A geometry whose bounding box cannot be computed.
    #[error("Geometry {id} on the {side} side cannot be indexed: {reason}")]
    UnindexableGeometry {
        side: &'static str,
        id: usize,
        reason: String,
    },

    /// Two output columns would end up with the same name.
    #[error("Duplicate output column '{0}'")]
    DuplicateColumn(String),

    /// Arrow/DataFusion failure while materializing results.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorCode {
    /// True for errors caused by the join parameters rather than the data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidJoinType { .. }
                | ErrorCode::InvalidPredicate { .. }
                | ErrorCode::DuplicateColumn(_)
        )
    }
}

impl From<datafusion::arrow::error::ArrowError> for ErrorCode {
    fn from(e: datafusion::arrow::error::ArrowError) -> Self {
        ErrorCode::DataFusion(DataFusionError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, ErrorCode>;
