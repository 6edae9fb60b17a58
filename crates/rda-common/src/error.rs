//! Error types for the RDA client crates.

use thiserror::Error;

/// Result type alias using RdaError.
pub type RdaResult<T> = Result<T, RdaError>;

/// Primary error type for RDA operations.
#[derive(Debug, Error)]
pub enum RdaError {
    // === Window / geometry errors ===
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("requested window out of image: {0}")]
    OutOfImage(String),

    #[error("non-invertible geo transform: {0}")]
    NonInvertible(String),

    // === Template graph errors ===
    #[error("template graph has {total} nodes but only {unique} unique node ids")]
    DuplicateNode { unique: usize, total: usize },

    #[error("node id {0:?} is not listed in the template graph")]
    UnknownEndpoint(String),

    #[error("template graph contains a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    // === Data model errors ===
    #[error("data type {0:?} has no GDAL mapping")]
    UnknownDataType(String),

    #[error("unknown batch format {0:?}")]
    UnknownBatchFormat(String),

    #[error("job {job_id} is in state {state:?}")]
    BadJobState { job_id: String, state: String },

    // === Transport errors ===
    #[error("HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("server error: {0}")]
    ServerError(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Sentinel for a caller-requested cancellation. Suppressed from
    /// aggregation; callers observe it only through their own signal.
    #[error("operation cancelled")]
    Cancelled,

    #[error("{}", render_aggregate(.0))]
    Aggregate(Vec<RdaError>),
}

impl RdaError {
    /// Collect per-item failures into a single `Aggregate`, dropping the
    /// `Cancelled` sentinel. Returns `None` when nothing remains.
    pub fn aggregate(errors: Vec<RdaError>) -> Option<RdaError> {
        let kept: Vec<RdaError> = errors
            .into_iter()
            .filter(|e| !matches!(e, RdaError::Cancelled))
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(RdaError::Aggregate(kept))
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RdaError::Cancelled)
    }
}

impl From<serde_json::Error> for RdaError {
    fn from(err: serde_json::Error) -> Self {
        RdaError::ServerError(format!("JSON error: {}", err))
    }
}

fn render_aggregate(errors: &[RdaError]) -> String {
    let mut s = format!("{} error(s) during realization:\n", errors.len());
    for (i, err) in errors.iter().enumerate() {
        s.push_str(&format!("\terror {}: {}\n", i + 1, err));
    }
    s
}
