use thiserror::Error;

/// Main error type for tiercache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Memory budget exceeded: requested {requested_mb:.1}MB with {current_mb:.1}MB in use, limit {limit_mb}MB")]
    CapacityExceeded {
        requested_mb: f64,
        current_mb: f64,
        limit_mb: u64,
    },

    #[error("Process memory statistics unavailable")]
    MeasurementUnavailable,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for tiercache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e.to_string())
    }
}
