/// Centralized error types for the subgraph feed
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    // Upstream Errors
    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Pagination stalled: {0}")]
    PaginationStalled(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Request Errors
    #[error("Invalid time range: {0}")]
    Range(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Storage Errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Lifecycle Errors
    #[error("API server error: {0}")]
    Server(String),

    #[error("Startup barrier timed out: {0}")]
    BarrierTimeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, FeedError>;

impl FeedError {
    /// Check if a polling cycle may simply be retried on the next tick
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FeedError::TransientFetch(_)
                | FeedError::HttpError(_)
                | FeedError::Upstream(_)
                | FeedError::Storage(_)
        )
    }

    /// Check if the error should stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::ConfigError(_) | FeedError::BarrierTimeout(_) | FeedError::Server(_)
        )
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            FeedError::TransientFetch(_) => "NET_001",
            FeedError::Upstream(_) => "NET_002",
            FeedError::PaginationStalled(_) => "NET_003",
            FeedError::HttpError(_) => "NET_004",
            FeedError::DeserializationError(_) => "DATA_001",
            FeedError::Range(_) => "REQ_001",
            FeedError::NotFound(_) => "REQ_002",
            FeedError::NoData(_) => "REQ_003",
            FeedError::InvalidParameter(_) => "REQ_004",
            FeedError::Storage(_) => "STORE_001",
            FeedError::FileError(_) => "FILE_001",
            FeedError::Server(_) => "SYS_002",
            FeedError::BarrierTimeout(_) => "SYS_001",
            FeedError::ConfigError(_) => "CFG_001",
            FeedError::InternalError(_) => "INT_001",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(FeedError::TransientFetch("503".into()).is_recoverable());
        assert!(!FeedError::Range("start >= end".into()).is_recoverable());
        assert!(FeedError::BarrierTimeout("WBTC".into()).is_fatal());
        assert_eq!(FeedError::NoData("WBTC".into()).error_code(), "REQ_003");
    }
}
