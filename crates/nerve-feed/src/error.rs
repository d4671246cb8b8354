//! Error types for the live feed

use std::time::Duration;
use thiserror::Error;

/// Feed result type
pub type Result<T> = std::result::Result<T, NerveError>;

/// Errors that can occur in the feed
///
/// Source adapters never surface these past their boundary; they are turned
/// into fallback values plus an error note. Everything else (config loading,
/// subscriber delivery, query surface) propagates them normally.
#[derive(Error, Debug)]
pub enum NerveError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Region is not tracked by this process
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    /// Upstream source returned something we could not use
    #[error("Source error: {0}")]
    Source(String),

    /// Sending to a subscriber failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// A scrape cycle failed as a whole
    #[error("Cycle error: {0}")]
    Cycle(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NerveError {
    /// Create a source error
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a cycle error
    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::Cycle(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the caller asked for something that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownRegion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NerveError::UnknownRegion("mars-north".to_string());
        assert_eq!(err.to_string(), "Unknown region: mars-north");
        assert!(err.is_not_found());

        let err = NerveError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "Operation timed out after 10s");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(NerveError::source("bad"), NerveError::Source(m) if m == "bad"));
        assert!(matches!(NerveError::config("x"), NerveError::Config(_)));
        assert!(matches!(NerveError::delivery("x"), NerveError::Delivery(_)));
        assert!(matches!(NerveError::cycle("x"), NerveError::Cycle(_)));
    }
}
