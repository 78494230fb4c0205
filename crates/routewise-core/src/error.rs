//! Error types for Routewise

use thiserror::Error;

/// Result type alias using Routewise's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Routewise error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (E100-E199)
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Routing errors (E200-E299)
    #[error("No models available for tier {0}")]
    RoutingExhausted(String),

    // Provider errors (E300-E399)
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rate limited. Retry after {0} seconds.")]
    RateLimited(u64),

    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Network error: {0}. Check your internet connection.")]
    Network(#[from] reqwest::Error),

    // Storage errors (E400-E499)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Input errors (E500-E599)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "E100",
            Self::RoutingExhausted(_) => "E200",
            Self::Provider(_) => "E300",
            Self::RateLimited(_) => "E301",
            Self::Timeout(_) => "E302",
            Self::Cancelled => "E303",
            Self::Network(_) => "E304",
            Self::Storage(_) => "E400",
            Self::Database(_) => "E401",
            Self::Serialization(_) => "E402",
            Self::InvalidInput(_) => "E500",
            Self::Other(_) | Self::Io(_) => "E999",
        }
    }

    /// Whether a failed provider call may succeed on another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::RateLimited(_) | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Whether a database error means the file is damaged or not SQLite at all
    pub fn is_corrupt_database(&self) -> bool {
        let Self::Database(sqlx::Error::Database(db)) = self else {
            return false;
        };
        // SQLITE_CORRUPT (11) and SQLITE_NOTADB (26); extended codes keep the primary in the low byte
        db.code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 11 | 26))
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Configuration(_) => {
                Some("Model ids must have the form provider/model".to_string())
            }
            Self::RoutingExhausted(_) => Some("routewise config list".to_string()),
            Self::Network(_) => Some("Check internet connection".to_string()),
            Self::RateLimited(secs) => Some(format!("Wait {} seconds and retry", secs)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Configuration("bad".into()).code(), "E100");
        assert_eq!(Error::RoutingExhausted("local".into()).code(), "E200");
        assert_eq!(Error::Timeout(10).code(), "E302");
        assert_eq!(Error::Other("x".into()).code(), "E999");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Provider("503".into()).is_retryable());
        assert!(Error::RateLimited(5).is_retryable());
        assert!(Error::Timeout(100).is_retryable());
        assert!(!Error::Configuration("bad id".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_only_database_errors_are_corruption() {
        assert!(!Error::Database(sqlx::Error::PoolTimedOut).is_corrupt_database());
        assert!(!Error::Other("file is not a database".into()).is_corrupt_database());
    }

    #[test]
    fn test_routing_exhausted_message() {
        let err = Error::RoutingExhausted("classification".into());
        assert_eq!(err.to_string(), "No models available for tier classification");
    }
}
