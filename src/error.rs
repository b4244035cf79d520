/*!
 * Error handling for diabetes analytics operations
 *
 * Distinguishes an unreachable store from a failed store operation, and carries
 * suggestions for the errors a user can act on. Malformed patient fields are not
 * errors at all: see [`crate::data_types::Field`].
 */

use std::fmt;
use thiserror::Error;
use serde::{Serialize, Deserialize};

/// Analytics library result type
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// The store is unreachable or the liveness probe failed
    #[error("Store connectivity error: {message}")]
    Connectivity {
        message: String,
        suggestion: Option<String>,
    },

    /// A read or write failed after connectivity was established
    #[error("Store operation '{operation}' failed: {message}")]
    StoreOperation {
        operation: StoreOperation,
        message: String,
        timed_out: bool,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Result rendering errors
    #[error("Serialization error ({format}): {message}")]
    Serialization {
        message: String,
        format: ExportFormat,
    },
}

/// Store operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOperation {
    Ping,
    GetHash,
    SetCardinality,
    SetMembers,
    IsMember,
    AddMembers,
    IntersectInto,
    Delete,
    TopByScore,
    RangeByScore,
    SortedCardinality,
    KeysByPrefix,
    ServerInfo,
    KeyCount,
}

impl StoreOperation {
    /// Underlying store command name
    pub fn command(&self) -> &'static str {
        match self {
            StoreOperation::Ping => "PING",
            StoreOperation::GetHash => "HGETALL",
            StoreOperation::SetCardinality => "SCARD",
            StoreOperation::SetMembers => "SMEMBERS",
            StoreOperation::IsMember => "SISMEMBER",
            StoreOperation::AddMembers => "SADD",
            StoreOperation::IntersectInto => "SINTERSTORE",
            StoreOperation::Delete => "DEL",
            StoreOperation::TopByScore => "ZREVRANGE",
            StoreOperation::RangeByScore => "ZRANGEBYSCORE",
            StoreOperation::SortedCardinality => "ZCARD",
            StoreOperation::KeysByPrefix => "SCAN",
            StoreOperation::ServerInfo => "INFO",
            StoreOperation::KeyCount => "DBSIZE",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Output format for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "JSON"),
            ExportFormat::Csv => write!(f, "CSV"),
        }
    }
}

/// Serializable all-or-nothing failure of one aggregation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationFailure {
    pub error: String,
}

impl From<&AnalyticsError> for AggregationFailure {
    fn from(err: &AnalyticsError) -> Self {
        Self { error: err.to_string() }
    }
}

impl AnalyticsError {
    /// Create a connectivity error with a hint about where the store was expected
    pub fn unreachable(url: &str, reason: impl Into<String>) -> Self {
        Self::Connectivity {
            message: format!("cannot reach store at '{}': {}", url, reason.into()),
            suggestion: Some(
                "Make sure the Redis server is running and the URL in DIABSTATS_REDIS_URL \
                or the config file is correct"
                    .to_string(),
            ),
        }
    }

    /// Create a store operation error
    pub fn store(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::StoreOperation {
            operation,
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create a store operation error that hit the command timeout
    pub fn timeout(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::StoreOperation {
            operation,
            message: message.into(),
            timed_out: true,
        }
    }

    /// Re-tag a redis client error with the operation it belonged to
    pub fn from_redis(operation: StoreOperation, err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::timeout(operation, err.to_string())
        } else {
            Self::store(operation, err.to_string())
        }
    }

    /// Whether the error means the store could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    /// Whether the error was produced by a bounded store timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StoreOperation { timed_out: true, .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::Connectivity { suggestion: Some(sug), .. }
            | Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::StoreOperation { timed_out: true, .. } => {
                format!(
                    "{}\n\nSuggestion: raise command_timeout_ms if the store is under heavy load",
                    self
                )
            }
            _ => self.to_string(),
        }
    }

    /// Structured failure record for the presentation layer
    pub fn to_failure(&self) -> AggregationFailure {
        AggregationFailure::from(self)
    }
}

// Convenience conversions
impl From<std::io::Error> for AnalyticsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for AnalyticsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
            format: ExportFormat::Json,
        }
    }
}

impl From<csv::Error> for AnalyticsError {
    fn from(err: csv::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
            format: ExportFormat::Csv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_message() {
        let err = AnalyticsError::store(StoreOperation::IntersectInto, "WRONGTYPE");
        let failure = err.to_failure();
        assert_eq!(failure.error, "Store operation 'SINTERSTORE' failed: WRONGTYPE");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_flag() {
        let err = AnalyticsError::timeout(StoreOperation::GetHash, "read timed out");
        assert!(err.is_timeout());
        assert!(err.user_message().contains("command_timeout_ms"));
    }

    #[test]
    fn test_connectivity_suggestion() {
        let err = AnalyticsError::unreachable("redis://127.0.0.1:6379/0", "connection refused");
        assert!(err.is_connectivity());
        assert!(err.user_message().contains("Suggestion:"));
    }
}
