//! Error types for pin-relay
//!
//! This module provides the error hierarchy for the library:
//! - [`Error`]: crate-wide error returned by fallible operations
//! - [`DatabaseError`]: state store failures with context
//! - [`DeliveryError`]: delivery channel failures, classified as transient or permanent
//!
//! Most operational failures never reach the caller of
//! [`Pipeline::run`](crate::pipeline::Pipeline::run); they are absorbed and
//! reflected in the returned counts. These types exist for the layers below it.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pin-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pin-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "delivery.images_per_album")
        key: Option<String>,
    },

    /// State store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error (staging directory, staged files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Upstream HTTP endpoint answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Api {
        /// HTTP status code returned
        status: u16,
        /// The URL that was requested
        url: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Delivery channel error
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors reported by a [`DeliveryChannel`](crate::delivery::DeliveryChannel)
///
/// The channel accepts or rejects a whole album; there is no partial success.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The send call timed out
    #[error("delivery timed out")]
    Timeout,

    /// The channel asked us to slow down
    #[error("rate limited by delivery channel (retry after {retry_after:?})")]
    RateLimited {
        /// Wait requested by the channel, if it told us
        retry_after: Option<Duration>,
    },

    /// The channel refused the album (bad request, forbidden chat, etc.)
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// Connection-level failure talking to the channel
    #[error("delivery transport failure: {0}")]
    Transport(String),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_message_includes_status_and_url() {
        let err = Error::Api {
            status: 503,
            url: "https://example.com/search".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503 from https://example.com/search");
    }

    #[test]
    fn delivery_error_converts_into_crate_error() {
        let err: Error = DeliveryError::Timeout.into();
        assert!(matches!(err, Error::Delivery(DeliveryError::Timeout)));
        assert_eq!(err.to_string(), "delivery error: delivery timed out");
    }

    #[test]
    fn database_error_wraps_with_context() {
        let err: Error = DatabaseError::QueryFailed("images is locked".into()).into();
        assert_eq!(err.to_string(), "database error: query failed: images is locked");
    }
}
