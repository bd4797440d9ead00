// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::StatusCode;

/// Errors raised while reading configuration from the environment
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Errors raised when handing a message to the intake queue
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Intake queue is closed")]
    Closed,
}

/// Errors raised by a bounded store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while reading from the analytical store
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Analytical store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Analytical store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unable to decode analytical row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No analytical store connection available")]
    ConnectionUnavailable,

    #[error("Invalid query parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },
}

impl QueryError {
    /// Status code used when this error is surfaced over HTTP.
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            QueryError::ConnectionUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::Request(_) | QueryError::Status { .. } => StatusCode::BAD_GATEWAY,
            QueryError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidConfig("retention must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: retention must be greater than 0"
        );

        let error = ConfigError::InvalidValue {
            name: "RECON_PORT",
            value: "eighty".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid value for RECON_PORT: eighty");
    }

    #[test]
    fn test_intake_error_display() {
        assert_eq!(IntakeError::Closed.to_string(), "Intake queue is closed");
    }

    #[test]
    fn test_query_error_status_codes() {
        let invalid = QueryError::InvalidParameter {
            name: "limit",
            value: "abc".to_string(),
        };
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let status = QueryError::Status {
            status: 500,
            body: "Code: 60. Table doesn't exist".to_string(),
        };
        assert_eq!(status.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status.to_string(),
            "Analytical store returned 500: Code: 60. Table doesn't exist"
        );

        assert_eq!(
            QueryError::ConnectionUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
