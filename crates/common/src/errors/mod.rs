//! Error types for NewsForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Machine-readable error codes for callers
//! - Classification helpers used by the balancers and the queue

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Credential / balancer errors (1xxx)
    RateLimit,
    ExhaustedAllCredentials,
    AuthError,

    // Upstream errors (2xxx)
    UpstreamTransient,
    UpstreamError,

    // Cache errors (3xxx)
    CacheShardDown,
    CacheError,

    // Store errors (4xxx)
    StoreDown,
    StoreError,

    // Queue admission errors (5xxx)
    Duplicate,
    Invalid,
    TerminalEnrichmentFail,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Credentials (1xxx)
            ErrorCode::RateLimit => 1001,
            ErrorCode::ExhaustedAllCredentials => 1002,
            ErrorCode::AuthError => 1003,

            // Upstream (2xxx)
            ErrorCode::UpstreamTransient => 2001,
            ErrorCode::UpstreamError => 2002,

            // Cache (3xxx)
            ErrorCode::CacheShardDown => 3001,
            ErrorCode::CacheError => 3002,

            // Store (4xxx)
            ErrorCode::StoreDown => 4001,
            ErrorCode::StoreError => 4002,

            // Queue (5xxx)
            ErrorCode::Duplicate => 5001,
            ErrorCode::Invalid => 5002,
            ErrorCode::TerminalEnrichmentFail => 5003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Credential errors
    #[error("Rate limit hit on credential {credential}: {message}")]
    RateLimited { credential: usize, message: String },

    #[error("All credentials exhausted for {pool}")]
    ExhaustedAllCredentials { pool: String },

    #[error("Authentication rejected for credential {credential}: {message}")]
    AuthRejected { credential: usize, message: String },

    // Upstream errors
    #[error("Transient upstream failure: {message}")]
    UpstreamTransient { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    // Cache errors
    #[error("Cache shard {shard} unavailable: {message}")]
    CacheShardDown { shard: usize, message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    // Store errors
    #[error("Document store unavailable: {message}")]
    StoreDown { message: String },

    #[error("Document store error: {0}")]
    Store(#[from] sea_orm::DbErr),

    // Queue admission errors
    #[error("Duplicate job: {job_id}")]
    DuplicateJob { job_id: String },

    #[error("Invalid job submission: {message}")]
    InvalidJob { message: String },

    #[error("Enrichment failed terminally for {article_id}: {message}")]
    TerminalEnrichmentFail { article_id: String, message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::RateLimited { .. } => ErrorCode::RateLimit,
            AppError::ExhaustedAllCredentials { .. } => ErrorCode::ExhaustedAllCredentials,
            AppError::AuthRejected { .. } => ErrorCode::AuthError,
            AppError::UpstreamTransient { .. } => ErrorCode::UpstreamTransient,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::CacheShardDown { .. } => ErrorCode::CacheShardDown,
            AppError::Cache { .. } => ErrorCode::CacheError,
            AppError::StoreDown { .. } => ErrorCode::StoreDown,
            AppError::Store(_) => ErrorCode::StoreError,
            AppError::DuplicateJob { .. } => ErrorCode::Duplicate,
            AppError::InvalidJob { .. } => ErrorCode::Invalid,
            AppError::TerminalEnrichmentFail { .. } => ErrorCode::TerminalEnrichmentFail,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Credential hit its daily quota
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AppError::RateLimited { .. })
    }

    /// Credential was rejected outright (401/403); permanent for the process
    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::AuthRejected { .. })
    }

    /// Transport or 5xx failure worth retrying on another credential
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamTransient { .. } | AppError::Upstream { .. }
        )
    }

    /// Errors the enrichment worker should bubble for queue-level backoff
    /// rather than falling back immediately
    pub fn is_retryable_enrichment(&self) -> bool {
        self.is_rate_limit()
            || self.is_transient()
            || matches!(self, AppError::ExhaustedAllCredentials { .. })
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AppError::UpstreamTransient {
                message: err.to_string(),
            }
        } else {
            AppError::Upstream {
                message: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::RateLimited {
            credential: 2,
            message: "quota".into(),
        };
        assert_eq!(err.code(), ErrorCode::RateLimit);
        assert!(err.is_rate_limit());
        assert!(err.is_retryable_enrichment());
    }

    #[test]
    fn test_auth_is_not_transient() {
        let err = AppError::AuthRejected {
            credential: 1,
            message: "bad key".into(),
        };
        assert!(err.is_auth());
        assert!(!err.is_transient());
        assert!(!err.is_retryable_enrichment());
    }

    #[test]
    fn test_exhausted_bubbles_for_backoff() {
        let err = AppError::ExhaustedAllCredentials {
            pool: "ai".into(),
        };
        assert_eq!(err.code().as_code(), 1002);
        assert!(err.is_retryable_enrichment());
    }
}
