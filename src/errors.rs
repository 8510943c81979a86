//! Error taxonomy for the collection pipeline.
//!
//! Only [`StorageError::Database`] raised while the store itself is unreachable
//! is fatal to a run; everything else is isolated to the pool it happened on.

use thiserror::Error;

/// Failure talking to an upstream data provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status} for {endpoint}")]
    Status {
        provider: String,
        endpoint: String,
        status: u16,
    },
    #[error("{provider} rate limited request to {endpoint} (429)")]
    RateLimited { provider: String, endpoint: String },
    #[error("{provider} request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout {
        provider: String,
        endpoint: String,
        timeout_ms: u64,
    },
    #[error("{provider} network failure for {endpoint}: {message}")]
    Network {
        provider: String,
        endpoint: String,
        message: String,
    },
    #[error("{provider} returned an unexpected payload for {endpoint}: {message}")]
    Decode {
        provider: String,
        endpoint: String,
        message: String,
    },
}

impl ProviderError {
    /// Whether retrying the same request can succeed.
    ///
    /// Client errors other than 429 and undecodable payloads are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => *status >= 500 || *status == 408,
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::Network { .. } => true,
            ProviderError::Decode { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            ProviderError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ProviderError::Status { endpoint, .. }
            | ProviderError::RateLimited { endpoint, .. }
            | ProviderError::Timeout { endpoint, .. }
            | ProviderError::Network { endpoint, .. }
            | ProviderError::Decode { endpoint, .. } => endpoint,
        }
    }
}

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Uniqueness violation. Callers treat this as a duplicate, not a failure.
    #[error("unique constraint conflict on {table}")]
    Conflict { table: &'static str },
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

impl StorageError {
    /// Classifies a driver error by kind rather than by message text.
    pub fn classify(err: sqlx::Error, table: &'static str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) {
                return StorageError::Conflict { table };
            }
        }
        StorageError::Database(err)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Samples rejected by the quality validator.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("quality check failed: {message} ({valid_points}/{total_points} valid)")]
pub struct QualityError {
    pub message: String,
    pub valid_points: usize,
    pub total_points: usize,
}

/// Reason a single pool's backfill stopped without reaching its target.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("provider failed after {attempts} attempts: {source}")]
    Provider {
        attempts: usize,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Quality(#[from] QualityError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = Result<T, StorageError>;
