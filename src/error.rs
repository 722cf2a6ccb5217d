//! Error taxonomy for the ingestion and query paths.
//!
//! Per-record problems (normalization rejection, a single failed write) are
//! absorbed where they happen and never show up here as run failures. A
//! [`FetchError`] aborts the current ingestion run. Everything a query
//! caller can see is a [`GatewayError`].

use thiserror::Error;

/// Failure talking to the upstream report feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Transport(String),
    #[error("feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("feed response could not be decoded: {0}")]
    Decode(String),
    #[error("feed request timed out after {0}s")]
    Timeout(u64),
}

/// A single report that could not be written.
#[derive(Debug, Error)]
#[error("failed to write report {report_id}: {message}")]
pub struct WriteError {
    pub report_id: i64,
    pub message: String,
}

/// The language model could not produce a usable query.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("query generation is disabled (model.provider = \"disabled\")")]
    Disabled,
    #[error("model call failed: {0}")]
    Model(String),
    #[error("model call timed out after {0}s")]
    Timeout(u64),
    #[error("model response did not match the expected shape: {0}")]
    Parse(String),
}

/// The quota backend itself failed (not the same as being over quota).
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("quota store unavailable: {0}")]
    Unavailable(String),
}

/// Everything `handle_query` can surface to its caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("query limit reached; {remaining} remaining in the current window")]
    RateLimited { remaining: u64 },
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("generated query was rejected ({reason}): {query}")]
    Rejected { query: String, reason: String },
    #[error("generated query failed: {message}")]
    Execution { query: String, message: String },
    #[error("generated query timed out after {seconds}s")]
    ExecutionTimeout { query: String, seconds: u64 },
    #[error(transparent)]
    Quota(#[from] QuotaError),
}

impl GatewayError {
    /// The generated query string, when the failure happened after translation.
    pub fn query(&self) -> Option<&str> {
        match self {
            GatewayError::Rejected { query, .. }
            | GatewayError::Execution { query, .. }
            | GatewayError::ExecutionTimeout { query, .. } => Some(query),
            _ => None,
        }
    }
}
