//! Error types for search jobs.

use crate::model::ResultKind;
use std::time::Duration;
use thiserror::Error;

/// A failed exchange with the search API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// The service rate-limits with HTTP 429.
    pub fn is_throttled(&self) -> bool {
        matches!(self, ApiError::Status { status: 429, .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Errors surfaced by job controllers and result sequences.
///
/// Cloneable so a single controller failure can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("failed to create search job: {0}")]
    Creation(ApiError),

    #[error(
        "no credentials: set SUMO_LOGIC_ACCESS_ID and SUMO_LOGIC_ACCESS_KEY or pass them explicitly"
    )]
    MissingCredentials,

    #[error("result kind must be either messages or records, got {0:?}")]
    InvalidKind(String),

    #[error("search job status check failed: {0}")]
    Status(ApiError),

    #[error("search job was cancelled")]
    JobCancelled,

    #[error("failed to fetch {kind}s: {source}")]
    Fetch { kind: ResultKind, source: ApiError },

    #[error("still throttled fetching {kind}s after {attempts} attempts")]
    Throttled { kind: ResultKind, attempts: u32 },

    #[error("no {kind}s were found after {attempts} attempts ({waited:?} elapsed)")]
    NoResults {
        kind: ResultKind,
        attempts: u32,
        waited: Duration,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

pub type SearchResult<T> = Result<T, SearchError>;

impl SearchError {
    /// Whether the error ends the whole job rather than a single sequence.
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(
            self,
            SearchError::Creation(_)
                | SearchError::MissingCredentials
                | SearchError::Status(_)
                | SearchError::JobCancelled
                | SearchError::Client(_)
        )
    }
}
