//! Typed error hierarchy for the autopilot.
//!
//! Four enums cover the subsystems:
//! - `AutopilotError`: the orchestration taxonomy surfaced to callers
//! - `StateError`: state record I/O, locking and schema violations
//! - `GitError`: local repository operations
//! - `ProviderError`: HTTP calls against GitHub / Azure DevOps

use std::path::PathBuf;

use thiserror::Error;

use crate::provider::ProviderKind;

/// Errors surfaced by the orchestrator.
///
/// Only `NotFound`, `Malformed`, `Config` and `ProviderAuthMissing` (under
/// require-integration) abort a run before side effects. `ProviderTransient`,
/// `PreconditionFailed` and `CheckFailed` become step details.
#[derive(Debug, Error)]
pub enum AutopilotError {
    #[error("Work item {identifier} not found: {reason}")]
    NotFound { identifier: String, reason: String },

    #[error("Story record {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("{provider} integration requires {}", .missing.join(", "))]
    ProviderAuthMissing {
        provider: ProviderKind,
        missing: Vec<&'static str>,
    },

    #[error("{provider} request failed: {detail}")]
    ProviderTransient {
        provider: ProviderKind,
        detail: String,
    },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Check '{name}' failed: {summary}")]
    CheckFailed { name: String, summary: String },

    #[error(
        "No pull request on record for {identifier}; re-run `autopilot start --push` with integration enabled"
    )]
    MissingPullRequest { identifier: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock state record at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} violates the state schema: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State file {path} belongs to {found}, expected {expected}")]
    IdentifierMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },
}

/// Errors from local git operations.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to open git repository at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("Git operation '{operation}' failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("Base branch '{0}' not found locally, on the remote, or at HEAD")]
    BaseNotFound(String),

    #[error("Failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git push failed: {0}")]
    Push(String),

    #[error("git fetch failed: {0}")]
    Fetch(String),
}

impl GitError {
    pub(crate) fn op(operation: &'static str) -> impl FnOnce(git2::Error) -> GitError {
        move |source| GitError::Operation { operation, source }
    }
}

/// Errors from a single HTTP call to a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication rejected (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("transient failure (HTTP {status}): {body}")]
    Transient { status: u16, body: String },

    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err)
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Network(err)
        }
    }
}

impl ProviderError {
    /// Rate limits, 5xx, timeouts and connection failures may succeed on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient { .. } | ProviderError::Timeout(_) | ProviderError::Network(_)
        )
    }
}
