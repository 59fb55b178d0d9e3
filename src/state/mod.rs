//! Persisted per-identifier autopilot state.
//!
//! The record only ever holds identifiers, credential-free URLs, timestamps and
//! enums. Every string field goes through an allow-listed newtype at the serde
//! boundary and unknown fields are rejected on load, so a token can neither be
//! written nor smuggled in by a hand-edited file.

mod store;

pub use store::StateStore;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// Workflow steps, in the order they can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Resolve,
    EnsureBranch,
    WriteReviewPack,
    Commit,
    Push,
    TrackerItem,
    PullRequest,
    Link,
    LoadState,
    RunChecks,
    Render,
    UpsertComment,
    PersistState,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Resolve => "resolve",
            Step::EnsureBranch => "ensure_branch",
            Step::WriteReviewPack => "write_review_pack",
            Step::Commit => "commit",
            Step::Push => "push",
            Step::TrackerItem => "tracker_item",
            Step::PullRequest => "pull_request",
            Step::Link => "link",
            Step::LoadState => "load_state",
            Step::RunChecks => "run_checks",
            Step::Render => "render",
            Step::UpsertComment => "upsert_comment",
            Step::PersistState => "persist_state",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced when a value fails an allow-list check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} rejected: {reason}")]
pub struct InvalidValue {
    kind: &'static str,
    reason: String,
}

impl InvalidValue {
    fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

macro_rules! string_newtype {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidValue;
            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }
    };
}

/// Remote identifier: issue numbers, GUID-free work item IDs, `owner/repo`,
/// project names, `thread:comment` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SafeId(String);

string_newtype!(SafeId);

impl SafeId {
    const MAX_LEN: usize = 200;

    pub fn parse(value: &str) -> Result<Self, InvalidValue> {
        if value.is_empty() || value.len() > Self::MAX_LEN {
            return Err(InvalidValue::new("identifier", "empty or too long"));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '/' | ':')))
        {
            return Err(InvalidValue::new(
                "identifier",
                format!("character {bad:?} not allowed"),
            ));
        }
        Ok(Self(value.to_string()))
    }
}

/// An http(s) URL with no userinfo, query or fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SafeUrl(String);

string_newtype!(SafeUrl);

impl SafeUrl {
    pub fn parse(value: &str) -> Result<Self, InvalidValue> {
        let url = reqwest::Url::parse(value).map_err(|e| InvalidValue::new("url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(InvalidValue::new("url", "scheme must be http or https"));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(InvalidValue::new("url", "embedded credentials"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(InvalidValue::new("url", "query or fragment present"));
        }
        Ok(Self(url.as_str().trim_end_matches('/').to_string()))
    }
}

/// A git branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

string_newtype!(RefName);

impl RefName {
    pub fn parse(value: &str) -> Result<Self, InvalidValue> {
        let invalid = value.is_empty()
            || value.starts_with('-')
            || value.starts_with('/')
            || value.ends_with('/')
            || value.ends_with(".lock")
            || value.contains("..")
            || value.contains("@{")
            || value
                .chars()
                .any(|c| c.is_control() || c.is_whitespace() || "~^:?*[\\".contains(c));
        if invalid {
            return Err(InvalidValue::new("ref", format!("{value:?} is not a branch name")));
        }
        Ok(Self(value.to_string()))
    }
}

/// Lower-case hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexDigest(String);

string_newtype!(HexDigest);

impl HexDigest {
    pub fn parse(value: &str) -> Result<Self, InvalidValue> {
        if value.len() != 64 || !value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(InvalidValue::new("digest", "expected 64 lower-case hex digits"));
        }
        Ok(Self(value.to_string()))
    }
}

/// Where later runs find the remote resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum RemoteCoordinates {
    Github {
        api_url: SafeUrl,
        repo: SafeId,
    },
    AzureDevops {
        org_url: SafeUrl,
        project: SafeId,
        repo: SafeId,
        work_item_type: SafeId,
    },
}

/// The persisted record at `<state_dir>/<identifier>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutopilotState {
    pub identifier: SafeId,
    pub branch: Option<RefName>,
    pub base_branch: Option<RefName>,
    pub provider: Option<ProviderKind>,
    pub remote: Option<RemoteCoordinates>,
    pub tracker_item_id: Option<SafeId>,
    pub tracker_item_url: Option<SafeUrl>,
    pub pull_request_id: Option<SafeId>,
    pub pull_request_url: Option<SafeUrl>,
    pub evidence_comment_id: Option<SafeId>,
    pub evidence_digest: Option<HexDigest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_steps: Vec<Step>,
}

impl AutopilotState {
    pub fn new(identifier: SafeId, now: DateTime<Utc>) -> Self {
        Self {
            identifier,
            branch: None,
            base_branch: None,
            provider: None,
            remote: None,
            tracker_item_id: None,
            tracker_item_url: None,
            pull_request_id: None,
            pull_request_url: None,
            evidence_comment_id: None,
            evidence_digest: None,
            created_at: now,
            updated_at: now,
            completed_steps: Vec::new(),
        }
    }

    /// Apply an update: present fields overwrite, absent fields keep their
    /// value, completed steps are unioned in first-seen order.
    pub fn merge(&mut self, update: StateUpdate, now: DateTime<Utc>) {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        set(&mut self.branch, update.branch);
        set(&mut self.base_branch, update.base_branch);
        set(&mut self.provider, update.provider);
        set(&mut self.remote, update.remote);
        set(&mut self.tracker_item_id, update.tracker_item_id);
        set(&mut self.tracker_item_url, update.tracker_item_url);
        set(&mut self.pull_request_id, update.pull_request_id);
        set(&mut self.pull_request_url, update.pull_request_url);
        set(&mut self.evidence_comment_id, update.evidence_comment_id);
        set(&mut self.evidence_digest, update.evidence_digest);
        for step in update.completed_steps {
            if !self.completed_steps.contains(&step) {
                self.completed_steps.push(step);
            }
        }
        self.updated_at = now;
    }
}

/// A partial record produced by one run and merged under the record lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub branch: Option<RefName>,
    pub base_branch: Option<RefName>,
    pub provider: Option<ProviderKind>,
    pub remote: Option<RemoteCoordinates>,
    pub tracker_item_id: Option<SafeId>,
    pub tracker_item_url: Option<SafeUrl>,
    pub pull_request_id: Option<SafeId>,
    pub pull_request_url: Option<SafeUrl>,
    pub evidence_comment_id: Option<SafeId>,
    pub evidence_digest: Option<HexDigest>,
    pub completed_steps: Vec<Step>,
}
