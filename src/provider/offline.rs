use async_trait::async_trait;

use super::{Provider, ProviderKind, ProviderMode, ProviderResult, PullRequestSpec};
use crate::state::RemoteCoordinates;
use crate::workitem::WorkItemDescriptor;

/// Why no network call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineReason {
    /// `--provider offline`
    Requested,
    /// No provider could be inferred.
    NoRemote,
    /// The git remote points at a host other than GitHub or Azure DevOps.
    UnknownRemote,
    MissingCredentials {
        provider: ProviderKind,
        missing: Vec<&'static str>,
    },
    /// Credentials are present; calls are simulated.
    DryRun,
}

impl OfflineReason {
    fn describe(&self) -> String {
        match self {
            OfflineReason::Requested => "offline mode".to_string(),
            OfflineReason::NoRemote => "no provider remote configured".to_string(),
            OfflineReason::UnknownRemote => {
                "git remote is not a GitHub or Azure DevOps repository".to_string()
            }
            OfflineReason::MissingCredentials { provider, missing } => {
                format!("{provider} credentials missing ({})", missing.join(", "))
            }
            OfflineReason::DryRun => "dry-run".to_string(),
        }
    }
}

/// Provider that never touches the network. Every operation is `skipped`.
pub struct OfflineProvider {
    kind: ProviderKind,
    reason: OfflineReason,
    coordinates: Option<RemoteCoordinates>,
}

impl OfflineProvider {
    /// `kind` is the provider results are tagged with; dry runs keep the
    /// provider that would have been called.
    pub fn new(kind: ProviderKind, reason: OfflineReason) -> Self {
        Self {
            kind,
            reason,
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, coordinates: Option<RemoteCoordinates>) -> Self {
        self.coordinates = coordinates;
        self
    }

    fn skip(&self, action: &str) -> ProviderResult {
        let detail = match self.reason {
            OfflineReason::DryRun => format!("dry-run: would {action}"),
            _ => format!("{}: {action} not attempted", self.reason.describe()),
        };
        ProviderResult::skipped(self.kind, detail)
    }
}

#[async_trait]
impl Provider for OfflineProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn mode(&self) -> ProviderMode {
        match self.reason {
            OfflineReason::DryRun => ProviderMode::DryRun,
            _ => ProviderMode::Offline,
        }
    }

    /// Only reported for dry runs; nothing is persisted from them.
    fn coordinates(&self) -> Option<RemoteCoordinates> {
        self.coordinates.clone()
    }

    fn tracker_reference(&self, _tracker_id: &str) -> Option<String> {
        None
    }

    async fn find_or_create_tracker_item(
        &self,
        descriptor: &WorkItemDescriptor,
        _story: &str,
        known_id: Option<&str>,
    ) -> ProviderResult {
        match known_id {
            Some(id) => self.skip(&format!("reuse tracker item {id}")),
            None => self.skip(&format!("look up or create tracker item for {}", descriptor.identifier)),
        }
    }

    async fn find_pull_request(&self, branch: &str) -> ProviderResult {
        self.skip(&format!("look up pull request for {branch}"))
    }

    async fn find_or_create_pull_request(
        &self,
        spec: &PullRequestSpec,
        _known_id: Option<&str>,
    ) -> ProviderResult {
        self.skip(&format!("look up or create pull request {} -> {}", spec.head, spec.base))
    }

    async fn link_work_item_to_pull_request(
        &self,
        _work_item_id: &str,
        _pull_request_id: &str,
    ) -> ProviderResult {
        self.skip("link work item to pull request")
    }

    async fn upsert_evidence_comment(
        &self,
        _pull_request_id: &str,
        _marker: &str,
        _body: &str,
    ) -> ProviderResult {
        self.skip("upsert evidence comment")
    }
}
