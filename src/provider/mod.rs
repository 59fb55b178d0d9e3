//! Provider gateway: tracker items, pull requests, links and evidence comments
//! behind one capability trait.
//!
//! | Variant | Tracker item | Pull request | Link | Comment |
//! |---------|--------------|--------------|------|---------|
//! | [`github::GithubProvider`] | issue | pull | closing keyword (skipped) | issue comment |
//! | [`azure::AzureProvider`] | work item | pull request | `ArtifactLink` relation | PR thread |
//! | [`offline::OfflineProvider`] | skipped | skipped | skipped | skipped |

pub mod azure;
pub mod github;
mod http;
pub mod offline;

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{
    Config, ENV_AZURE_ORG_URL, ENV_AZURE_PAT, ENV_AZURE_PROJECT, ENV_AZURE_REPO,
    ENV_AZURE_WORK_ITEM_TYPE, ENV_GITHUB_API_URL, ENV_GITHUB_REPOSITORY, ENV_GITHUB_TOKEN,
};
use crate::errors::{AutopilotError, ProviderError};
use crate::state::{AutopilotState, RemoteCoordinates, SafeId, SafeUrl};
use crate::workitem::WorkItemDescriptor;

pub use azure::AzureProvider;
pub use github::GithubProvider;
pub use offline::{OfflineProvider, OfflineReason};

/// Which backend a result or record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Github,
    AzureDevops,
    Offline,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Github => write!(f, "github"),
            ProviderKind::AzureDevops => write!(f, "azure-devops"),
            ProviderKind::Offline => write!(f, "offline"),
        }
    }
}

/// `--provider` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ProviderChoice {
    /// Infer from the git remote, then the recorded state, then the environment.
    /// A remote on an unrecognised host means offline.
    #[default]
    Auto,
    Github,
    AzureDevops,
    Offline,
}

/// Whether calls reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Live,
    /// Credentials are present but every call is simulated.
    DryRun,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Created,
    Reused,
    Skipped,
    Failed,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKind::Created => write!(f, "created"),
            ResultKind::Reused => write!(f, "reused"),
            ResultKind::Skipped => write!(f, "skipped"),
            ResultKind::Failed => write!(f, "failed"),
        }
    }
}

/// Why a remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// 401/403: re-running without new credentials will not help.
    Auth,
    /// Rate limit, 5xx, timeout or connection failure.
    Transient,
    /// Any other refusal or an unreadable response.
    Rejected,
}

impl FailureClass {
    pub fn hint(&self) -> &'static str {
        match self {
            FailureClass::Auth => "check the token and its scopes",
            FailureClass::Transient => "safe to re-run",
            FailureClass::Rejected => "request refused by the provider",
        }
    }
}

impl From<&ProviderError> for FailureClass {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Auth { .. } => FailureClass::Auth,
            e if e.is_transient() => FailureClass::Transient,
            _ => FailureClass::Rejected,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Auth => write!(f, "auth"),
            FailureClass::Transient => write!(f, "transient"),
            FailureClass::Rejected => write!(f, "rejected"),
        }
    }
}

/// Outcome of every remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: ProviderKind,
    pub kind: ResultKind,
    pub id: Option<String>,
    pub url: Option<String>,
    pub detail: Option<String>,
    /// Set on `failed` results that came from an HTTP error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureClass>,
}

impl ProviderResult {
    pub fn created(provider: ProviderKind, id: impl ToString, url: Option<String>) -> Self {
        Self {
            provider,
            kind: ResultKind::Created,
            id: Some(id.to_string()),
            url,
            detail: None,
            failure: None,
        }
    }

    pub fn reused(provider: ProviderKind, id: impl ToString, url: Option<String>) -> Self {
        Self {
            provider,
            kind: ResultKind::Reused,
            id: Some(id.to_string()),
            url,
            detail: None,
            failure: None,
        }
    }

    pub fn skipped(provider: ProviderKind, detail: impl Into<String>) -> Self {
        Self {
            provider,
            kind: ResultKind::Skipped,
            id: None,
            url: None,
            detail: Some(detail.into()),
            failure: None,
        }
    }

    pub fn failed(provider: ProviderKind, detail: impl Into<String>) -> Self {
        Self {
            provider,
            kind: ResultKind::Failed,
            id: None,
            url: None,
            detail: Some(detail.into()),
            failure: None,
        }
    }

    /// `failed`, classified from the HTTP error behind it.
    pub fn from_error(provider: ProviderKind, operation: &str, err: &ProviderError) -> Self {
        Self {
            failure: Some(FailureClass::from(err)),
            ..Self::failed(provider, format!("{operation}: {err}"))
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.kind == ResultKind::Failed
    }

    /// Created or reused, with an ID.
    pub fn resource_id(&self) -> Option<&str> {
        match self.kind {
            ResultKind::Created | ResultKind::Reused => self.id.as_deref(),
            _ => None,
        }
    }
}

/// A tracker title belongs to `identifier` when it is the identifier itself or
/// starts with it followed by `:` or a space. `ACF-1` must not match `ACF-12`.
pub fn title_matches(title: &str, identifier: &str) -> bool {
    title
        .strip_prefix(identifier)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with([':', ' ']))
}

/// Inputs for `find_or_create_pull_request`.
#[derive(Debug, Clone)]
pub struct PullRequestSpec {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub draft: bool,
}

/// Remote operations the orchestrator needs. Implementations never return
/// `Err`: failures become [`ResultKind::Failed`] with detail.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn mode(&self) -> ProviderMode;

    /// Coordinates to persist so later runs can find the resources.
    fn coordinates(&self) -> Option<RemoteCoordinates>;

    /// Text linking a pull request body to the tracker item.
    fn tracker_reference(&self, tracker_id: &str) -> Option<String>;

    /// Look up by `known_id`, then by title prefix; create when absent.
    async fn find_or_create_tracker_item(
        &self,
        descriptor: &WorkItemDescriptor,
        story: &str,
        known_id: Option<&str>,
    ) -> ProviderResult;

    /// Lookup only: the open pull request whose head is `branch`.
    async fn find_pull_request(&self, branch: &str) -> ProviderResult;

    /// Reuse before create, keyed by the head branch.
    async fn find_or_create_pull_request(
        &self,
        spec: &PullRequestSpec,
        known_id: Option<&str>,
    ) -> ProviderResult;

    async fn link_work_item_to_pull_request(
        &self,
        work_item_id: &str,
        pull_request_id: &str,
    ) -> ProviderResult;

    /// Update the comment containing `marker` in place, else create one.
    async fn upsert_evidence_comment(
        &self,
        pull_request_id: &str,
        marker: &str,
        body: &str,
    ) -> ProviderResult;
}

/// What a git remote URL says about the hosting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteHint {
    Github {
        repo: String,
    },
    AzureDevops {
        org_url: String,
        project: String,
        repo: String,
    },
}

static GITHUB_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:git@github\.com:|ssh://git@github\.com/|https?://(?:[^@/]+@)?github\.com/)([^/]+)/([^/]+?)(?:\.git)?/?$")
        .expect("valid regex")
});

static AZURE_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://(?:[^@/]+@)?dev\.azure\.com/([^/]+)/([^/]+)/_git/([^/]+?)/?$")
        .expect("valid regex")
});

static AZURE_SSH_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^git@ssh\.dev\.azure\.com:v3/([^/]+)/([^/]+)/([^/]+?)/?$").expect("valid regex")
});

static VISUALSTUDIO_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://(?:[^@/]+@)?([^./@]+)\.visualstudio\.com/(?:DefaultCollection/)?([^/]+)/_git/([^/]+?)/?$")
        .expect("valid regex")
});

fn decode_segment(segment: &str) -> String {
    segment.replace("%20", " ")
}

/// Infer the hosting service from a remote URL. Credentials embedded in the
/// URL are discarded; only host-derived coordinates are returned.
pub fn infer_remote(url: &str) -> Option<RemoteHint> {
    let url = url.trim();
    if let Some(c) = GITHUB_REMOTE.captures(url) {
        return Some(RemoteHint::Github {
            repo: format!("{}/{}", &c[1], &c[2]),
        });
    }
    if let Some(c) = AZURE_REMOTE
        .captures(url)
        .or_else(|| AZURE_SSH_REMOTE.captures(url))
    {
        return Some(RemoteHint::AzureDevops {
            org_url: format!("https://dev.azure.com/{}", &c[1]),
            project: decode_segment(&c[2]),
            repo: decode_segment(&c[3]),
        });
    }
    if let Some(c) = VISUALSTUDIO_REMOTE.captures(url) {
        return Some(RemoteHint::AzureDevops {
            org_url: format!("https://{}.visualstudio.com", &c[1]),
            project: decode_segment(&c[2]),
            repo: decode_segment(&c[3]),
        });
    }
    None
}

/// Inputs to provider selection.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub choice: ProviderChoice,
    pub remote_url: Option<&'a str>,
    pub recorded: Option<&'a AutopilotState>,
    pub require_integration: bool,
    pub dry_run: bool,
}

/// Pick the provider for a run.
///
/// Missing credentials degrade to [`OfflineProvider`] unless
/// `require_integration` is set, in which case they are fatal. Dry runs with
/// complete credentials get a simulating provider that never calls out.
pub fn select_provider(
    config: &Config,
    selection: Selection<'_>,
) -> Result<Box<dyn Provider>, AutopilotError> {
    let hint = selection.remote_url.and_then(infer_remote);
    let recorded_coords = selection.recorded.and_then(|s| s.remote.as_ref());

    let kind = match selection.choice {
        ProviderChoice::Github => ProviderKind::Github,
        ProviderChoice::AzureDevops => ProviderKind::AzureDevops,
        ProviderChoice::Offline => {
            if selection.require_integration {
                return Err(AutopilotError::Config(
                    "--require-integration cannot be combined with --provider offline".into(),
                ));
            }
            return Ok(Box::new(OfflineProvider::new(
                ProviderKind::Offline,
                OfflineReason::Requested,
            )));
        }
        ProviderChoice::Auto => match (&hint, selection.remote_url, recorded_coords) {
            (Some(RemoteHint::Github { .. }), _, _) => ProviderKind::Github,
            (Some(RemoteHint::AzureDevops { .. }), _, _) => ProviderKind::AzureDevops,
            // A remote on some other host wins over recorded state and env.
            (None, Some(_), _) => {
                if selection.require_integration {
                    return Err(AutopilotError::Config(
                        "--require-integration set but the git remote is not a GitHub or Azure DevOps repository; pass --provider".into(),
                    ));
                }
                tracing::info!("git remote host not recognised, running offline");
                return Ok(Box::new(OfflineProvider::new(
                    ProviderKind::Offline,
                    OfflineReason::UnknownRemote,
                )));
            }
            (None, None, Some(RemoteCoordinates::Github { .. })) => ProviderKind::Github,
            (None, None, Some(RemoteCoordinates::AzureDevops { .. })) => ProviderKind::AzureDevops,
            (None, None, None) => {
                if config.env.get(ENV_GITHUB_REPOSITORY).is_some() {
                    ProviderKind::Github
                } else if config.env.get(ENV_AZURE_ORG_URL).is_some() {
                    ProviderKind::AzureDevops
                } else if selection.require_integration {
                    return Err(AutopilotError::Config(
                        "--require-integration set but no GitHub or Azure DevOps remote could be inferred; pass --provider".into(),
                    ));
                } else {
                    tracing::info!("no provider inferred, running offline");
                    return Ok(Box::new(OfflineProvider::new(
                        ProviderKind::Offline,
                        OfflineReason::NoRemote,
                    )));
                }
            }
        },
    };

    let resolved = match kind {
        ProviderKind::Github => resolve_github(config, hint.as_ref(), recorded_coords),
        _ => resolve_azure(config, hint.as_ref(), recorded_coords),
    }?;

    match resolved {
        Resolved::Missing(missing) => {
            if selection.require_integration {
                return Err(AutopilotError::ProviderAuthMissing {
                    provider: kind,
                    missing,
                });
            }
            tracing::warn!(provider = %kind, missing = ?missing, "credentials missing, running offline");
            Ok(Box::new(OfflineProvider::new(
                ProviderKind::Offline,
                OfflineReason::MissingCredentials { provider: kind, missing },
            )))
        }
        Resolved::Ready(provider) if selection.dry_run => Ok(Box::new(
            OfflineProvider::new(kind, OfflineReason::DryRun).with_coordinates(provider.coordinates()),
        )),
        Resolved::Ready(provider) => Ok(provider),
    }
}

enum Resolved {
    Ready(Box<dyn Provider>),
    Missing(Vec<&'static str>),
}

fn invalid(name: &str, err: impl fmt::Display) -> AutopilotError {
    AutopilotError::Config(format!("invalid {name}: {err}"))
}

fn resolve_github(
    config: &Config,
    hint: Option<&RemoteHint>,
    recorded: Option<&RemoteCoordinates>,
) -> Result<Resolved, AutopilotError> {
    let (recorded_api, recorded_repo) = match recorded {
        Some(RemoteCoordinates::Github { api_url, repo }) => {
            (Some(api_url.to_string()), Some(repo.to_string()))
        }
        _ => (None, None),
    };
    let hinted_repo = match hint {
        Some(RemoteHint::Github { repo }) => Some(repo.clone()),
        _ => None,
    };

    let token = config.github_token();
    let repo = config
        .env
        .get(ENV_GITHUB_REPOSITORY)
        .map(str::to_string)
        .or_else(|| config.settings.github.repo.clone())
        .or(hinted_repo)
        .or(recorded_repo);
    let api_url = config
        .env
        .get(ENV_GITHUB_API_URL)
        .map(str::to_string)
        .or(recorded_api)
        .unwrap_or_else(|| config.settings.github.api_url.clone());

    let mut missing = Vec::new();
    if token.is_none() {
        missing.push(ENV_GITHUB_TOKEN);
    }
    if repo.is_none() {
        missing.push(ENV_GITHUB_REPOSITORY);
    }
    let (Some(token), Some(repo)) = (token, repo) else {
        return Ok(Resolved::Missing(missing));
    };

    let api_url = SafeUrl::parse(&api_url).map_err(|e| invalid(ENV_GITHUB_API_URL, e))?;
    let repo = SafeId::parse(&repo).map_err(|e| invalid(ENV_GITHUB_REPOSITORY, e))?;
    let provider = GithubProvider::new(api_url, repo, token, config.http_timeout())
        .map_err(|e| AutopilotError::Config(format!("failed to build GitHub client: {e}")))?;
    Ok(Resolved::Ready(Box::new(provider)))
}

fn resolve_azure(
    config: &Config,
    hint: Option<&RemoteHint>,
    recorded: Option<&RemoteCoordinates>,
) -> Result<Resolved, AutopilotError> {
    let (hint_org, hint_project, hint_repo) = match hint {
        Some(RemoteHint::AzureDevops {
            org_url,
            project,
            repo,
        }) => (Some(org_url.clone()), Some(project.clone()), Some(repo.clone())),
        _ => (None, None, None),
    };
    let (rec_org, rec_project, rec_repo, rec_type) = match recorded {
        Some(RemoteCoordinates::AzureDevops {
            org_url,
            project,
            repo,
            work_item_type,
        }) => (
            Some(org_url.to_string()),
            Some(project.to_string()),
            Some(repo.to_string()),
            Some(work_item_type.to_string()),
        ),
        _ => (None, None, None, None),
    };

    let env = &config.env;
    let file = &config.settings.azure;
    let pat = config.azure_pat();
    let org_url = env
        .get(ENV_AZURE_ORG_URL)
        .map(str::to_string)
        .or_else(|| file.org_url.clone())
        .or(hint_org)
        .or(rec_org);
    let project = env
        .get(ENV_AZURE_PROJECT)
        .map(str::to_string)
        .or_else(|| file.project.clone())
        .or(hint_project)
        .or(rec_project);
    let repo = env
        .get(ENV_AZURE_REPO)
        .map(str::to_string)
        .or_else(|| file.repo.clone())
        .or(hint_repo)
        .or(rec_repo);
    let work_item_type = env
        .get(ENV_AZURE_WORK_ITEM_TYPE)
        .map(str::to_string)
        .or(rec_type)
        .unwrap_or_else(|| file.work_item_type.clone());

    let mut missing = Vec::new();
    if pat.is_none() {
        missing.push(ENV_AZURE_PAT);
    }
    if org_url.is_none() {
        missing.push(ENV_AZURE_ORG_URL);
    }
    if project.is_none() {
        missing.push(ENV_AZURE_PROJECT);
    }
    if repo.is_none() {
        missing.push(ENV_AZURE_REPO);
    }
    let (Some(pat), Some(org_url), Some(project), Some(repo)) = (pat, org_url, project, repo)
    else {
        return Ok(Resolved::Missing(missing));
    };

    let coords = azure::AzureCoordinates {
        org_url: SafeUrl::parse(&org_url).map_err(|e| invalid(ENV_AZURE_ORG_URL, e))?,
        project: SafeId::parse(&project).map_err(|e| invalid(ENV_AZURE_PROJECT, e))?,
        repo: SafeId::parse(&repo).map_err(|e| invalid(ENV_AZURE_REPO, e))?,
        work_item_type: SafeId::parse(&work_item_type)
            .map_err(|e| invalid(ENV_AZURE_WORK_ITEM_TYPE, e))?,
    };
    let provider = AzureProvider::new(coords, pat, config.http_timeout())
        .map_err(|e| AutopilotError::Config(format!("failed to build Azure DevOps client: {e}")))?;
    Ok(Resolved::Ready(Box::new(provider)))
}
