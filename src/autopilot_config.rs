//! File layer of the configuration, read from `.autopilot/autopilot.toml`.
//!
//! Every section is optional and falls back to defaults that match the
//! conventional project layout:
//!
//! ```toml
//! [paths]
//! stories_dir = "artifacts/stories"
//! state_dir = "artifacts/autopilot"
//! review_pack_dir = "artifacts/review-pack"
//!
//! [git]
//! base_branch = "main"
//! remote = "origin"
//!
//! [workitem]
//! id_pattern = "^ACF-\\d+$"
//!
//! [http]
//! timeout_secs = 30
//!
//! [github]
//! api_url = "https://api.github.com"
//! repo = "owner/repo"
//!
//! [azure]
//! org_url = "https://dev.azure.com/acme"
//! project = "Platform"
//! repo = "app"
//! work_item_type = "User Story"
//!
//! [[checks]]
//! name = "validate-project"
//! command = "bash scripts/validate-project.sh"
//! requires = "scripts/validate-project.sh"
//! fidelity = "fast"
//! timeout_secs = 600
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::workitem::DEFAULT_ID_PATTERN;

pub const CONFIG_DIR: &str = ".autopilot";
pub const CONFIG_FILE: &str = "autopilot.toml";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_WORK_ITEM_TYPE: &str = "User Story";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_stories_dir")]
    pub stories_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_review_pack_dir")]
    pub review_pack_dir: PathBuf,
}

fn default_stories_dir() -> PathBuf {
    PathBuf::from("artifacts/stories")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("artifacts/autopilot")
}

fn default_review_pack_dir() -> PathBuf {
    PathBuf::from("artifacts/review-pack")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            stories_dir: default_stories_dir(),
            state_dir: default_state_dir(),
            review_pack_dir: default_review_pack_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            remote: default_remote(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemSection {
    #[serde(default = "default_id_pattern")]
    pub id_pattern: String,
}

fn default_id_pattern() -> String {
    DEFAULT_ID_PATTERN.to_string()
}

impl Default for WorkItemSection {
    fn default() -> Self {
        Self {
            id_pattern: default_id_pattern(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSection {
    /// Per-call timeout for provider requests
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubSection {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// `owner/repo`; inferred from the remote when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            repo: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default = "default_work_item_type")]
    pub work_item_type: String,
}

fn default_work_item_type() -> String {
    DEFAULT_WORK_ITEM_TYPE.to_string()
}

impl Default for AzureSection {
    fn default() -> Self {
        Self {
            org_url: None,
            project: None,
            repo: None,
            work_item_type: default_work_item_type(),
        }
    }
}

/// Which evidence mode a check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    /// Runs in every `--run-local` evidence pass
    #[default]
    Fast,
    /// Only with `--full-verify`
    Full,
}

impl std::fmt::Display for Fidelity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fidelity::Fast => write!(f, "fast"),
            Fidelity::Full => write!(f, "full"),
        }
    }
}

/// One local verification check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    /// Shell command, run through `sh -c` in the project root
    pub command: String,
    /// File that must exist for the check to run; the check is skipped otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<PathBuf>,
    #[serde(default)]
    pub fidelity: Fidelity,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

fn default_check_timeout() -> u64 {
    600
}

impl CheckSpec {
    fn script(name: &str, command: &str, requires: &str, fidelity: Fidelity) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            requires: Some(PathBuf::from(requires)),
            fidelity,
            timeout_secs: default_check_timeout(),
        }
    }
}

pub fn default_checks() -> Vec<CheckSpec> {
    vec![
        CheckSpec::script(
            "validate-project",
            "bash scripts/validate-project.sh",
            "scripts/validate-project.sh",
            Fidelity::Fast,
        ),
        CheckSpec::script(
            "validate-documentation",
            "bash scripts/validate-documentation.sh",
            "scripts/validate-documentation.sh",
            Fidelity::Fast,
        ),
        CheckSpec::script(
            "validate-rnd-policy",
            "bash scripts/validate-rnd-policy.sh",
            "scripts/validate-rnd-policy.sh",
            Fidelity::Fast,
        ),
        CheckSpec::script(
            "traceability",
            "python3 scripts/traceability/traceability.py validate --stories-dir artifacts/stories --tests-root . --skip-commits",
            "scripts/traceability/traceability.py",
            Fidelity::Fast,
        ),
        CheckSpec::script(
            "scaffold-and-verify",
            "bash scripts/scaffold-and-verify.sh",
            "scripts/scaffold-and-verify.sh",
            Fidelity::Full,
        ),
    ]
}

/// Contents of `autopilot.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotToml {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub workitem: WorkItemSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub azure: AzureSection,
    #[serde(default = "default_checks")]
    pub checks: Vec<CheckSpec>,
}

impl Default for AutopilotToml {
    fn default() -> Self {
        Self {
            paths: PathsSection::default(),
            git: GitSection::default(),
            workitem: WorkItemSection::default(),
            http: HttpSection::default(),
            github: GithubSection::default(),
            azure: AzureSection::default(),
            checks: default_checks(),
        }
    }
}

impl AutopilotToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse autopilot.toml")
    }

    /// Load from `<config_dir>/autopilot.toml`, or defaults when absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize autopilot.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = regex::Regex::new(&self.workitem.id_pattern) {
            warnings.push(format!(
                "Invalid workitem.id_pattern '{}': {}",
                self.workitem.id_pattern, e
            ));
        }

        if self.http.timeout_secs == 0 {
            warnings.push("http.timeout_secs is 0; every provider call would time out".into());
        }

        let mut seen = HashSet::new();
        for check in &self.checks {
            if !seen.insert(check.name.as_str()) {
                warnings.push(format!("Duplicate check name '{}'", check.name));
            }
            if check.timeout_secs == 0 {
                warnings.push(format!("Check '{}' has timeout_secs = 0", check.name));
            }
            if check.command.trim().is_empty() {
                warnings.push(format!("Check '{}' has an empty command", check.name));
            }
        }

        if let Some(repo) = &self.github.repo
            && repo.split('/').filter(|s| !s.is_empty()).count() != 2
        {
            warnings.push(format!("github.repo '{}' is not in owner/repo form", repo));
        }

        warnings
    }
}
