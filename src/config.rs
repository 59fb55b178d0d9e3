use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::autopilot_config::{AutopilotToml, CONFIG_DIR, CONFIG_FILE};

pub const ENV_BASE_BRANCH: &str = "AUTOPILOT_BASE_BRANCH";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_GH_TOKEN: &str = "GH_TOKEN";
pub const ENV_GITHUB_REPOSITORY: &str = "GITHUB_REPOSITORY";
pub const ENV_GITHUB_API_URL: &str = "GITHUB_API_URL";
pub const ENV_AZURE_PAT: &str = "AZURE_DEVOPS_PAT";
pub const ENV_AZURE_ORG_URL: &str = "AZURE_DEVOPS_ORG_URL";
pub const ENV_AZURE_PROJECT: &str = "AZURE_DEVOPS_PROJECT";
pub const ENV_AZURE_REPO: &str = "AZURE_DEVOPS_REPO";
pub const ENV_AZURE_WORK_ITEM_TYPE: &str = "AZURE_DEVOPS_WORK_ITEM_TYPE";

/// A credential read from the environment. Never serialized, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

/// Snapshot of the process environment.
///
/// Captured once at startup so the rest of the crate never calls
/// `std::env::var` and tests can inject variables without touching the
/// process environment.
#[derive(Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `key`, treating empty strings as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("vars", &self.vars.len())
            .finish()
    }
}

/// Runtime configuration: `autopilot.toml` layered under the environment.
/// CLI overrides are applied by the commands through the accessor arguments.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub settings: AutopilotToml,
    pub env: Environment,
}

/// `<project>/.autopilot/autopilot.toml`, whether or not it exists.
pub fn config_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}

impl Config {
    pub fn load(project_dir: PathBuf, env: Environment) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory {}", project_dir.display()))?;
        let settings = AutopilotToml::load_or_default(&project_dir.join(CONFIG_DIR))?;
        Ok(Self {
            project_dir,
            settings,
            env,
        })
    }

    pub fn from_parts(project_dir: PathBuf, settings: AutopilotToml, env: Environment) -> Self {
        Self {
            project_dir,
            settings,
            env,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        config_file_path(&self.project_dir)
    }

    pub fn stories_dir(&self) -> PathBuf {
        self.project_dir.join(&self.settings.paths.stories_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.project_dir.join(&self.settings.paths.state_dir)
    }

    pub fn review_pack_dir(&self) -> PathBuf {
        self.project_dir.join(&self.settings.paths.review_pack_dir)
    }

    /// Directories the autopilot writes to; ignored by the clean-worktree guard.
    pub fn managed_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.settings.paths.state_dir.clone(),
            self.settings.paths.review_pack_dir.clone(),
            PathBuf::from(CONFIG_DIR),
        ]
    }

    /// Base branch (CLI → env → file).
    pub fn base_branch(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.env.get(ENV_BASE_BRANCH).map(str::to_string))
            .unwrap_or_else(|| self.settings.git.base_branch.clone())
    }

    pub fn remote(&self) -> &str {
        &self.settings.git.remote
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.http.timeout_secs)
    }

    pub fn github_token(&self) -> Option<SecretToken> {
        self.env
            .first_of(&[ENV_GITHUB_TOKEN, ENV_GH_TOKEN])
            .map(SecretToken::new)
    }

    pub fn azure_pat(&self) -> Option<SecretToken> {
        self.env.get(ENV_AZURE_PAT).map(SecretToken::new)
    }

    pub fn validate(&self) -> Vec<String> {
        self.settings.validate()
    }
}
