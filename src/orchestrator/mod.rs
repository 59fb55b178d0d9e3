//! Sequences resolver, branch manager, provider, evidence and state store
//! into the `start` and `evidence` operations.

mod evidence;
mod start;
pub mod steps;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::config::Config;
use crate::errors::AutopilotError;
use crate::provider::{ProviderChoice, ProviderResult};
use crate::state::{AutopilotState, SafeId, SafeUrl, StateStore, StateUpdate};
use crate::workitem::{Resolver, WorkItemDescriptor};

pub use steps::{Operation, RunReport, RunStatus, StepRecord, StepStatus};

/// Source of timestamps, injectable so rendered artifacts are reproducible.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub provider: ProviderChoice,
    pub base_branch: Option<String>,
    pub draft: bool,
    pub dry_run: bool,
    pub commit: bool,
    /// Implies `commit`.
    pub push: bool,
    pub require_integration: bool,
    pub allow_untracked: bool,
}

impl StartOptions {
    pub fn commits(&self) -> bool {
        self.commit || self.push
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceOptions {
    pub provider: ProviderChoice,
    pub run_local: bool,
    pub full_verify: bool,
    pub dry_run: bool,
    pub require_integration: bool,
}

pub struct Orchestrator {
    config: Config,
    clock: Box<dyn Clock>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn start(&self, identifier: &str, options: &StartOptions) -> RunReport {
        let mut run = RunReport::new(Operation::Start, identifier, self.clock.now());
        run.dry_run = options.dry_run;
        let span = tracing::info_span!(
            "autopilot.run",
            operation = "start",
            identifier = %identifier,
            run_id = %run.run_id,
        );
        async {
            if let Err(e) = self.run_start(identifier, options, &mut run).await {
                run.fail(e);
            }
            tracing::info!(event = "run.finished", status = %run.status());
            run
        }
        .instrument(span)
        .await
    }

    pub async fn evidence(&self, identifier: &str, options: &EvidenceOptions) -> RunReport {
        let mut run = RunReport::new(Operation::Evidence, identifier, self.clock.now());
        run.dry_run = options.dry_run;
        let span = tracing::info_span!(
            "autopilot.run",
            operation = "evidence",
            identifier = %identifier,
            run_id = %run.run_id,
        );
        async {
            if let Err(e) = self.run_evidence(identifier, options, &mut run).await {
                run.fail(e);
            }
            tracing::info!(event = "run.finished", status = %run.status());
            run
        }
        .instrument(span)
        .await
    }

    /// Read-only view of the persisted record.
    pub fn status(&self, identifier: &str) -> Result<Option<AutopilotState>, AutopilotError> {
        self.resolver()?.check_identifier(identifier)?;
        let id = parse_identifier(identifier)?;
        Ok(self.store().load(&id)?)
    }

    fn resolver(&self) -> Result<Resolver, AutopilotError> {
        Resolver::new(
            &self.config.project_dir,
            &self.config.stories_dir(),
            &self.config.settings.workitem.id_pattern,
        )
    }

    fn resolve(&self, identifier: &str) -> Result<(WorkItemDescriptor, SafeId), AutopilotError> {
        let descriptor = self.resolver()?.resolve(identifier)?;
        let id = SafeId::parse(&descriptor.identifier).map_err(|e| AutopilotError::Malformed {
            path: descriptor.source_path.clone(),
            reason: e.to_string(),
        })?;
        Ok((descriptor, id))
    }

    fn store(&self) -> StateStore {
        StateStore::new(self.config.state_dir())
    }

    fn review_pack_path(&self, id: &SafeId) -> PathBuf {
        self.config.review_pack_dir().join(format!("{id}.md"))
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.config.project_dir)
            .unwrap_or(path)
            .to_path_buf()
    }

    fn checkpoint(
        &self,
        store: &StateStore,
        id: &SafeId,
        update: StateUpdate,
    ) -> Result<AutopilotState, AutopilotError> {
        Ok(store.merge(id, update, self.clock.now())?)
    }

    /// Write a local artifact, creating parent directories.
    fn write_artifact(&self, path: &Path, content: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }
}

fn parse_identifier(identifier: &str) -> Result<SafeId, AutopilotError> {
    SafeId::parse(identifier).map_err(|e| AutopilotError::NotFound {
        identifier: identifier.to_string(),
        reason: e.to_string(),
    })
}

/// ID and URL of a created or reused resource, validated for the state file.
fn remote_ids(result: &ProviderResult) -> (Option<SafeId>, Option<SafeUrl>) {
    let id = result.resource_id().and_then(|id| match SafeId::parse(id) {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(id, error = %e, "provider returned an id that cannot be recorded");
            None
        }
    });
    let url = result.url.as_deref().and_then(|url| match SafeUrl::parse(url) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(error = %e, "provider returned a url that cannot be recorded");
            None
        }
    });
    (id, url)
}
