//! Step records and the per-run report.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AutopilotError;
use crate::provider::{FailureClass, ProviderKind, ProviderMode, ProviderResult, ResultKind};
use crate::state::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Evidence,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Start => write!(f, "start"),
            Operation::Evidence => write!(f, "evidence"),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Reused,
    /// Not requested, or simulated by a dry run.
    Skipped,
    /// No provider available; the remote step never ran.
    Offline,
    /// A prerequisite was missing, so the step did not run.
    PreconditionFailed,
    Failed,
}

impl StepStatus {
    /// Whether this outcome makes the run partial.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            StepStatus::Offline | StepStatus::PreconditionFailed | StepStatus::Failed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Reused)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Done => "done",
            StepStatus::Reused => "reused",
            StepStatus::Skipped => "skipped",
            StepStatus::Offline => "offline",
            StepStatus::PreconditionFailed => "precondition failed",
            StepStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub detail: Option<String>,
    /// Set for steps that went through the provider.
    pub result: Option<ProviderResult>,
    /// Classification of a failed provider call.
    pub failure: Option<FailureClass>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Complete => 0,
            RunStatus::Partial => 2,
            RunStatus::Failed => 1,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Everything one `start` or `evidence` run did, in order.
#[derive(Debug)]
pub struct RunReport {
    pub operation: Operation,
    pub identifier: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub provider: Option<ProviderKind>,
    pub provider_mode: Option<ProviderMode>,
    pub branch: Option<String>,
    pub steps: Vec<StepRecord>,
    /// Files written, relative to the project root.
    pub artifacts: Vec<PathBuf>,
    pub error: Option<AutopilotError>,
}

impl RunReport {
    pub fn new(operation: Operation, identifier: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            operation,
            identifier: identifier.to_string(),
            run_id: Uuid::new_v4(),
            started_at,
            dry_run: false,
            provider: None,
            provider_mode: None,
            branch: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub fn record(&mut self, step: Step, status: StepStatus, detail: impl Into<Option<String>>) {
        let detail = detail.into();
        tracing::info!(
            event = "step.finished",
            step = %step,
            status = %status,
            detail = detail.as_deref().unwrap_or(""),
        );
        self.steps.push(StepRecord {
            step,
            status,
            detail,
            result: None,
            failure: None,
        });
    }

    /// Record a provider outcome. Skips count as `offline` only when the
    /// provider is offline and the run is not a dry run.
    pub fn record_provider(&mut self, step: Step, result: ProviderResult) -> StepStatus {
        let status = match result.kind {
            ResultKind::Created => StepStatus::Done,
            ResultKind::Reused => StepStatus::Reused,
            ResultKind::Failed => StepStatus::Failed,
            ResultKind::Skipped
                if !self.dry_run && self.provider_mode == Some(ProviderMode::Offline) =>
            {
                StepStatus::Offline
            }
            ResultKind::Skipped => StepStatus::Skipped,
        };
        let detail = match (&result.kind, &result.id, &result.detail) {
            (ResultKind::Failed, _, detail) => Some(
                AutopilotError::ProviderTransient {
                    provider: result.provider,
                    detail: detail.clone().unwrap_or_default(),
                }
                .to_string(),
            ),
            (_, _, Some(detail)) => Some(detail.clone()),
            (ResultKind::Created | ResultKind::Reused, Some(id), None) => {
                Some(format!("{} {}", result.kind, id))
            }
            _ => None,
        };
        tracing::info!(
            event = "step.finished",
            step = %step,
            status = %status,
            provider = %result.provider,
            result = %result.kind,
            id = result.id.as_deref().unwrap_or(""),
            failure = result.failure.map(|c| c.to_string()).unwrap_or_default(),
        );
        self.steps.push(StepRecord {
            step,
            status,
            detail,
            failure: result.failure,
            result: Some(result),
        });
        status
    }

    pub fn step(&self, step: Step) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step == step)
    }

    /// The classification of the first failed provider step, if any.
    pub fn provider_failure(&self) -> Option<FailureClass> {
        self.steps.iter().find_map(|r| r.failure)
    }

    pub fn provider_results(&self) -> impl Iterator<Item = &ProviderResult> {
        self.steps.iter().filter_map(|r| r.result.as_ref())
    }

    pub fn fail(&mut self, error: AutopilotError) {
        tracing::error!(event = "run.failed", error = %error);
        self.error = Some(error);
    }

    pub fn status(&self) -> RunStatus {
        if self.error.is_some() {
            RunStatus::Failed
        } else if self.steps.iter().any(|s| s.status.is_degraded()) {
            RunStatus::Partial
        } else {
            RunStatus::Complete
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status().exit_code()
    }
}
