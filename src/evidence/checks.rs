use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::{CheckResult, CheckStatus, EvidenceMode};
use crate::autopilot_config::{CheckSpec, Fidelity};

/// Lines of output kept in a result's detail.
const DETAIL_LINES: usize = 40;
const DETAIL_BYTES: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub summary: String,
    pub detail: Option<String>,
}

impl CheckOutcome {
    fn new(status: CheckStatus, summary: impl Into<String>) -> Self {
        Self {
            status,
            summary: summary.into(),
            detail: None,
        }
    }
}

/// A single verification step.
#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self) -> CheckOutcome;
}

/// A check that runs a shell command in the project root.
///
/// Exit 0 passes, exit 127 (command not found) is skipped, any other exit or
/// a timeout fails.
pub struct ShellCheck {
    spec: CheckSpec,
    project_dir: PathBuf,
}

impl ShellCheck {
    pub fn new(spec: CheckSpec, project_dir: &Path) -> Self {
        Self {
            spec,
            project_dir: project_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl Check for ShellCheck {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn invoke(&self) -> CheckOutcome {
        if let Some(required) = &self.spec.requires
            && !self.project_dir.join(required).exists()
        {
            return CheckOutcome::new(
                CheckStatus::Skipped,
                format!("{} not found", required.display()),
            );
        }

        tracing::debug!(check = %self.spec.name, command = %self.spec.command, "running check");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.spec.command)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return CheckOutcome::new(CheckStatus::Fail, format!("failed to spawn: {e}"));
            }
        };

        let limit = Duration::from_secs(self.spec.timeout_secs);
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return CheckOutcome::new(CheckStatus::Fail, format!("failed to wait: {e}"));
            }
            Err(_) => {
                return CheckOutcome::new(
                    CheckStatus::Fail,
                    format!("timed out after {}s", self.spec.timeout_secs),
                );
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let code = output.status.code();
        let status = match code {
            Some(0) => CheckStatus::Pass,
            Some(127) => CheckStatus::Skipped,
            _ => CheckStatus::Fail,
        };
        let summary = last_line(&combined).unwrap_or_else(|| match code {
            Some(c) => format!("exit code {c}"),
            None => "terminated by signal".to_string(),
        });

        CheckOutcome {
            status,
            summary,
            detail: tail(&combined),
        }
    }
}

fn last_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
}

fn tail(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return None;
    }
    let start = lines.len().saturating_sub(DETAIL_LINES);
    let joined = lines[start..].join("\n");
    if joined.len() <= DETAIL_BYTES {
        return Some(joined);
    }
    let mut cut = joined.len() - DETAIL_BYTES;
    while !joined.is_char_boundary(cut) {
        cut += 1;
    }
    Some(joined[cut..].to_string())
}

/// Build the checks for `mode` from the configured specs.
pub fn plan(specs: &[CheckSpec], mode: EvidenceMode, project_dir: &Path) -> Vec<Box<dyn Check>> {
    specs
        .iter()
        .filter(|s| match mode {
            EvidenceMode::NotRequested => false,
            EvidenceMode::Fast => s.fidelity == Fidelity::Fast,
            EvidenceMode::Full => true,
        })
        .map(|s| Box::new(ShellCheck::new(s.clone(), project_dir)) as Box<dyn Check>)
        .collect()
}

/// Run every check in order. One failure never stops the others.
pub async fn run(checks: &[Box<dyn Check>]) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        let outcome = check.invoke().await;
        tracing::info!(check = check.name(), status = %outcome.status, summary = %outcome.summary, "check.finished");
        results.push(CheckResult {
            name: check.name().to_string(),
            status: outcome.status,
            summary: outcome.summary,
            detail: outcome.detail,
        });
    }
    results
}

/// The fast checks listed as skipped, for reports where nothing ran.
pub fn not_requested(specs: &[CheckSpec]) -> Vec<CheckResult> {
    specs
        .iter()
        .filter(|s| s.fidelity == Fidelity::Fast)
        .map(|s| CheckResult {
            name: s.name.clone(),
            status: CheckStatus::Skipped,
            summary: "local checks not requested".to_string(),
            detail: None,
        })
        .collect()
}
