//! Human summary of a run, one line per step.

use console::{Emoji, style};

use super::icons;
use crate::orchestrator::{RunReport, RunStatus, StepStatus};

fn icon(status: StepStatus) -> Emoji<'static, 'static> {
    match status {
        StepStatus::Done => icons::CHECK,
        StepStatus::Reused => icons::REUSED,
        StepStatus::Skipped => icons::SKIP,
        StepStatus::Offline => icons::OFFLINE,
        StepStatus::PreconditionFailed => icons::BLOCKER,
        StepStatus::Failed => icons::CROSS,
    }
}

pub fn render_run_report(report: &RunReport) -> String {
    let mut out = String::new();

    let mut header = format!("autopilot {} {}", report.operation, report.identifier);
    if let Some(provider) = report.provider {
        header.push_str(&format!(" (provider: {provider}"));
        if report.dry_run {
            header.push_str(", dry-run");
        }
        header.push(')');
    }
    out.push_str(&format!("{}\n", style(header).bold()));
    if let Some(branch) = &report.branch {
        out.push_str(&format!("  branch: {}\n", style(branch).cyan()));
    }
    out.push('\n');

    for record in &report.steps {
        let status = match record.status {
            StepStatus::Done | StepStatus::Reused => style(record.status.to_string()).green(),
            StepStatus::Skipped => style(record.status.to_string()).dim(),
            StepStatus::Offline | StepStatus::PreconditionFailed => {
                style(record.status.to_string()).yellow()
            }
            StepStatus::Failed => style(record.status.to_string()).red(),
        };
        out.push_str(&format!(
            "  {}{:<18} {}",
            icon(record.status),
            record.step.as_str(),
            status
        ));
        if let Some(detail) = &record.detail {
            out.push_str(&format!("  {}", style(detail).dim()));
        }
        if let Some(url) = record.result.as_ref().and_then(|r| r.url.as_deref()) {
            out.push_str(&format!("  {url}"));
        }
        out.push('\n');
    }

    if !report.artifacts.is_empty() {
        out.push('\n');
        for artifact in &report.artifacts {
            out.push_str(&format!("  {}{}\n", icons::FILE_NEW, artifact.display()));
        }
    }

    if let Some(class) = report.provider_failure() {
        out.push_str(&format!(
            "\n  {}provider call failed ({class}): {}\n",
            icons::BLOCKER,
            class.hint()
        ));
    }

    if let Some(err) = &report.error {
        out.push_str(&format!("\n{}{}\n", icons::CROSS, style(err).red()));
    }

    let status = report.status();
    let styled = match status {
        RunStatus::Complete => style(status.to_string()).green().bold(),
        RunStatus::Partial => style(status.to_string()).yellow().bold(),
        RunStatus::Failed => style(status.to_string()).red().bold(),
    };
    let lead = if status == RunStatus::Complete {
        icons::SPARKLE
    } else {
        Emoji("", "")
    };
    out.push_str(&format!("\n{lead}Status: {styled}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Operation;
    use crate::provider::ProviderKind;
    use crate::state::Step;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn test_summary_lists_steps_and_status() {
        let mut report = RunReport::new(Operation::Start, "ACF-0042", Utc::now());
        report.provider = Some(ProviderKind::Offline);
        report.branch = Some("feature/ACF-0042-add-caching-layer".into());
        report.record(Step::Resolve, StepStatus::Done, "artifacts/stories/ACF-0042.md".to_string());
        report.record(Step::TrackerItem, StepStatus::Offline, "no provider remote configured".to_string());
        report.artifacts.push(PathBuf::from("artifacts/review-pack/ACF-0042.md"));

        let text = console::strip_ansi_codes(&render_run_report(&report)).to_string();
        assert!(text.contains("autopilot start ACF-0042 (provider: offline)"));
        assert!(text.contains("feature/ACF-0042-add-caching-layer"));
        assert!(text.contains("resolve"));
        assert!(text.contains("tracker_item"));
        assert!(text.contains("artifacts/review-pack/ACF-0042.md"));
        assert!(text.contains("Status: partial"));
    }

    #[test]
    fn test_summary_explains_provider_failure() {
        let mut report = RunReport::new(Operation::Start, "ACF-0042", Utc::now());
        report.provider = Some(ProviderKind::Github);
        let err = crate::errors::ProviderError::Auth {
            status: 401,
            body: "Bad credentials".into(),
        };
        report.record_provider(
            Step::TrackerItem,
            crate::provider::ProviderResult::from_error(ProviderKind::Github, "search issues", &err),
        );
        let text = console::strip_ansi_codes(&render_run_report(&report)).to_string();
        assert!(text.contains("github request failed: search issues"));
        assert!(text.contains("provider call failed (auth): check the token and its scopes"));
        assert!(text.contains("Status: partial"));
    }

    #[test]
    fn test_summary_shows_fatal_error() {
        let mut report = RunReport::new(Operation::Evidence, "ACF-9", Utc::now());
        report.fail(crate::errors::AutopilotError::MissingPullRequest {
            identifier: "ACF-9".into(),
        });
        let text = console::strip_ansi_codes(&render_run_report(&report)).to_string();
        assert!(text.contains("No pull request on record for ACF-9"));
        assert!(text.contains("Status: failed"));
    }
}
