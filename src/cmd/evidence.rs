//! `autopilot evidence`.

use std::path::Path;

use anyhow::Result;
use autopilot::orchestrator::{EvidenceOptions, Orchestrator};
use autopilot::ui::render_run_report;

/// Run `evidence` and print the summary. Returns the process exit code.
pub async fn cmd_evidence(
    project_dir: &Path,
    identifier: &str,
    options: EvidenceOptions,
) -> Result<i32> {
    let config = super::load_config(project_dir)?;
    let orchestrator = Orchestrator::new(config);
    let report = orchestrator.evidence(identifier, &options).await;
    print!("{}", render_run_report(&report));
    Ok(report.exit_code())
}
