//! `autopilot start`.

use std::path::Path;

use anyhow::Result;
use autopilot::orchestrator::{Orchestrator, StartOptions};
use autopilot::ui::render_run_report;

/// Run `start` and print the summary. Returns the process exit code.
pub async fn cmd_start(project_dir: &Path, identifier: &str, options: StartOptions) -> Result<i32> {
    let config = super::load_config(project_dir)?;
    let orchestrator = Orchestrator::new(config);
    let report = orchestrator.start(identifier, &options).await;
    print!("{}", render_run_report(&report));
    Ok(report.exit_code())
}
