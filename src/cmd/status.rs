//! `autopilot status`: print the persisted record for an identifier.

use std::path::Path;

use anyhow::{Context, Result};
use autopilot::orchestrator::Orchestrator;

pub fn cmd_status(project_dir: &Path, identifier: &str) -> Result<i32> {
    let config = super::load_config(project_dir)?;
    let orchestrator = Orchestrator::new(config);
    match orchestrator.status(identifier)? {
        Some(state) => {
            let json =
                serde_json::to_string_pretty(&state).context("Failed to serialize state")?;
            println!("{json}");
            Ok(0)
        }
        None => {
            println!("No autopilot state recorded for {identifier}.");
            println!("Run 'autopilot start {identifier}' first.");
            Ok(1)
        }
    }
}
