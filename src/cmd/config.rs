//! Configuration view, validation and scaffolding: `autopilot config`.

use std::path::Path;

use anyhow::{Context, Result};
use autopilot::autopilot_config::{AutopilotToml, CONFIG_FILE};
use autopilot::config::{
    ENV_AZURE_ORG_URL, ENV_AZURE_PAT, ENV_AZURE_PROJECT, ENV_AZURE_REPO, ENV_GITHUB_REPOSITORY,
    ENV_GITHUB_TOKEN, config_file_path,
};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<i32> {
    // Validate and init must work when the file is missing or unparsable.
    let config_path = config_file_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = super::load_config(project_dir)?;
            let config_path = config.config_path();
            println!();
            println!("Autopilot Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {CONFIG_FILE} found; using defaults.");
            }
            println!();

            let rendered = toml::to_string_pretty(&config.settings)
                .context("Failed to render configuration")?;
            println!("{rendered}");

            println!("Effective values (with env/CLI overrides):");
            println!("  stories_dir = \"{}\"", config.stories_dir().display());
            println!("  base_branch = \"{}\"", config.base_branch(None));
            println!("  remote = \"{}\"", config.remote());
            println!();
            println!("Credentials (values never shown):");
            let present = |set: bool| if set { "set" } else { "not set" };
            println!(
                "  {ENV_GITHUB_TOKEN} = {}",
                present(config.github_token().is_some())
            );
            println!(
                "  {ENV_GITHUB_REPOSITORY} = {}",
                present(config.env.get(ENV_GITHUB_REPOSITORY).is_some())
            );
            println!("  {ENV_AZURE_PAT} = {}", present(config.azure_pat().is_some()));
            for key in [ENV_AZURE_ORG_URL, ENV_AZURE_PROJECT, ENV_AZURE_REPO] {
                println!("  {key} = {}", present(config.env.get(key).is_some()));
            }
            println!();
            Ok(0)
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No {CONFIG_FILE} found. Using defaults (valid).");
                return Ok(0);
            }
            let toml = AutopilotToml::load(&config_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
                Ok(0)
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {warning}");
                }
                Ok(2)
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{CONFIG_FILE} already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(0);
            }
            AutopilotToml::default().save(&config_path)?;
            println!("Created {CONFIG_FILE} at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [paths] stories_dir, state_dir, review_pack_dir");
            println!("  - [git] base_branch, remote");
            println!("  - [github] / [azure] repository coordinates");
            println!("  - [[checks]] local verification commands");
            println!();
            Ok(0)
        }
    }
}
