//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `start`    | `Start`          |
//! | `evidence` | `Evidence`       |
//! | `status`   | `Status`         |
//! | `config`   | `Config`         |

pub mod config;
pub mod evidence;
pub mod start;
pub mod status;

pub use config::cmd_config;
pub use evidence::cmd_evidence;
pub use start::cmd_start;
pub use status::cmd_status;

use std::path::Path;

use anyhow::Result;
use autopilot::config::{Config, Environment};

/// Effective configuration for `project_dir`, with warnings logged.
pub(crate) fn load_config(project_dir: &Path) -> Result<Config> {
    let config = Config::load(project_dir.to_path_buf(), Environment::from_process())?;
    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }
    Ok(config)
}
