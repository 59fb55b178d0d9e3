pub mod autopilot_config;
pub mod config;
pub mod errors;
pub mod evidence;
pub mod orchestrator;
pub mod provider;
pub mod state;
pub mod telemetry;
pub mod tracker;
pub mod ui;
pub mod workitem;
