pub mod icons;
pub mod summary;

pub use summary::render_run_report;
