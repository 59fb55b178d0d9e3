//! Evidence generation: run local verification checks and render the review
//! pack and the pull request comment from the resulting report.

pub mod checks;
pub mod render;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use checks::{Check, CheckOutcome, ShellCheck};
pub use render::render;

/// First line of every evidence comment; the key for in-place updates.
pub const EVIDENCE_MARKER: &str = "<!-- acf-autopilot:evidence -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "pass"),
            CheckStatus::Fail => write!(f, "fail"),
            CheckStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub summary: String,
    /// Bounded tail of the check output.
    pub detail: Option<String>,
}

/// Which checks a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvidenceMode {
    /// Checks listed but not run.
    NotRequested,
    Fast,
    Full,
}

impl fmt::Display for EvidenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceMode::NotRequested => write!(f, "not requested"),
            EvidenceMode::Fast => write!(f, "fast"),
            EvidenceMode::Full => write!(f, "full"),
        }
    }
}

/// Everything rendering needs. Rendering is a pure function of this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceReport {
    pub identifier: String,
    pub title: String,
    pub story_path: PathBuf,
    pub review_pack_path: PathBuf,
    pub branch: String,
    pub mode: EvidenceMode,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<CheckResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        )
    }
}

impl EvidenceReport {
    pub fn counts(&self) -> StatusCounts {
        self.results
            .iter()
            .fold(StatusCounts::default(), |mut counts, r| {
                match r.status {
                    CheckStatus::Pass => counts.passed += 1,
                    CheckStatus::Fail => counts.failed += 1,
                    CheckStatus::Skipped => counts.skipped += 1,
                }
                counts
            })
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.status == CheckStatus::Fail)
    }

    /// SHA-256 over check names, statuses and summaries.
    ///
    /// Identifies the outcome set independent of timestamps and output tails.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for r in &self.results {
            hasher.update(r.name.as_bytes());
            hasher.update(b"\t");
            hasher.update(r.status.to_string().as_bytes());
            hasher.update(b"\t");
            hasher.update(r.summary.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{report, result};
    use super::*;

    #[test]
    fn test_counts() {
        let r = report(vec![
            result("a", CheckStatus::Pass, "ok"),
            result("b", CheckStatus::Fail, "2 errors"),
            result("c", CheckStatus::Skipped, "missing"),
            result("d", CheckStatus::Pass, "ok"),
        ]);
        let counts = r.counts();
        assert_eq!(counts.passed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.to_string(), "2 passed, 1 failed, 1 skipped");
        assert_eq!(r.failures().count(), 1);
    }

    #[test]
    fn test_digest_ignores_timestamp_and_detail() {
        let a = report(vec![result("a", CheckStatus::Pass, "ok")]);
        let mut b = a.clone();
        b.generated_at = Utc::now();
        b.results[0].detail = Some("noise".into());
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_digest_changes_with_status() {
        let a = report(vec![result("a", CheckStatus::Fail, "boom")]);
        let b = report(vec![result("a", CheckStatus::Pass, "boom")]);
        assert_ne!(a.digest(), b.digest());
    }
}
