//! Integration tests for the autopilot CLI
//!
//! Every test runs against a throwaway git project with provider variables
//! scrubbed, so runs are offline unless a test sets credentials explicitly.

mod common;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use common::{BRANCH, STORY_ID};

/// Helper to create an autopilot Command pointed at `dir`
fn autopilot(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("autopilot");
    for key in common::PROVIDER_ENV {
        cmd.env_remove(key);
    }
    cmd.env("NO_COLOR", "1")
        .arg("--project-dir")
        .arg(dir.path());
    cmd
}

const CHECKS_TOML: &str = r#"
[[checks]]
name = "smoke"
command = "echo smoke ok"

[[checks]]
name = "lint"
command = "echo 'lint: 3 warnings'; exit 1"

[[checks]]
name = "scaffold"
command = "echo full only"
fidelity = "full"
"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_autopilot_help() {
        cargo_bin_cmd!("autopilot")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("start"))
            .stdout(predicate::str::contains("evidence"));
    }

    #[test]
    fn test_autopilot_version() {
        cargo_bin_cmd!("autopilot").arg("--version").assert().success();
    }

    #[test]
    fn test_start_unknown_identifier_fails() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["start", "ACF-9999"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("not found"));

        assert_eq!(common::head_branch(dir.path()), "main");
        assert!(!common::review_pack_path(dir.path()).exists());
    }

    #[test]
    fn test_start_rejects_malformed_identifier() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["start", "../etc/passwd"])
            .assert()
            .code(1);
    }
}

// =============================================================================
// Start
// =============================================================================

mod start {
    use super::*;

    #[test]
    fn test_offline_start_creates_branch_and_artifacts() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["start", STORY_ID])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("provider: offline"))
            .stdout(predicate::str::contains("ensure_branch"))
            .stdout(predicate::str::contains("Status: partial"));

        assert_eq!(common::head_branch(dir.path()), BRANCH);

        let pack = fs::read_to_string(common::review_pack_path(dir.path())).unwrap();
        assert!(pack.starts_with("# Review Pack: ACF-0042: Add caching layer"));
        assert!(pack.contains("not requested"));

        let state = common::read_state(dir.path());
        assert_eq!(state["identifier"], STORY_ID);
        assert_eq!(state["branch"], BRANCH);
        assert_eq!(state["baseBranch"], "main");
        assert!(state["provider"].is_null());
        assert!(state["pullRequestId"].is_null());
    }

    #[test]
    fn test_second_start_reuses_branch() {
        let dir = common::init_project();

        autopilot(&dir).args(["start", STORY_ID]).assert().code(2);
        autopilot(&dir)
            .args(["start", STORY_ID])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("reused"));

        assert_eq!(common::head_branch(dir.path()), BRANCH);
    }

    #[test]
    fn test_dry_run_leaves_git_untouched() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["start", STORY_ID, "--dry-run", "--push"])
            .assert()
            .success()
            .stdout(predicate::str::contains("dry-run"))
            .stdout(predicate::str::contains("Status: complete"));

        assert_eq!(common::head_branch(dir.path()), "main");
        assert!(!common::branch_exists(dir.path(), BRANCH));

        let state = common::read_state(dir.path());
        assert_eq!(state["branch"], BRANCH);
        assert!(state["provider"].is_null());
        assert!(state["trackerItemId"].is_null());
    }

    #[test]
    fn test_dirty_worktree_blocks_branch_switch() {
        let dir = common::init_project();
        fs::write(dir.path().join("scratch.txt"), "wip").unwrap();

        autopilot(&dir)
            .args(["start", STORY_ID])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("precondition failed"));

        assert_eq!(common::head_branch(dir.path()), "main");
    }

    #[test]
    fn test_allow_untracked_ignores_untracked_files() {
        let dir = common::init_project();
        fs::write(dir.path().join("scratch.txt"), "wip").unwrap();

        autopilot(&dir)
            .args(["start", STORY_ID, "--allow-untracked"])
            .assert()
            .code(2);

        assert_eq!(common::head_branch(dir.path()), BRANCH);
    }

    #[test]
    fn test_commit_records_review_pack() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["start", STORY_ID, "--commit"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("commit"));

        let repo = git2::Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        let tree = head.tree().unwrap();
        assert!(
            tree.get_path(std::path::Path::new("artifacts/review-pack/ACF-0042.md"))
                .is_ok()
        );
        assert!(
            tree.get_path(std::path::Path::new("artifacts/autopilot/ACF-0042.json"))
                .is_ok()
        );
    }

    #[test]
    fn test_require_integration_without_token_fails_before_side_effects() {
        let dir = common::init_project();
        common::add_origin_url(dir.path(), "https://github.com/acme/app.git");

        autopilot(&dir)
            .args(["start", STORY_ID, "--require-integration"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("GITHUB_TOKEN"));

        assert_eq!(common::head_branch(dir.path()), "main");
        assert!(!common::branch_exists(dir.path(), BRANCH));
        assert!(!common::review_pack_path(dir.path()).exists());
    }

    #[test]
    fn test_unrecognised_remote_runs_offline_even_with_credentials() {
        let dir = common::init_project();
        common::add_origin_url(dir.path(), "https://gitlab.com/acme/app.git");

        autopilot(&dir)
            .env("GITHUB_TOKEN", "ghp_supersecretvalue")
            .env("GITHUB_REPOSITORY", "acme/app")
            .args(["start", STORY_ID])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("(provider: offline)"))
            .stdout(predicate::str::contains(
                "git remote is not a GitHub or Azure DevOps repository",
            ));

        let state = common::read_state(dir.path());
        assert!(state["provider"].is_null());
        assert!(state["remote"].is_null());
    }

    #[test]
    fn test_dry_run_never_persists_credentials() {
        let dir = common::init_project();
        common::add_origin_url(dir.path(), "https://github.com/acme/app.git");

        autopilot(&dir)
            .env("GITHUB_TOKEN", "ghp_supersecretvalue")
            .env("GITHUB_REPOSITORY", "acme/app")
            .args(["start", STORY_ID, "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ghp_").not());

        let raw = fs::read_to_string(common::state_path(dir.path())).unwrap();
        assert!(!raw.contains("ghp_"));
        let pack = fs::read_to_string(common::review_pack_path(dir.path())).unwrap();
        assert!(!pack.contains("ghp_"));
    }
}

// =============================================================================
// Evidence
// =============================================================================

mod evidence {
    use super::*;

    #[test]
    fn test_evidence_without_local_checks() {
        let dir = common::init_project();
        autopilot(&dir).args(["start", STORY_ID]).assert().code(2);

        autopilot(&dir)
            .args(["evidence", STORY_ID])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("run_checks"));

        let pack = fs::read_to_string(common::review_pack_path(dir.path())).unwrap();
        assert!(pack.contains("Mode: not requested"));
    }

    #[test]
    fn test_evidence_runs_fast_checks() {
        let dir = common::init_project();
        common::write_config(dir.path(), CHECKS_TOML);
        autopilot(&dir)
            .args(["start", STORY_ID, "--allow-untracked"])
            .assert()
            .code(2);

        autopilot(&dir)
            .args(["evidence", STORY_ID, "--run-local"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains(
                "fast checks; Check 'lint' failed: lint: 3 warnings",
            ));

        let pack = fs::read_to_string(common::review_pack_path(dir.path())).unwrap();
        assert!(pack.contains("1 passed, 1 failed, 0 skipped"));
        assert!(pack.contains("lint: 3 warnings"));
        assert!(!pack.contains("`scaffold`"));

        let state = common::read_state(dir.path());
        assert_eq!(state["evidenceDigest"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_full_verify_includes_full_checks() {
        let dir = common::init_project();
        common::write_config(dir.path(), CHECKS_TOML);
        autopilot(&dir)
            .args(["start", STORY_ID, "--allow-untracked"])
            .assert()
            .code(2);

        autopilot(&dir)
            .args(["evidence", STORY_ID, "--full-verify"])
            .assert()
            .code(2);

        let pack = fs::read_to_string(common::review_pack_path(dir.path())).unwrap();
        assert!(pack.contains("2 passed, 1 failed, 0 skipped"));
        assert!(pack.contains("`scaffold`"));
    }

    #[test]
    fn test_evidence_without_state_still_writes_pack() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["evidence", STORY_ID])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("no state recorded"));

        assert!(common::review_pack_path(dir.path()).exists());
        assert!(!common::state_path(dir.path()).exists());
    }
}

// =============================================================================
// Status & Config
// =============================================================================

mod status {
    use super::*;

    #[test]
    fn test_status_before_start() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["status", STORY_ID])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("No autopilot state recorded"));
    }

    #[test]
    fn test_status_after_start() {
        let dir = common::init_project();
        autopilot(&dir).args(["start", STORY_ID]).assert().code(2);

        autopilot(&dir)
            .args(["status", STORY_ID])
            .assert()
            .success()
            .stdout(predicate::str::contains(BRANCH))
            .stdout(predicate::str::contains("completedSteps"));
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = common::init_project();

        autopilot(&dir)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("No autopilot.toml found"))
            .stdout(predicate::str::contains("base_branch = \"main\""))
            .stdout(predicate::str::contains("GITHUB_TOKEN = not set"));
    }

    #[test]
    fn test_config_show_masks_credentials() {
        let dir = common::init_project();

        autopilot(&dir)
            .env("GITHUB_TOKEN", "ghp_supersecretvalue")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("GITHUB_TOKEN = set"))
            .stdout(predicate::str::contains("ghp_").not());
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created autopilot.toml"));

        let path = dir.path().join(".autopilot/autopilot.toml");
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("[paths]"));
        assert!(content.contains("[[checks]]"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = common::init_project();

        autopilot(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults"));
    }

    #[test]
    fn test_config_validate_with_config() {
        let dir = common::init_project();
        common::write_config(dir.path(), CHECKS_TOML);

        autopilot(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_env_base_branch_override() {
        let dir = common::init_project();

        autopilot(&dir)
            .env("AUTOPILOT_BASE_BRANCH", "develop")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("base_branch = \"develop\""));
    }
}
