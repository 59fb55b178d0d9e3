//! Fixtures shared by the integration tests: throwaway git projects with a
//! story record, and helpers to inspect what a run left behind.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

pub const STORY_ID: &str = "ACF-0042";
pub const BRANCH: &str = "feature/ACF-0042-add-caching-layer";
pub const STORY: &str = "# ACF-0042: Add caching layer\n\n\
As an operator I want responses cached so that repeated reads are fast.\n\n\
## Acceptance criteria\n\n- Cache hits skip the backing store\n";

/// Every variable the autopilot reads, so tests never see the host's values.
pub const PROVIDER_ENV: &[&str] = &[
    "AUTOPILOT_BASE_BRANCH",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "GITHUB_REPOSITORY",
    "GITHUB_API_URL",
    "AZURE_DEVOPS_PAT",
    "AZURE_DEVOPS_ORG_URL",
    "AZURE_DEVOPS_PROJECT",
    "AZURE_DEVOPS_REPO",
    "AZURE_DEVOPS_WORK_ITEM_TYPE",
];

/// A git repository on `main` with the story committed.
pub fn init_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(dir.path(), &opts).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
    }
    commit_file(dir.path(), "artifacts/stories/ACF-0042.md", STORY, "add story");
    dir
}

/// Canonical project path, matching what the config layer resolves.
pub fn project_path(dir: &TempDir) -> PathBuf {
    dir.path().canonicalize().unwrap()
}

pub fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
    let repo = Repository::open(dir).unwrap();
    let path = dir.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &parents)
        .unwrap();
}

/// Add a bare repository as `origin` and return it (kept alive by the caller).
pub fn add_bare_origin(dir: &Path) -> TempDir {
    let bare = TempDir::new().unwrap();
    Repository::init_bare(bare.path()).unwrap();
    let repo = Repository::open(dir).unwrap();
    repo.remote("origin", bare.path().to_str().unwrap()).unwrap();
    bare
}

pub fn add_origin_url(dir: &Path, url: &str) {
    let repo = Repository::open(dir).unwrap();
    repo.remote("origin", url).unwrap();
}

pub fn head_branch(dir: &Path) -> String {
    let repo = Repository::open(dir).unwrap();
    let head = repo.head().unwrap();
    head.shorthand().unwrap().to_string()
}

pub fn branch_exists(dir: &Path, name: &str) -> bool {
    let repo = Repository::open(dir).unwrap();
    repo.find_branch(name, git2::BranchType::Local).is_ok()
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join("artifacts/autopilot").join(format!("{STORY_ID}.json"))
}

pub fn review_pack_path(dir: &Path) -> PathBuf {
    dir.join("artifacts/review-pack").join(format!("{STORY_ID}.md"))
}

pub fn read_state(dir: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(state_path(dir)).unwrap();
    serde_json::from_str(&raw).unwrap()
}

pub fn write_config(dir: &Path, toml: &str) {
    let path = dir.join(".autopilot/autopilot.toml");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, toml).unwrap();
}
