//! Work-item descriptor resolution.
//!
//! Turns a story identifier such as `ACF-0042` into a [`WorkItemDescriptor`]
//! by locating its markdown record under the stories directory. No network.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::errors::AutopilotError;

/// Maximum slug length used in branch names.
pub const SLUG_MAX_LEN: usize = 40;

/// Default identifier pattern.
pub const DEFAULT_ID_PATTERN: &str = r"^ACF-\d+$";

/// Normalized description of one unit of work, re-derived on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemDescriptor {
    pub identifier: String,
    pub title: String,
    pub slug: String,
    /// Path of the story record relative to the project root.
    pub source_path: PathBuf,
}

impl WorkItemDescriptor {
    pub fn new(identifier: &str, title: &str, source_path: PathBuf) -> Self {
        Self {
            identifier: identifier.to_string(),
            title: title.to_string(),
            slug: slugify(title, SLUG_MAX_LEN),
            source_path,
        }
    }

    /// Deterministic feature branch name: `feature/<identifier>-<slug>`.
    pub fn branch_name(&self) -> String {
        branch_name_for(&self.identifier, &self.title)
    }

    /// Title used for tracker items and pull requests.
    pub fn display_title(&self) -> String {
        format!("{}: {}", self.identifier, self.title)
    }
}

/// Convert a title into a branch-safe slug.
///
/// Non-alphanumeric runs collapse to one `-`, the result is lower-cased and
/// truncated to `max_len` without a trailing separator. Falls back to `work`.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    };
    if slug.is_empty() {
        "work".to_string()
    } else {
        slug
    }
}

pub fn branch_name_for(identifier: &str, title: &str) -> String {
    format!("feature/{}-{}", identifier, slugify(title, SLUG_MAX_LEN))
}

/// Locates and parses story records.
#[derive(Debug, Clone)]
pub struct Resolver {
    project_dir: PathBuf,
    stories_dir: PathBuf,
    id_pattern: Regex,
}

impl Resolver {
    /// `stories_dir` is relative to `project_dir` unless absolute.
    pub fn new(
        project_dir: &Path,
        stories_dir: &Path,
        id_pattern: &str,
    ) -> Result<Self, AutopilotError> {
        let id_pattern = Regex::new(id_pattern)
            .map_err(|e| AutopilotError::Config(format!("invalid id_pattern: {e}")))?;
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            stories_dir: project_dir.join(stories_dir),
            id_pattern,
        })
    }

    /// Reject identifiers outside the configured pattern or unusable as a
    /// file name.
    pub fn check_identifier(&self, identifier: &str) -> Result<(), AutopilotError> {
        let reason = if !self.id_pattern.is_match(identifier) {
            format!(
                "identifier does not match pattern {}",
                self.id_pattern.as_str()
            )
        } else if identifier.starts_with('.') || identifier.contains(['/', '\\']) {
            "identifier cannot contain path separators or start with '.'".to_string()
        } else {
            return Ok(());
        };
        Err(AutopilotError::NotFound {
            identifier: identifier.to_string(),
            reason,
        })
    }

    pub fn resolve(&self, identifier: &str) -> Result<WorkItemDescriptor, AutopilotError> {
        self.check_identifier(identifier)?;

        let path = self
            .locate(identifier)
            .ok_or_else(|| AutopilotError::NotFound {
                identifier: identifier.to_string(),
                reason: format!("no story record under {}", self.stories_dir.display()),
            })?;

        let content = std::fs::read_to_string(&path).map_err(|e| AutopilotError::Malformed {
            path: path.clone(),
            reason: format!("unreadable: {e}"),
        })?;

        let title = parse_title(&content, identifier).ok_or_else(|| AutopilotError::Malformed {
            path: path.clone(),
            reason: "no title in front-matter or heading".to_string(),
        })?;

        let relative = path
            .strip_prefix(&self.project_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());

        tracing::debug!(identifier, path = %relative.display(), %title, "resolved story");
        Ok(WorkItemDescriptor::new(identifier, &title, relative))
    }

    fn locate(&self, identifier: &str) -> Option<PathBuf> {
        let direct = self.stories_dir.join(format!("{identifier}.md"));
        if direct.is_file() {
            return Some(direct);
        }
        if !self.stories_dir.is_dir() {
            return None;
        }

        let candidates: Vec<PathBuf> = WalkDir::new(&self.stories_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();

        // A file named after the identifier beats one that merely mentions it,
        // so ACF-1 never resolves to a story that references ACF-10.
        let by_name = candidates.iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(identifier))
                .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_digit()))
        });
        if let Some(path) = by_name {
            return Some(path.clone());
        }

        let mention = Regex::new(&format!(r"\b{}\b", regex::escape(identifier))).ok()?;
        candidates.into_iter().find(|p| {
            std::fs::read_to_string(p)
                .map(|c| mention.is_match(&c))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Deserialize)]
struct FrontMatter {
    title: Option<String>,
}

/// Front-matter `title:` wins, otherwise the first markdown heading with the
/// identifier stripped.
fn parse_title(content: &str, identifier: &str) -> Option<String> {
    if let Some(yaml) = front_matter(content)
        && let Ok(fm) = serde_yaml::from_str::<FrontMatter>(yaml)
        && let Some(title) = fm.title.map(|t| t.trim().to_string())
        && !title.is_empty()
    {
        return Some(title);
    }

    let heading = content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#') && l.trim_start_matches('#').starts_with(' '))?;
    let title = heading
        .trim_start_matches('#')
        .replace(identifier, "")
        .trim_matches(|c: char| c == ' ' || c == '-' || c == ':')
        .to_string();
    if title.is_empty() { None } else { Some(title) }
}

fn front_matter(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}
