use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use super::http::HttpClient;
use super::{Provider, ProviderKind, ProviderMode, ProviderResult, PullRequestSpec, title_matches};
use crate::config::SecretToken;
use crate::errors::ProviderError;
use crate::state::{RemoteCoordinates, SafeId, SafeUrl};
use crate::workitem::WorkItemDescriptor;

const API_VERSION: &str = "2022-11-28";
const PER_PAGE: usize = 100;
const LABELS: [&str; 2] = ["ai-coding-factory", "autopilot"];

/// A GitHub issue (subset of fields).
#[derive(Debug, Deserialize, Serialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    #[serde(default)]
    pub state: Option<String>,
    /// Pull requests also come through the issues endpoints; filter them out.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<GitHubIssue>,
}

/// A GitHub pull request (subset of fields).
#[derive(Debug, Deserialize, Serialize)]
pub struct GitHubPull {
    pub number: u64,
    pub html_url: String,
    pub state: String,
}

/// A GitHub issue comment (subset of fields).
#[derive(Debug, Deserialize, Serialize)]
pub struct GitHubComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
}

#[derive(Debug, Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    body: &'a str,
    labels: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct NewPull<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
    draft: bool,
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

/// REST v3 client for one repository.
pub struct GithubProvider {
    http: HttpClient,
    api_url: SafeUrl,
    repo: SafeId,
    token: SecretToken,
}

impl GithubProvider {
    pub fn new(
        api_url: SafeUrl,
        repo: SafeId,
        token: SecretToken,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: HttpClient::new(ProviderKind::Github, timeout)?,
            api_url,
            repo,
            token,
        })
    }

    fn owner(&self) -> &str {
        self.repo
            .as_str()
            .split_once('/')
            .map(|(owner, _)| owner)
            .unwrap_or(self.repo.as_str())
    }

    /// `<api>/repos/<owner>/<repo>/<rest...>`
    fn repo_url(&self, rest: &[&str]) -> Result<Url, ProviderError> {
        let mut segments: Vec<&str> = vec!["repos"];
        segments.extend(self.repo.as_str().split('/'));
        segments.extend_from_slice(rest);
        HttpClient::endpoint(self.api_url.as_str(), &segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .inner()
            .request(method, url)
            .bearer_auth(self.token.expose())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn failed(&self, what: &str, err: ProviderError) -> ProviderResult {
        tracing::warn!(provider = "github", operation = what, error = %err, "provider call failed");
        ProviderResult::from_error(ProviderKind::Github, what, &err)
    }

    async fn get_issue(&self, number: &str) -> Result<Option<GitHubIssue>, ProviderError> {
        let url = self.repo_url(&["issues", number])?;
        let issue: Option<GitHubIssue> = self.http.send_optional(self.request(Method::GET, url)).await?;
        Ok(issue.filter(|i| i.pull_request.is_none()))
    }

    async fn search_issue(&self, identifier: &str) -> Result<Option<GitHubIssue>, ProviderError> {
        let url = HttpClient::endpoint(self.api_url.as_str(), &["search", "issues"])?;
        let query = format!("repo:{} \"{}\" in:title type:issue", self.repo, identifier);
        let response: SearchResponse = self
            .http
            .send_json(self.request(Method::GET, url).query(&[("q", query.as_str())]))
            .await?;
        // Search is fuzzy; only accept titles that start with the identifier.
        Ok(response
            .items
            .into_iter()
            .find(|i| i.pull_request.is_none() && title_matches(&i.title, identifier)))
    }

    async fn create_issue(
        &self,
        descriptor: &WorkItemDescriptor,
        story: &str,
    ) -> Result<GitHubIssue, ProviderError> {
        let url = self.repo_url(&["issues"])?;
        let body = issue_body(descriptor, story);
        let title = descriptor.display_title();
        let payload = NewIssue {
            title: &title,
            body: &body,
            labels: &LABELS,
        };
        self.http
            .send_json(self.request(Method::POST, url).json(&payload))
            .await
    }

    async fn get_pull(&self, number: &str) -> Result<Option<GitHubPull>, ProviderError> {
        let url = self.repo_url(&["pulls", number])?;
        self.http.send_optional(self.request(Method::GET, url)).await
    }

    async fn find_open_pull(&self, branch: &str) -> Result<Option<GitHubPull>, ProviderError> {
        let url = self.repo_url(&["pulls"])?;
        let head = format!("{}:{}", self.owner(), branch);
        let pulls: Vec<GitHubPull> = self
            .http
            .send_json(
                self.request(Method::GET, url)
                    .query(&[("head", head.as_str()), ("state", "open")]),
            )
            .await?;
        Ok(pulls.into_iter().next())
    }

    async fn list_comments(&self, number: &str) -> Result<Vec<GitHubComment>, ProviderError> {
        let url = self.repo_url(&["issues", number, "comments"])?;
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let batch: Vec<GitHubComment> = self
                .http
                .send_json(self.request(Method::GET, url.clone()).query(&[
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ]))
                .await?;
            let count = batch.len();
            all.extend(batch);
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn upsert_comment(
        &self,
        pull_request_id: &str,
        marker: &str,
        body: &str,
    ) -> Result<ProviderResult, ProviderError> {
        let existing = self
            .list_comments(pull_request_id)
            .await?
            .into_iter()
            .find(|c| c.body.as_deref().is_some_and(|b| b.contains(marker)));

        let payload = CommentBody { body };
        match existing {
            Some(comment) => {
                let url = self.repo_url(&["issues", "comments", &comment.id.to_string()])?;
                let updated: GitHubComment = self
                    .http
                    .send_json(self.request(Method::PATCH, url).json(&payload))
                    .await?;
                Ok(ProviderResult::reused(
                    ProviderKind::Github,
                    updated.id,
                    Some(updated.html_url),
                )
                .with_detail("updated in place"))
            }
            None => {
                let url = self.repo_url(&["issues", pull_request_id, "comments"])?;
                let created: GitHubComment = self
                    .http
                    .send_json(self.request(Method::POST, url).json(&payload))
                    .await?;
                Ok(ProviderResult::created(
                    ProviderKind::Github,
                    created.id,
                    Some(created.html_url),
                ))
            }
        }
    }
}

fn issue_body(descriptor: &WorkItemDescriptor, story: &str) -> String {
    format!(
        "{}\n\nThis issue is managed by AI Coding Factory Autopilot.\n\n**Story file (source of truth)**: `{}`\n\n---\n{}\n",
        descriptor.display_title(),
        descriptor.source_path.display(),
        story.trim_end()
    )
}

#[async_trait]
impl Provider for GithubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Github
    }

    fn mode(&self) -> ProviderMode {
        ProviderMode::Live
    }

    fn coordinates(&self) -> Option<RemoteCoordinates> {
        Some(RemoteCoordinates::Github {
            api_url: self.api_url.clone(),
            repo: self.repo.clone(),
        })
    }

    fn tracker_reference(&self, tracker_id: &str) -> Option<String> {
        Some(format!("Closes #{tracker_id}"))
    }

    async fn find_or_create_tracker_item(
        &self,
        descriptor: &WorkItemDescriptor,
        story: &str,
        known_id: Option<&str>,
    ) -> ProviderResult {
        if let Some(id) = known_id {
            match self.get_issue(id).await {
                Ok(Some(issue)) => {
                    return ProviderResult::reused(ProviderKind::Github, issue.number, Some(issue.html_url));
                }
                Ok(None) => tracing::info!(issue = id, "recorded issue not found, searching"),
                Err(e) => return self.failed("get issue", e),
            }
        }

        match self.search_issue(&descriptor.identifier).await {
            Ok(Some(issue)) => {
                return ProviderResult::reused(ProviderKind::Github, issue.number, Some(issue.html_url));
            }
            Ok(None) => {}
            Err(e) => return self.failed("search issues", e),
        }

        match self.create_issue(descriptor, story).await {
            Ok(issue) => {
                tracing::info!(issue = issue.number, "created GitHub issue");
                ProviderResult::created(ProviderKind::Github, issue.number, Some(issue.html_url))
            }
            Err(e) => self.failed("create issue", e),
        }
    }

    async fn find_pull_request(&self, branch: &str) -> ProviderResult {
        match self.find_open_pull(branch).await {
            Ok(Some(pull)) => {
                ProviderResult::reused(ProviderKind::Github, pull.number, Some(pull.html_url))
            }
            Ok(None) => ProviderResult::skipped(
                ProviderKind::Github,
                format!("no open pull request for {branch}"),
            ),
            Err(e) => self.failed("find pull request", e),
        }
    }

    async fn find_or_create_pull_request(
        &self,
        spec: &PullRequestSpec,
        known_id: Option<&str>,
    ) -> ProviderResult {
        if let Some(id) = known_id {
            match self.get_pull(id).await {
                Ok(Some(pull)) if pull.state == "open" => {
                    return ProviderResult::reused(ProviderKind::Github, pull.number, Some(pull.html_url));
                }
                Ok(_) => tracing::info!(pull = id, "recorded pull request not open, looking up by branch"),
                Err(e) => return self.failed("get pull request", e),
            }
        }

        match self.find_open_pull(&spec.head).await {
            Ok(Some(pull)) => {
                return ProviderResult::reused(ProviderKind::Github, pull.number, Some(pull.html_url));
            }
            Ok(None) => {}
            Err(e) => return self.failed("find pull request", e),
        }

        let payload = NewPull {
            title: &spec.title,
            head: &spec.head,
            base: &spec.base,
            body: &spec.body,
            draft: spec.draft,
        };
        let result: Result<GitHubPull, ProviderError> = async {
            let url = self.repo_url(&["pulls"])?;
            self.http
                .send_json(self.request(Method::POST, url).json(&payload))
                .await
        }
        .await;
        match result {
            Ok(pull) => {
                tracing::info!(pull = pull.number, "created GitHub pull request");
                ProviderResult::created(ProviderKind::Github, pull.number, Some(pull.html_url))
            }
            Err(e) => self.failed("create pull request", e),
        }
    }

    async fn link_work_item_to_pull_request(
        &self,
        _work_item_id: &str,
        _pull_request_id: &str,
    ) -> ProviderResult {
        ProviderResult::skipped(
            ProviderKind::Github,
            "linked by the closing keyword in the pull request body",
        )
    }

    async fn upsert_evidence_comment(
        &self,
        pull_request_id: &str,
        marker: &str,
        body: &str,
    ) -> ProviderResult {
        let body = if body.starts_with(marker) {
            body.to_string()
        } else {
            format!("{marker}\n{body}")
        };
        match self.upsert_comment(pull_request_id, marker, &body).await {
            Ok(result) => result,
            Err(e) => self.failed("upsert evidence comment", e),
        }
    }
}
