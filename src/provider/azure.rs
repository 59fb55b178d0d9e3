use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::http::HttpClient;
use super::{Provider, ProviderKind, ProviderMode, ProviderResult, PullRequestSpec, title_matches};
use crate::config::SecretToken;
use crate::errors::ProviderError;
use crate::state::{RemoteCoordinates, SafeId, SafeUrl};
use crate::workitem::WorkItemDescriptor;

const API_VERSION: &str = "7.1";
const JSON_PATCH: &str = "application/json-patch+json";
/// Longest story excerpt embedded in a work item description.
const DESCRIPTION_LIMIT: usize = 20_000;
/// WIQL hits whose titles are checked before giving up and creating.
const CANDIDATE_LIMIT: usize = 20;

/// Where the Azure DevOps resources live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCoordinates {
    pub org_url: SafeUrl,
    pub project: SafeId,
    pub repo: SafeId,
    pub work_item_type: SafeId,
}

#[derive(Debug, Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems", default)]
    work_items: Vec<WorkItemRef>,
}

#[derive(Debug, Deserialize)]
struct WorkItemRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WorkItem {
    id: u64,
    #[serde(default)]
    fields: WorkItemFields,
    #[serde(default)]
    relations: Option<Vec<Relation>>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkItemFields {
    #[serde(rename = "System.Title", default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relation {
    rel: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    pull_request_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    id: String,
    project: ProjectRef,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Thread {
    id: u64,
    #[serde(default)]
    comments: Vec<ThreadComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadComment {
    id: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewPullRequest<'a> {
    source_ref_name: String,
    target_ref_name: String,
    title: &'a str,
    description: &'a str,
    is_draft: bool,
}

/// REST 7.1 client for one project/repository, authenticated with a PAT.
pub struct AzureProvider {
    http: HttpClient,
    coords: AzureCoordinates,
    pat: SecretToken,
}

impl AzureProvider {
    pub fn new(
        coords: AzureCoordinates,
        pat: SecretToken,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: HttpClient::new(ProviderKind::AzureDevops, timeout)?,
            coords,
            pat,
        })
    }

    /// `<org>/<project>/<rest...>`
    fn project_url(&self, rest: &[&str]) -> Result<Url, ProviderError> {
        let mut segments = vec![self.coords.project.as_str()];
        segments.extend_from_slice(rest);
        HttpClient::endpoint(self.coords.org_url.as_str(), &segments)
    }

    /// `<org>/<project>/_apis/git/repositories/<repo>/<rest...>`
    fn repo_api_url(&self, rest: &[&str]) -> Result<Url, ProviderError> {
        let mut segments = vec!["_apis", "git", "repositories", self.coords.repo.as_str()];
        segments.extend_from_slice(rest);
        self.project_url(&segments)
    }

    fn work_item_web_url(&self, id: u64) -> Option<String> {
        self.project_url(&["_workitems", "edit", &id.to_string()])
            .ok()
            .map(String::from)
    }

    fn pull_request_web_url(&self, id: u64) -> Option<String> {
        self.project_url(&["_git", self.coords.repo.as_str(), "pullrequest", &id.to_string()])
            .ok()
            .map(String::from)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .inner()
            .request(method, url)
            .basic_auth("", Some(self.pat.expose()))
            .header("Accept", "application/json")
            .query(&[("api-version", API_VERSION)])
    }

    fn json_patch(
        &self,
        method: Method,
        url: Url,
        patch: &serde_json::Value,
    ) -> Result<RequestBuilder, ProviderError> {
        let body = serde_json::to_vec(patch).map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(self
            .request(method, url)
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(body))
    }

    fn failed(&self, what: &str, err: ProviderError) -> ProviderResult {
        tracing::warn!(provider = "azure-devops", operation = what, error = %err, "provider call failed");
        ProviderResult::from_error(ProviderKind::AzureDevops, what, &err)
    }

    async fn get_work_item(
        &self,
        id: &str,
        with_relations: bool,
    ) -> Result<Option<WorkItem>, ProviderError> {
        let url = self.project_url(&["_apis", "wit", "workitems", id])?;
        let mut request = self.request(Method::GET, url);
        if with_relations {
            request = request.query(&[("$expand", "relations")]);
        }
        self.http.send_optional(request).await
    }

    /// WIQL `CONTAINS` is a substring match, so every hit is fetched and only
    /// a title that starts with the identifier is accepted.
    async fn find_work_item(&self, identifier: &str) -> Result<Option<u64>, ProviderError> {
        let url = self.project_url(&["_apis", "wit", "wiql"])?;
        let query = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project AND [System.Title] CONTAINS '{}' ORDER BY [System.ChangedDate] DESC",
            identifier.replace('\'', "''")
        );
        let response: WiqlResponse = self
            .http
            .send_json(self.request(Method::POST, url).json(&json!({ "query": query })))
            .await?;
        for candidate in response.work_items.iter().take(CANDIDATE_LIMIT) {
            let Some(item) = self.get_work_item(&candidate.id.to_string(), false).await? else {
                continue;
            };
            if item
                .fields
                .title
                .as_deref()
                .is_some_and(|t| title_matches(t, identifier))
            {
                return Ok(Some(item.id));
            }
            tracing::debug!(work_item = item.id, "WIQL hit does not start with the identifier");
        }
        Ok(None)
    }

    async fn create_work_item(
        &self,
        descriptor: &WorkItemDescriptor,
        story: &str,
    ) -> Result<WorkItem, ProviderError> {
        let type_segment = format!("${}", self.coords.work_item_type);
        let url = self.project_url(&["_apis", "wit", "workitems", &type_segment])?;
        let patch = json!([
            { "op": "add", "path": "/fields/System.Title", "value": descriptor.display_title() },
            { "op": "add", "path": "/fields/System.Description", "value": work_item_description(descriptor, story) },
        ]);
        let request = self.json_patch(Method::POST, url, &patch)?;
        self.http.send_json(request).await
    }

    async fn get_pull_request(&self, id: &str) -> Result<Option<PullRequest>, ProviderError> {
        let url = self.project_url(&["_apis", "git", "pullrequests", id])?;
        self.http.send_optional(self.request(Method::GET, url)).await
    }

    async fn find_active_pull_request(
        &self,
        branch: &str,
    ) -> Result<Option<PullRequest>, ProviderError> {
        let url = self.repo_api_url(&["pullrequests"])?;
        let source = format!("refs/heads/{branch}");
        let response: ListResponse<PullRequest> = self
            .http
            .send_json(self.request(Method::GET, url).query(&[
                ("searchCriteria.sourceRefName", source.as_str()),
                ("searchCriteria.status", "active"),
            ]))
            .await?;
        Ok(response.value.into_iter().next())
    }

    async fn create_pull_request(
        &self,
        spec: &PullRequestSpec,
    ) -> Result<PullRequest, ProviderError> {
        let url = self.repo_api_url(&["pullrequests"])?;
        let payload = NewPullRequest {
            source_ref_name: format!("refs/heads/{}", spec.head),
            target_ref_name: format!("refs/heads/{}", spec.base),
            title: &spec.title,
            description: &spec.body,
            is_draft: spec.draft,
        };
        self.http
            .send_json(self.request(Method::POST, url).json(&payload))
            .await
    }

    async fn link(
        &self,
        work_item_id: &str,
        pull_request_id: &str,
    ) -> Result<ProviderResult, ProviderError> {
        // The artifact URL needs the project and repository GUIDs, which only
        // the pull request resource carries.
        let pull = self
            .get_pull_request(pull_request_id)
            .await?
            .ok_or_else(|| ProviderError::Decode(format!("pull request {pull_request_id} not found")))?;
        let repository = pull
            .repository
            .ok_or_else(|| ProviderError::Decode("pull request without repository".into()))?;
        let artifact = artifact_url(&repository.project.id, &repository.id, pull.pull_request_id);

        let work_item = self
            .get_work_item(work_item_id, true)
            .await?
            .ok_or_else(|| ProviderError::Decode(format!("work item {work_item_id} not found")))?;
        let already_linked = work_item
            .relations
            .unwrap_or_default()
            .iter()
            .any(|r| r.rel == "ArtifactLink" && r.url.eq_ignore_ascii_case(&artifact));
        if already_linked {
            return Ok(ProviderResult::reused(ProviderKind::AzureDevops, &artifact, None)
                .with_detail("link already present"));
        }

        let url = self.project_url(&["_apis", "wit", "workitems", work_item_id])?;
        let patch = json!([{
            "op": "add",
            "path": "/relations/-",
            "value": {
                "rel": "ArtifactLink",
                "url": artifact,
                "attributes": { "name": "Pull Request" }
            }
        }]);
        let request = self.json_patch(Method::PATCH, url, &patch)?;
        let _: WorkItem = self.http.send_json(request).await?;
        tracing::info!(work_item = work_item_id, pull_request = pull_request_id, "linked work item");
        Ok(ProviderResult::created(ProviderKind::AzureDevops, artifact, None))
    }

    async fn upsert_comment(
        &self,
        pull_request_id: &str,
        marker: &str,
        body: &str,
    ) -> Result<ProviderResult, ProviderError> {
        let url = self.repo_api_url(&["pullRequests", pull_request_id, "threads"])?;
        let threads: ListResponse<Thread> = self
            .http
            .send_json(self.request(Method::GET, url.clone()))
            .await?;

        let existing = threads.value.iter().find_map(|thread| {
            thread
                .comments
                .iter()
                .find(|c| !c.is_deleted && c.content.as_deref().is_some_and(|b| b.contains(marker)))
                .map(|c| (thread.id, c.id))
        });

        let web_url = pull_request_id
            .parse::<u64>()
            .ok()
            .and_then(|id| self.pull_request_web_url(id));

        match existing {
            Some((thread_id, comment_id)) => {
                let url = self.repo_api_url(&[
                    "pullRequests",
                    pull_request_id,
                    "threads",
                    &thread_id.to_string(),
                    "comments",
                    &comment_id.to_string(),
                ])?;
                let _: serde_json::Value = self
                    .http
                    .send_json(self.request(Method::PATCH, url).json(&json!({ "content": body })))
                    .await?;
                Ok(ProviderResult::reused(
                    ProviderKind::AzureDevops,
                    format!("{thread_id}:{comment_id}"),
                    web_url,
                )
                .with_detail("updated in place"))
            }
            None => {
                let payload = json!({
                    "comments": [{ "parentCommentId": 0, "content": body, "commentType": 1 }],
                    "status": 1
                });
                let thread: Thread = self
                    .http
                    .send_json(self.request(Method::POST, url).json(&payload))
                    .await?;
                let comment_id = thread.comments.first().map(|c| c.id).ok_or_else(|| {
                    ProviderError::Decode(format!("thread {} came back without comments", thread.id))
                })?;
                Ok(ProviderResult::created(
                    ProviderKind::AzureDevops,
                    format!("{}:{}", thread.id, comment_id),
                    web_url,
                ))
            }
        }
    }
}

fn artifact_url(project_id: &str, repository_id: &str, pull_request_id: u64) -> String {
    format!("vstfs:///Git/PullRequestId/{project_id}%2F{repository_id}%2F{pull_request_id}")
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn work_item_description(descriptor: &WorkItemDescriptor, story: &str) -> String {
    let excerpt = if story.len() > DESCRIPTION_LIMIT {
        &story[..story.floor_char_boundary(DESCRIPTION_LIMIT)]
    } else {
        story
    };
    format!(
        "<p><strong>Managed by AI Coding Factory Autopilot</strong></p>\n<p><strong>Story ID:</strong> {}</p>\n<p><strong>Story file:</strong> {}</p>\n<pre>{}</pre>",
        html_escape(&descriptor.identifier),
        html_escape(&descriptor.source_path.display().to_string()),
        html_escape(excerpt)
    )
}

#[async_trait]
impl Provider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureDevops
    }

    fn mode(&self) -> ProviderMode {
        ProviderMode::Live
    }

    fn coordinates(&self) -> Option<RemoteCoordinates> {
        Some(RemoteCoordinates::AzureDevops {
            org_url: self.coords.org_url.clone(),
            project: self.coords.project.clone(),
            repo: self.coords.repo.clone(),
            work_item_type: self.coords.work_item_type.clone(),
        })
    }

    fn tracker_reference(&self, tracker_id: &str) -> Option<String> {
        Some(format!("AB#{tracker_id}"))
    }

    async fn find_or_create_tracker_item(
        &self,
        descriptor: &WorkItemDescriptor,
        story: &str,
        known_id: Option<&str>,
    ) -> ProviderResult {
        if let Some(id) = known_id {
            match self.get_work_item(id, false).await {
                Ok(Some(item)) => {
                    return ProviderResult::reused(
                        ProviderKind::AzureDevops,
                        item.id,
                        self.work_item_web_url(item.id),
                    );
                }
                Ok(None) => tracing::info!(work_item = id, "recorded work item not found, querying"),
                Err(e) => return self.failed("get work item", e),
            }
        }

        match self.find_work_item(&descriptor.identifier).await {
            Ok(Some(id)) => {
                return ProviderResult::reused(ProviderKind::AzureDevops, id, self.work_item_web_url(id));
            }
            Ok(None) => {}
            Err(e) => return self.failed("query work items", e),
        }

        match self.create_work_item(descriptor, story).await {
            Ok(item) => {
                tracing::info!(work_item = item.id, "created Azure DevOps work item");
                ProviderResult::created(
                    ProviderKind::AzureDevops,
                    item.id,
                    self.work_item_web_url(item.id),
                )
            }
            Err(e) => self.failed("create work item", e),
        }
    }

    async fn find_pull_request(&self, branch: &str) -> ProviderResult {
        match self.find_active_pull_request(branch).await {
            Ok(Some(pr)) => ProviderResult::reused(
                ProviderKind::AzureDevops,
                pr.pull_request_id,
                self.pull_request_web_url(pr.pull_request_id),
            ),
            Ok(None) => ProviderResult::skipped(
                ProviderKind::AzureDevops,
                format!("no active pull request for {branch}"),
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
            match self.get_pull_request(id).await {
                Ok(Some(pr)) if pr.status.as_deref() == Some("active") => {
                    return ProviderResult::reused(
                        ProviderKind::AzureDevops,
                        pr.pull_request_id,
                        self.pull_request_web_url(pr.pull_request_id),
                    );
                }
                Ok(_) => tracing::info!(pull_request = id, "recorded pull request not active, looking up by branch"),
                Err(e) => return self.failed("get pull request", e),
            }
        }

        match self.find_active_pull_request(&spec.head).await {
            Ok(Some(pr)) => {
                return ProviderResult::reused(
                    ProviderKind::AzureDevops,
                    pr.pull_request_id,
                    self.pull_request_web_url(pr.pull_request_id),
                );
            }
            Ok(None) => {}
            Err(e) => return self.failed("find pull request", e),
        }

        match self.create_pull_request(spec).await {
            Ok(pr) => {
                tracing::info!(pull_request = pr.pull_request_id, "created Azure DevOps pull request");
                ProviderResult::created(
                    ProviderKind::AzureDevops,
                    pr.pull_request_id,
                    self.pull_request_web_url(pr.pull_request_id),
                )
            }
            Err(e) => self.failed("create pull request", e),
        }
    }

    async fn link_work_item_to_pull_request(
        &self,
        work_item_id: &str,
        pull_request_id: &str,
    ) -> ProviderResult {
        match self.link(work_item_id, pull_request_id).await {
            Ok(result) => result,
            Err(e) => self.failed("link work item", e),
        }
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
