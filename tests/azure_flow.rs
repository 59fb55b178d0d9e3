//! End-to-end `start` / `evidence` against an in-process Azure DevOps mock.

mod common;

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use autopilot::autopilot_config::{AutopilotToml, CheckSpec, Fidelity};
use autopilot::config::{Config, Environment};
use autopilot::evidence::EVIDENCE_MARKER;
use autopilot::orchestrator::{
    EvidenceOptions, FixedClock, Orchestrator, RunReport, RunStatus, StartOptions, StepStatus,
};
use autopilot::provider::{FailureClass, ProviderChoice, ProviderKind};
use autopilot::state::Step;

use common::{BRANCH, STORY_ID};

const PAT: &str = "azpat-mock-secret";
const PROJECT_GUID: &str = "0f4c1c2e-proj";
const REPO_GUID: &str = "9a7b3d1f-repo";

#[derive(Default)]
struct Mock {
    next_id: u64,
    work_items: Vec<WorkItem>,
    pulls: Vec<Value>,
    threads: Vec<Thread>,
    created_types: Vec<String>,
    auth_headers: Vec<String>,
    thread_without_comments: bool,
}

struct WorkItem {
    id: u64,
    title: String,
    relations: Vec<Value>,
}

impl WorkItem {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "fields": { "System.Title": self.title },
            "relations": self.relations,
        })
    }
}

struct Thread {
    pull_request: u64,
    id: u64,
    comment_id: u64,
    content: String,
}

impl Thread {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "comments": [{ "id": self.comment_id, "content": self.content }],
        })
    }
}

type Shared = Arc<Mutex<Mock>>;

fn json_patch(body: &Bytes) -> Vec<Value> {
    serde_json::from_slice(body).unwrap()
}

async fn wiql(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut mock = mock.lock().unwrap();
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        mock.auth_headers.push(auth.to_string());
    }
    let query = body["query"].as_str().unwrap_or_default();
    let needle = query
        .split_once("CONTAINS '")
        .and_then(|(_, rest)| rest.split_once('\''))
        .map(|(needle, _)| needle.to_string())
        .unwrap_or_default();
    let hits: Vec<Value> = mock
        .work_items
        .iter()
        .filter(|w| w.title.contains(&needle))
        .map(|w| json!({ "id": w.id }))
        .collect();
    Json(json!({ "workItems": hits }))
}

async fn create_work_item(
    State(mock): State<Shared>,
    Path((_project, item)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let mut mock = mock.lock().unwrap();
    let work_item_type = item.strip_prefix('$').ok_or(StatusCode::BAD_REQUEST)?;
    mock.created_types.push(work_item_type.to_string());
    let title = json_patch(&body)
        .iter()
        .find(|op| op["path"] == "/fields/System.Title")
        .and_then(|op| op["value"].as_str())
        .unwrap_or_default()
        .to_string();
    mock.next_id += 1;
    let item = WorkItem {
        id: mock.next_id,
        title,
        relations: Vec::new(),
    };
    let response = item.to_json();
    mock.work_items.push(item);
    Ok(Json(response))
}

async fn get_work_item(
    State(mock): State<Shared>,
    Path((_project, item)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let mock = mock.lock().unwrap();
    let id: u64 = item.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    mock.work_items
        .iter()
        .find(|w| w.id == id)
        .map(|w| Json(w.to_json()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update_work_item(
    State(mock): State<Shared>,
    Path((_project, item)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let mut mock = mock.lock().unwrap();
    let id: u64 = item.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    let work_item = mock
        .work_items
        .iter_mut()
        .find(|w| w.id == id)
        .ok_or(StatusCode::NOT_FOUND)?;
    for op in json_patch(&body) {
        if op["path"] == "/relations/-" {
            work_item.relations.push(op["value"].clone());
        }
    }
    Ok(Json(work_item.to_json()))
}

async fn get_pull(
    State(mock): State<Shared>,
    Path((_project, id)): Path<(String, u64)>,
) -> Result<Json<Value>, StatusCode> {
    let mock = mock.lock().unwrap();
    mock.pulls
        .iter()
        .find(|p| p["pullRequestId"] == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_pulls(
    State(mock): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mock = mock.lock().unwrap();
    let source = query.get("searchCriteria.sourceRefName");
    let pulls: Vec<Value> = mock
        .pulls
        .iter()
        .filter(|p| source.is_none_or(|s| p["sourceRefName"] == s.as_str()))
        .cloned()
        .collect();
    let count = pulls.len();
    Json(json!({ "value": pulls, "count": count }))
}

async fn create_pull(
    State(mock): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut mock = mock.lock().unwrap();
    mock.next_id += 1;
    let pull = json!({
        "pullRequestId": mock.next_id,
        "status": "active",
        "title": body["title"],
        "description": body["description"],
        "isDraft": body["isDraft"],
        "sourceRefName": body["sourceRefName"],
        "targetRefName": body["targetRefName"],
        "repository": { "id": REPO_GUID, "project": { "id": PROJECT_GUID } },
    });
    mock.pulls.push(pull.clone());
    (StatusCode::CREATED, Json(pull))
}

async fn list_threads(
    State(mock): State<Shared>,
    Path((_project, _repo, pull_request)): Path<(String, String, u64)>,
) -> Json<Value> {
    let mock = mock.lock().unwrap();
    let threads: Vec<Value> = mock
        .threads
        .iter()
        .filter(|t| t.pull_request == pull_request)
        .map(Thread::to_json)
        .collect();
    Json(json!({ "value": threads }))
}

async fn create_thread(
    State(mock): State<Shared>,
    Path((_project, _repo, pull_request)): Path<(String, String, u64)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut mock = mock.lock().unwrap();
    let thread = Thread {
        pull_request,
        id: 500 + mock.threads.len() as u64 + 1,
        comment_id: 1,
        content: body["comments"][0]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    };
    let mut response = thread.to_json();
    if mock.thread_without_comments {
        response["comments"] = json!([]);
    }
    mock.threads.push(thread);
    Json(response)
}

async fn update_comment(
    State(mock): State<Shared>,
    Path((_project, _repo, _pull_request, thread_id, comment_id)): Path<(
        String,
        String,
        u64,
        u64,
        u64,
    )>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut mock = mock.lock().unwrap();
    let thread = mock
        .threads
        .iter_mut()
        .find(|t| t.id == thread_id && t.comment_id == comment_id)
        .ok_or(StatusCode::NOT_FOUND)?;
    thread.content = body["content"].as_str().unwrap_or_default().to_string();
    Ok(Json(json!({ "id": comment_id, "content": thread.content })))
}

async fn serve() -> (String, Shared) {
    let mock: Shared = Arc::default();
    let app = Router::new()
        .route("/acme/{project}/_apis/wit/wiql", post(wiql))
        .route(
            "/acme/{project}/_apis/wit/workitems/{item}",
            get(get_work_item)
                .post(create_work_item)
                .patch(update_work_item),
        )
        .route("/acme/{project}/_apis/git/pullrequests/{id}", get(get_pull))
        .route(
            "/acme/{project}/_apis/git/repositories/{repo}/pullrequests",
            get(list_pulls).post(create_pull),
        )
        .route(
            "/acme/{project}/_apis/git/repositories/{repo}/pullRequests/{pr}/threads",
            get(list_threads).post(create_thread),
        )
        .route(
            "/acme/{project}/_apis/git/repositories/{repo}/pullRequests/{pr}/threads/{thread}/comments/{comment}",
            patch(update_comment),
        )
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/acme"), mock)
}

struct Harness {
    project: TempDir,
    _origin: TempDir,
    mock: Shared,
    orchestrator: Orchestrator,
}

async fn harness() -> Harness {
    let (org_url, mock) = serve().await;
    let project = common::init_project();
    let origin = common::add_bare_origin(project.path());

    let mut settings = AutopilotToml::default();
    settings.checks = vec![CheckSpec {
        name: "fixed".into(),
        command: "test -f fixed.txt".into(),
        requires: None,
        fidelity: Fidelity::Fast,
        timeout_secs: 30,
    }];
    let env = Environment::from_pairs([
        ("AZURE_DEVOPS_PAT", PAT),
        ("AZURE_DEVOPS_ORG_URL", org_url.as_str()),
        ("AZURE_DEVOPS_PROJECT", "Platform"),
        ("AZURE_DEVOPS_REPO", "app"),
    ]);
    let config = Config::from_parts(common::project_path(&project), settings, env);
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

    Harness {
        project,
        _origin: origin,
        mock,
        orchestrator: Orchestrator::new(config).with_clock(clock),
    }
}

fn start_options() -> StartOptions {
    StartOptions {
        provider: ProviderChoice::AzureDevops,
        push: true,
        draft: true,
        ..Default::default()
    }
}

fn status_of(run: &RunReport, step: Step) -> StepStatus {
    run.step(step)
        .unwrap_or_else(|| panic!("step {step} missing"))
        .status
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_links_work_item_once() {
    let h = harness().await;

    let first = h.orchestrator.start(STORY_ID, &start_options()).await;
    assert!(first.error.is_none(), "{:?}", first.error);
    assert_eq!(first.provider, Some(ProviderKind::AzureDevops));
    assert_eq!(status_of(&first, Step::TrackerItem), StepStatus::Done);
    assert_eq!(status_of(&first, Step::PullRequest), StepStatus::Done);
    assert_eq!(status_of(&first, Step::Link), StepStatus::Done);
    assert_eq!(first.status(), RunStatus::Complete);

    let second = h.orchestrator.start(STORY_ID, &start_options()).await;
    assert!(second.error.is_none(), "{:?}", second.error);
    assert_eq!(status_of(&second, Step::TrackerItem), StepStatus::Reused);
    assert_eq!(status_of(&second, Step::PullRequest), StepStatus::Reused);
    assert_eq!(status_of(&second, Step::Link), StepStatus::Reused);

    {
        let mock = h.mock.lock().unwrap();
        assert_eq!(mock.work_items.len(), 1);
        assert_eq!(mock.created_types, vec!["User Story".to_string()]);
        assert_eq!(mock.work_items[0].title, "ACF-0042: Add caching layer");
        assert_eq!(mock.work_items[0].relations.len(), 1);
        assert_eq!(
            mock.work_items[0].relations[0]["url"],
            format!("vstfs:///Git/PullRequestId/{PROJECT_GUID}%2F{REPO_GUID}%2F2")
        );

        assert_eq!(mock.pulls.len(), 1);
        let pull = &mock.pulls[0];
        assert_eq!(pull["sourceRefName"], format!("refs/heads/{BRANCH}"));
        assert_eq!(pull["targetRefName"], "refs/heads/main");
        assert_eq!(pull["isDraft"], true);
        assert!(pull["description"].as_str().unwrap().contains("AB#1"));

        assert!(!mock.auth_headers.is_empty());
        assert!(mock.auth_headers.iter().all(|h| h.starts_with("Basic ")));
    }

    let state = common::read_state(h.project.path());
    assert_eq!(state["provider"], "azure-devops");
    assert_eq!(state["trackerItemId"], "1");
    assert_eq!(state["pullRequestId"], "2");
    assert_eq!(state["remote"]["kind"], "azure-devops");
    assert_eq!(state["remote"]["project"], "Platform");
    assert_eq!(state["remote"]["workItemType"], "User Story");

    let raw = fs::read_to_string(common::state_path(h.project.path())).unwrap();
    assert!(!raw.contains(PAT));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_evidence_thread_is_updated_in_place() {
    let h = harness().await;
    let started = h.orchestrator.start(STORY_ID, &start_options()).await;
    assert_eq!(started.status(), RunStatus::Complete);

    let options = EvidenceOptions {
        provider: ProviderChoice::AzureDevops,
        run_local: true,
        ..Default::default()
    };

    let first = h.orchestrator.evidence(STORY_ID, &options).await;
    assert!(first.error.is_none(), "{:?}", first.error);
    assert_eq!(status_of(&first, Step::UpsertComment), StepStatus::Done);
    let first_body = {
        let mock = h.mock.lock().unwrap();
        assert_eq!(mock.threads.len(), 1);
        mock.threads[0].content.clone()
    };
    assert_eq!(first_body.lines().next(), Some(EVIDENCE_MARKER));
    assert!(first_body.contains("0 passed, 1 failed, 0 skipped"));

    fs::write(h.project.path().join("fixed.txt"), "ok").unwrap();

    let second = h.orchestrator.evidence(STORY_ID, &options).await;
    assert!(second.error.is_none(), "{:?}", second.error);
    assert_eq!(status_of(&second, Step::UpsertComment), StepStatus::Reused);

    {
        let mock = h.mock.lock().unwrap();
        assert_eq!(mock.threads.len(), 1);
        assert!(mock.threads[0].content.contains("1 passed, 0 failed, 0 skipped"));
        assert_eq!(mock.threads[0].content.lines().next(), Some(EVIDENCE_MARKER));
    }

    let state = common::read_state(h.project.path());
    assert_eq!(state["evidenceCommentId"], "501:1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_work_item_with_longer_identifier_is_not_reused() {
    let h = harness().await;
    h.mock.lock().unwrap().work_items.push(WorkItem {
        id: 500,
        title: "ACF-00421: Unrelated story".into(),
        relations: Vec::new(),
    });

    let run = h.orchestrator.start(STORY_ID, &start_options()).await;
    assert!(run.error.is_none(), "{:?}", run.error);
    assert_eq!(status_of(&run, Step::TrackerItem), StepStatus::Done);

    {
        let mock = h.mock.lock().unwrap();
        assert_eq!(mock.work_items.len(), 2);
        assert_eq!(mock.work_items[1].title, "ACF-0042: Add caching layer");
        assert!(mock.work_items[0].relations.is_empty());
    }

    let state = common::read_state(h.project.path());
    assert_eq!(state["trackerItemId"], "1");

    let again = h.orchestrator.start(STORY_ID, &start_options()).await;
    assert_eq!(status_of(&again, Step::TrackerItem), StepStatus::Reused);
    assert_eq!(h.mock.lock().unwrap().work_items.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_thread_without_comments_is_not_recorded() {
    let h = harness().await;
    let started = h.orchestrator.start(STORY_ID, &start_options()).await;
    assert_eq!(started.status(), RunStatus::Complete);
    h.mock.lock().unwrap().thread_without_comments = true;

    let options = EvidenceOptions {
        provider: ProviderChoice::AzureDevops,
        ..Default::default()
    };
    let run = h.orchestrator.evidence(STORY_ID, &options).await;
    assert!(run.error.is_none(), "{:?}", run.error);
    assert_eq!(status_of(&run, Step::UpsertComment), StepStatus::Failed);
    assert_eq!(
        run.step(Step::UpsertComment).unwrap().failure,
        Some(FailureClass::Rejected)
    );
    assert_eq!(run.status(), RunStatus::Partial);

    let state = common::read_state(h.project.path());
    assert!(state["evidenceCommentId"].is_null());
    assert!(state["evidenceDigest"].is_string());
}
