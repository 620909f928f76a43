//! In-process mock SceneForge backend
//!
//! Serves the slice of the editor API the scenarios exercise: projects,
//! scenes, apps, asynchronous jobs, the chunked upload handshake, branches,
//! checkpoints and merges, plus the v2 read family. Jobs stay `running` for
//! a configurable number of status polls, and fault injection can serve 429
//! bursts or fail the next created job.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::{debug, info};

type Shared = Arc<Mutex<BackendState>>;

/// How the publish handler lingers, so concurrency is observable.
const PUBLISH_WORK: Duration = Duration::from_millis(30);

#[derive(Debug, Clone)]
struct ProjectRecord {
    id: u64,
    name: String,
    description: Option<String>,
    private: bool,
    settings: Value,
    owner_id: u64,
    scenes: Vec<(u64, String)>,
}

impl ProjectRecord {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "private": self.private,
            "settings": self.settings,
            "ownerId": self.owner_id,
        })
    }
}

#[derive(Debug, Clone)]
enum JobResult {
    Complete(Value),
    Fail(String),
}

#[derive(Debug, Clone)]
struct JobRecord {
    polls_remaining: u32,
    result: JobResult,
}

#[derive(Debug, Clone)]
struct AppRecord {
    id: u64,
    url: String,
    job_id: u64,
    project_id: u64,
}

#[derive(Debug, Clone)]
struct BranchRecord {
    id: String,
    name: String,
    project_id: u64,
    latest_checkpoint_id: Option<String>,
}

impl BranchRecord {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "projectId": self.project_id,
            "latestCheckpointId": self.latest_checkpoint_id,
        })
    }
}

#[derive(Debug, Clone)]
struct MergeRecord {
    id: String,
    conflicts: Vec<(String, String)>,
}

impl MergeRecord {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "conflicts": self.conflicts.iter()
                .map(|(id, path)| json!({ "id": id, "path": path }))
                .collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct UploadRecord {
    key: String,
    /// part number -> (bytes received, etag value without quotes)
    parts: HashMap<u32, (usize, String)>,
    completed: bool,
}

struct BackendState {
    base_url: String,
    token: String,
    next_id: u64,
    user: (u64, String),
    projects: HashMap<u64, ProjectRecord>,
    jobs: HashMap<u64, JobRecord>,
    apps: HashMap<u64, AppRecord>,
    branches: HashMap<String, BranchRecord>,
    checkpoints: HashMap<String, (String, String)>,
    merges: HashMap<String, MergeRecord>,
    uploads: HashMap<String, UploadRecord>,
    /// Status polls a fresh job answers `running` before settling.
    job_poll_latency: u32,
    /// Failure message consumed by the next created job.
    next_job_failure: Option<String>,
    /// 429 responses left to serve from the project read endpoint.
    rate_limit_burst: u32,
    total_requests: u64,
    publish_in_flight: usize,
    publish_peak: usize,
}

impl BackendState {
    fn new(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token,
            next_id: 100,
            user: (7, "alice".to_string()),
            projects: HashMap::new(),
            jobs: HashMap::new(),
            apps: HashMap::new(),
            branches: HashMap::new(),
            checkpoints: HashMap::new(),
            merges: HashMap::new(),
            uploads: HashMap::new(),
            job_poll_latency: 2,
            next_job_failure: None,
            rate_limit_burst: 0,
            total_requests: 0,
            publish_in_flight: 0,
            publish_peak: 0,
        }
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_job(&mut self, data: Value) -> u64 {
        let id = self.alloc_id();
        let result = match self.next_job_failure.take() {
            Some(message) => JobResult::Fail(message),
            None => JobResult::Complete(data),
        };
        self.jobs.insert(
            id,
            JobRecord {
                polls_remaining: self.job_poll_latency,
                result,
            },
        );
        id
    }

    /// Current wire view of a job; each look at a running job consumes one
    /// poll of its latency.
    fn job_view(&mut self, id: u64) -> Option<Value> {
        let job = self.jobs.get_mut(&id)?;
        if job.polls_remaining > 0 {
            job.polls_remaining -= 1;
            return Some(json!({ "id": id, "status": "running" }));
        }
        Some(match &job.result {
            JobResult::Complete(data) => {
                json!({ "id": id, "status": "complete", "data": data })
            }
            JobResult::Fail(message) => {
                json!({ "id": id, "status": "error", "error": message })
            }
        })
    }

    fn create_project(&mut self, name: String, description: Option<String>, private: bool, settings: Value) -> u64 {
        let id = self.alloc_id();
        let owner_id = self.user.0;
        self.projects.insert(
            id,
            ProjectRecord {
                id,
                name,
                description,
                private,
                settings,
                owner_id,
                scenes: Vec::new(),
            },
        );
        // Every project starts with a main branch.
        let branch_id = format!("br-{id}-main");
        self.branches.insert(
            branch_id.clone(),
            BranchRecord {
                id: branch_id,
                name: "main".to_string(),
                project_id: id,
                latest_checkpoint_id: None,
            },
        );
        id
    }
}

/// Handle to a spawned backend.
pub struct MockBackend {
    base_url: String,
    token: String,
    state: Shared,
}

impl MockBackend {
    /// Bind an ephemeral port and serve until dropped.
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock backend");
        let addr = listener.local_addr().expect("failed to read local addr");
        let base_url = format!("http://{addr}");
        let token = format!("tok-{}", uuid::Uuid::new_v4());

        let state: Shared = Arc::new(Mutex::new(BackendState::new(
            base_url.clone(),
            token.clone(),
        )));
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock backend exited");
        });

        info!(%base_url, "mock backend listening");
        Self {
            base_url,
            token,
            state,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The one bearer token the backend accepts.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Create a project with the given scenes, bypassing the API.
    pub fn seed_project(&self, name: &str, scene_names: &[&str]) -> u64 {
        let mut state = self.state.lock();
        let id = state.create_project(name.to_string(), Some(format!("{name} description")), false, json!({ "fog": "none" }));
        for scene in scene_names {
            let scene_id = state.alloc_id();
            state
                .projects
                .get_mut(&id)
                .expect("freshly created project")
                .scenes
                .push((scene_id, scene.to_string()));
        }
        id
    }

    /// Serve `count` 429s from the project read endpoint before recovering.
    pub fn set_rate_limit_burst(&self, count: u32) {
        self.state.lock().rate_limit_burst = count;
    }

    /// Fail the next created job with `message`.
    pub fn fail_next_job(&self, message: &str) {
        self.state.lock().next_job_failure = Some(message.to_string());
    }

    /// Status polls a fresh job stays `running` for.
    pub fn set_job_poll_latency(&self, polls: u32) {
        self.state.lock().job_poll_latency = polls;
    }

    /// Requests handled so far, all routes.
    pub fn total_requests(&self) -> u64 {
        self.state.lock().total_requests
    }

    /// Most publish requests ever in flight at once.
    pub fn publish_peak(&self) -> usize {
        self.state.lock().publish_peak
    }

    /// Parts recorded for an upload key: (part number, unquoted etag).
    pub fn upload_parts(&self, key: &str) -> Vec<(u32, String)> {
        let state = self.state.lock();
        let Some(upload) = state.uploads.values().find(|u| u.key == key) else {
            return Vec::new();
        };
        let mut parts: Vec<_> = upload
            .parts
            .iter()
            .map(|(n, (_, etag))| (*n, etag.clone()))
            .collect();
        parts.sort_by_key(|(n, _)| *n);
        parts
    }

    pub fn upload_completed(&self, key: &str) -> bool {
        self.state
            .lock()
            .uploads
            .values()
            .any(|u| u.key == key && u.completed)
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        // users and projects
        .route("/api/users/:username", get(get_user))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(get_project).delete(delete_project))
        .route("/api/projects/:id/scenes", get(list_scenes))
        .route("/api/projects/:id/apps", get(list_apps))
        .route("/api/projects/:id/import", post(start_import))
        // apps and jobs
        .route("/api/apps", post(create_app))
        .route("/api/apps/download", post(start_download))
        .route("/api/apps/:id", get(get_app).delete(delete_app))
        .route("/api/jobs/:id", get(get_job))
        // chunked upload handshake and signed-URL targets
        .route("/api/upload/start-upload", post(start_upload))
        .route("/api/upload/signed-urls", post(signed_urls))
        .route("/api/upload/complete-upload", post(complete_upload))
        .route("/uploads/:upload_id/:part", put(put_part))
        // version control
        .route(
            "/api/projects/:id/branches",
            get(list_branches).post(create_branch),
        )
        .route("/api/projects/:id/merge", post(start_merge))
        .route("/api/branches/:id/checkout", post(checkout_branch))
        .route("/api/branches/:id/checkpoints", post(create_checkpoint))
        .route("/api/checkpoints/:id/restore", post(restore_checkpoint))
        .route("/api/merges/:id/conflicts", post(resolve_conflicts))
        .route("/api/merges/:id/apply", post(apply_merge))
        // build artifacts
        .route("/builds/:name", get(get_build))
        // v2 read family, shape-equivalent to v1
        .route("/api/v2/users/:username", get(get_user_v2))
        .route("/api/v2/projects/:id", get(get_project_v2))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn count_request(state: &Shared) {
    state.lock().total_requests += 1;
}

fn check_auth(state: &Shared, headers: &HeaderMap) -> Result<(), Response> {
    let expected = state.lock().token.clone();
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing or invalid authorization header" })),
        )
            .into_response())
    }
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn result_of(value: Value) -> Response {
    Json(json!({ "result": value })).into_response()
}

fn task_of(job_id: u64) -> Response {
    Json(json!({ "task": { "id": job_id, "status": "running" } })).into_response()
}

// ---------------------------------------------------------------------------
// users and projects
// ---------------------------------------------------------------------------

async fn get_user(State(state): State<Shared>, Path(username): Path<String>) -> Response {
    count_request(&state);
    let state = state.lock();
    if username != state.user.1 {
        return not_found("user");
    }
    result_of(json!({ "id": state.user.0, "username": state.user.1 }))
}

async fn list_projects(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    count_request(&state);
    let state = state.lock();
    let mut projects: Vec<_> = state
        .projects
        .values()
        .filter(|p| match params.get("view").map(String::as_str) {
            Some("private") => p.private,
            Some("public") => !p.private,
            _ => true,
        })
        .map(ProjectRecord::to_json)
        .collect();
    projects.sort_by_key(|p| p["id"].as_u64());
    result_of(Value::Array(projects))
}

async fn create_project(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return bad_request("project name is required".into());
    };

    let mut state = state.lock();
    if let Some(source_id) = body.get("forkFrom").and_then(Value::as_u64) {
        if !state.projects.contains_key(&source_id) {
            return not_found("project");
        }
        let forked = state.create_project(
            name.to_string(),
            body.get("description").and_then(Value::as_str).map(String::from),
            body.get("private").and_then(Value::as_bool).unwrap_or(false),
            body.get("settings").cloned().unwrap_or(Value::Null),
        );
        // Copy the source's scenes onto the fork.
        let scenes = state.projects[&source_id].scenes.clone();
        state.projects.get_mut(&forked).expect("fork exists").scenes = scenes;
        let job = state.create_job(json!({ "projectId": forked }));
        debug!(source_id, forked, job, "fork started");
        return task_of(job);
    }

    let id = state.create_project(
        name.to_string(),
        body.get("description").and_then(Value::as_str).map(String::from),
        body.get("private").and_then(Value::as_bool).unwrap_or(false),
        body.get("settings").cloned().unwrap_or(Value::Null),
    );
    result_of(state.projects[&id].to_json())
}

async fn get_project(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    {
        let mut state = state.lock();
        if state.rate_limit_burst > 0 {
            state.rate_limit_burst -= 1;
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Too many requests" })),
            )
                .into_response();
        }
    }
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let state = state.lock();
    match state.projects.get(&id) {
        Some(project) => result_of(project.to_json()),
        None => not_found("project"),
    }
}

async fn delete_project(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let mut state = state.lock();
    if state.projects.remove(&id).is_none() {
        return not_found("project");
    }
    state.branches.retain(|_, b| b.project_id != id);
    result_of(json!({}))
}

async fn list_scenes(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let state = state.lock();
    match state.projects.get(&id) {
        Some(project) => result_of(Value::Array(
            project
                .scenes
                .iter()
                .map(|(id, name)| json!({ "id": id, "name": name }))
                .collect(),
        )),
        None => not_found("project"),
    }
}

async fn list_apps(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let mut state = state.lock();
    let apps: Vec<u64> = state
        .apps
        .values()
        .filter(|a| a.project_id == id)
        .map(|a| a.id)
        .collect();
    let views: Vec<Value> = apps
        .into_iter()
        .filter_map(|app_id| app_view(&mut state, app_id))
        .collect();
    result_of(Value::Array(views))
}

// ---------------------------------------------------------------------------
// apps and jobs
// ---------------------------------------------------------------------------

fn app_view(state: &mut BackendState, id: u64) -> Option<Value> {
    let (job_id, url) = {
        let app = state.apps.get(&id)?;
        (app.job_id, app.url.clone())
    };
    let task = state.job_view(job_id)?;
    let built = task["status"] == "complete";
    Some(json!({
        "id": id,
        "url": if built { Value::String(url) } else { Value::Null },
        "task": task,
    }))
}

async fn create_app(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Some(project_id) = body.get("projectId").and_then(Value::as_u64) else {
        return bad_request("projectId is required".into());
    };

    // Track concurrent publishes while simulating build kickoff.
    {
        let mut state = state.lock();
        state.publish_in_flight += 1;
        state.publish_peak = state.publish_peak.max(state.publish_in_flight);
    }
    tokio::time::sleep(PUBLISH_WORK).await;

    let mut state = state.lock();
    state.publish_in_flight -= 1;
    if !state.projects.contains_key(&project_id) {
        return not_found("project");
    }
    let id = state.alloc_id();
    let job_id = state.create_job(json!({ "appId": id }));
    let url = format!("{}/launch/{id}", state.base_url);
    state.apps.insert(
        id,
        AppRecord {
            id,
            url,
            job_id,
            project_id,
        },
    );
    let view = app_view(&mut state, id).expect("freshly created app");
    result_of(view)
}

async fn start_download(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Some(project_id) = body.get("projectId").and_then(Value::as_u64) else {
        return bad_request("projectId is required".into());
    };
    let mut state = state.lock();
    if !state.projects.contains_key(&project_id) {
        return not_found("project");
    }
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("build")
        .to_string();
    let url = format!("{}/builds/{name}.zip", state.base_url);
    let job = state.create_job(json!({ "downloadUrl": url }));
    task_of(job)
}

async fn get_app(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let mut state = state.lock();
    match app_view(&mut state, id) {
        Some(view) => result_of(view),
        None => not_found("app"),
    }
}

async fn delete_app(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let mut state = state.lock();
    match state.apps.remove(&id) {
        Some(_) => result_of(json!({})),
        None => not_found("app"),
    }
}

async fn get_job(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let mut state = state.lock();
    match state.job_view(id) {
        Some(view) => Json(view).into_response(),
        None => not_found("job"),
    }
}

async fn get_build(Path(name): Path<String>) -> Response {
    // Deterministic artifact bytes; enough for checksum assertions.
    let body = format!("SCENEFORGE-BUILD:{name}\n").repeat(64);
    ([(header::CONTENT_TYPE, "application/zip")], body).into_response()
}

// ---------------------------------------------------------------------------
// chunked upload
// ---------------------------------------------------------------------------

async fn start_upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Some(file_name) = body.get("fileName").and_then(Value::as_str) else {
        return bad_request("fileName is required".into());
    };
    let mut state = state.lock();
    let upload_id = format!("u-{}", state.alloc_id());
    let key = format!("upload/{upload_id}/{file_name}");
    state.uploads.insert(
        upload_id.clone(),
        UploadRecord {
            key: key.clone(),
            ..UploadRecord::default()
        },
    );
    Json(json!({ "uploadId": upload_id, "key": key })).into_response()
}

async fn signed_urls(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (Some(upload_id), Some(parts)) = (
        body.get("uploadId").and_then(Value::as_str),
        body.get("parts").and_then(Value::as_u64),
    ) else {
        return bad_request("uploadId and parts are required".into());
    };
    let state = state.lock();
    if !state.uploads.contains_key(upload_id) {
        return not_found("upload");
    }
    let urls: Vec<String> = (1..=parts)
        .map(|n| format!("{}/uploads/{upload_id}/{n}", state.base_url))
        .collect();
    Json(json!({ "signedUrls": urls })).into_response()
}

async fn put_part(
    State(state): State<Shared>,
    Path((upload_id, part)): Path<(String, u32)>,
    body: axum::body::Bytes,
) -> Response {
    count_request(&state);
    let mut state = state.lock();
    let Some(upload) = state.uploads.get_mut(&upload_id) else {
        return not_found("upload");
    };
    let etag = format!("part-{part}-{upload_id}");
    upload.parts.insert(part, (body.len(), etag.clone()));
    // Real object stores quote the ETag header; clients must strip it.
    (
        StatusCode::OK,
        [(header::ETAG, format!("\"{etag}\""))],
    )
        .into_response()
}

async fn complete_upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (Some(upload_id), Some(parts)) = (
        body.get("uploadId").and_then(Value::as_str),
        body.get("parts").and_then(Value::as_array),
    ) else {
        return bad_request("uploadId and parts are required".into());
    };

    let mut state = state.lock();
    let Some(upload) = state.uploads.get(upload_id) else {
        return not_found("upload");
    };

    // Parts must arrive 1..N in order with unquoted etags matching ours.
    for (index, part) in parts.iter().enumerate() {
        let number = part.get("PartNumber").and_then(Value::as_u64).unwrap_or(0) as u32;
        let etag = part.get("ETag").and_then(Value::as_str).unwrap_or("");
        if number != index as u32 + 1 {
            return bad_request(format!(
                "part {number} submitted out of order at position {index}"
            ));
        }
        if etag.contains('"') {
            return bad_request(format!("etag for part {number} is still quoted"));
        }
        match upload.parts.get(&number) {
            Some((_, expected)) if expected == etag => {}
            Some(_) => return bad_request(format!("etag mismatch for part {number}")),
            None => return bad_request(format!("part {number} was never uploaded")),
        }
    }
    if parts.len() != upload.parts.len() {
        return bad_request(format!(
            "completion names {} parts, {} were uploaded",
            parts.len(),
            upload.parts.len()
        ));
    }

    let key = upload.key.clone();
    state
        .uploads
        .get_mut(upload_id)
        .expect("upload present")
        .completed = true;
    result_of(json!({ "key": key }))
}

async fn start_import(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Some(key) = body.get("key").and_then(Value::as_str) else {
        return bad_request("key is required".into());
    };
    let mut state = state.lock();
    if !state.projects.contains_key(&project_id) {
        return not_found("project");
    }
    if !state.uploads.values().any(|u| u.key == key && u.completed) {
        return bad_request(format!("no completed upload for key {key}"));
    }
    let asset_id = state.alloc_id();
    let job = state.create_job(json!({ "assetId": asset_id }));
    task_of(job)
}

// ---------------------------------------------------------------------------
// version control
// ---------------------------------------------------------------------------

async fn list_branches(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let state = state.lock();
    let mut branches: Vec<_> = state
        .branches
        .values()
        .filter(|b| b.project_id == project_id)
        .map(BranchRecord::to_json)
        .collect();
    branches.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    result_of(Value::Array(branches))
}

async fn create_branch(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return bad_request("branch name is required".into());
    };
    let mut state = state.lock();
    if !state.projects.contains_key(&project_id) {
        return not_found("project");
    }
    if let Some(source) = body.get("sourceBranchId").and_then(Value::as_str) {
        if !state.branches.contains_key(source) {
            return not_found("branch");
        }
    }
    let id = format!("br-{}", state.alloc_id());
    let branch = BranchRecord {
        id: id.clone(),
        name: name.to_string(),
        project_id,
        latest_checkpoint_id: None,
    };
    let view = branch.to_json();
    state.branches.insert(id, branch);
    result_of(view)
}

async fn checkout_branch(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(branch_id): Path<String>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let state = state.lock();
    match state.branches.get(&branch_id) {
        Some(branch) => result_of(branch.to_json()),
        None => not_found("branch"),
    }
}

async fn create_checkpoint(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(branch_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let description = body
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let mut state = state.lock();
    if !state.branches.contains_key(&branch_id) {
        return not_found("branch");
    }
    let id = format!("cp-{}", state.alloc_id());
    state
        .checkpoints
        .insert(id.clone(), (branch_id.clone(), description.clone()));
    state
        .branches
        .get_mut(&branch_id)
        .expect("branch present")
        .latest_checkpoint_id = Some(id.clone());
    result_of(json!({ "id": id, "branchId": branch_id, "description": description }))
}

async fn restore_checkpoint(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(checkpoint_id): Path<String>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let state = state.lock();
    let Some((branch_id, _)) = state.checkpoints.get(&checkpoint_id) else {
        return not_found("checkpoint");
    };
    match state.branches.get(branch_id) {
        Some(branch) => result_of(branch.to_json()),
        None => not_found("branch"),
    }
}

async fn start_merge(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(project_id): Path<u64>,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (Some(source), Some(destination)) = (
        body.get("sourceBranchId").and_then(Value::as_str),
        body.get("destinationBranchId").and_then(Value::as_str),
    ) else {
        return bad_request("sourceBranchId and destinationBranchId are required".into());
    };
    let mut state = state.lock();
    if !state.projects.contains_key(&project_id) {
        return not_found("project");
    }
    if !state.branches.contains_key(source) || !state.branches.contains_key(destination) {
        return not_found("branch");
    }
    let id = format!("m-{}", state.alloc_id());
    // Every merge surfaces one conflict; scenarios resolve it explicitly.
    let conflict_id = format!("c-{}", state.alloc_id());
    let merge = MergeRecord {
        id: id.clone(),
        conflicts: vec![(conflict_id, "scene/1/entity/3/position".to_string())],
    };
    let view = merge.to_json();
    state.merges.insert(id, merge);
    result_of(view)
}

async fn resolve_conflicts(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(merge_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Some(resolutions) = body.get("resolutions").and_then(Value::as_array) else {
        return bad_request("resolutions are required".into());
    };
    let mut state = state.lock();
    let Some(merge) = state.merges.get_mut(&merge_id) else {
        return not_found("merge");
    };
    let resolved: Vec<&str> = resolutions
        .iter()
        .filter_map(|r| r.get("conflictId").and_then(Value::as_str))
        .collect();
    let unresolved: Vec<_> = merge
        .conflicts
        .iter()
        .filter(|(id, _)| !resolved.contains(&id.as_str()))
        .cloned()
        .collect();
    if !unresolved.is_empty() {
        return bad_request(format!("{} conflicts left unresolved", unresolved.len()));
    }
    merge.conflicts.clear();
    let view = merge.to_json();
    result_of(view)
}

async fn apply_merge(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(merge_id): Path<String>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let mut state = state.lock();
    let Some(merge) = state.merges.get(&merge_id) else {
        return not_found("merge");
    };
    if !merge.conflicts.is_empty() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "merge has unresolved conflicts" })),
        )
            .into_response();
    }
    let checkpoint = format!("cp-{}", state.alloc_id());
    let job = state.create_job(json!({ "checkpointId": checkpoint }));
    task_of(job)
}

// ---------------------------------------------------------------------------
// v2 read family
// ---------------------------------------------------------------------------

async fn get_user_v2(State(state): State<Shared>, Path(username): Path<String>) -> Response {
    count_request(&state);
    let state = state.lock();
    if username != state.user.1 {
        return not_found("user");
    }
    result_of(json!({ "id": state.user.0, "username": state.user.1 }))
}

async fn get_project_v2(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    count_request(&state);
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let state = state.lock();
    match state.projects.get(&id) {
        // Same key set as v1, values free to differ.
        Some(project) => result_of(project.to_json()),
        None => not_found("project"),
    }
}
