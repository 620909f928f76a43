//! Typed in-page API client
//!
//! Every operation runs as one HTTP call from inside the page, through the
//! driver seam. Raw responses are normalized into [`ApiOutcome`] immediately
//! so nothing downstream inspects ad hoc optional fields, and 429s are
//! retried with a fixed backoff up to a hard attempt cap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::driver::{PageRpc, RpcRequest, RpcResponse};
use crate::error::{Error, Result};
use crate::session::SessionContext;

/// Fixed wait between retries of a rate-limited call.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Attempts before a persistent 429 becomes [`Error::RateLimitExhausted`].
pub const RETRY_LIMIT: u32 = 5;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub owner_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: u64,
    pub name: String,
}

/// Server-side unit of asynchronous work. The client only ever polls it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: u64,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Job {
    pub const RUNNING: &'static str = "running";
    pub const COMPLETE: &'static str = "complete";

    pub fn is_running(&self) -> bool {
        self.status == Self::RUNNING
    }

    pub fn is_complete(&self) -> bool {
        self.status == Self::COMPLETE
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub id: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub task: Option<Job>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub latest_checkpoint_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub branch_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merge {
    pub id: String,
    #[serde(default)]
    pub conflicts: Vec<MergeConflict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub conflict_id: String,
    /// Keep the source branch's side; otherwise the destination's.
    pub use_source: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub upload_id: String,
    pub key: String,
}

/// One finished chunk of a multipart upload. Field names follow the signed
/// upload completion protocol, and the ETag must arrive unquoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Request body for project creation, forking included.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_from: Option<u64>,
}

/// What a project-creation POST produced: a project right away, or a fork
/// job to await.
#[derive(Debug, Clone)]
pub enum ProjectCreation {
    Created(Project),
    Forking(Job),
}

// ---------------------------------------------------------------------------
// Response normalization
// ---------------------------------------------------------------------------

/// Tagged outcome produced from every raw response before anything else
/// looks at it.
#[derive(Debug, Clone)]
pub enum ApiOutcome {
    Ok(Value),
    RateLimited,
    Failed { status: u16, message: String },
}

impl ApiOutcome {
    pub fn from_response(response: RpcResponse) -> Self {
        if response.is_rate_limited() {
            return ApiOutcome::RateLimited;
        }
        if response.is_success() {
            return ApiOutcome::Ok(response.body);
        }
        let message = response
            .body
            .get("error")
            .and_then(Value::as_str)
            .or_else(|| response.body.get("message").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", response.status));
        ApiOutcome::Failed {
            status: response.status,
            message,
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            ApiOutcome::Ok(value) => Ok(value),
            ApiOutcome::RateLimited => Err(Error::Api {
                status: 429,
                message: "rate limited".into(),
            }),
            ApiOutcome::Failed { status, message } => Err(Error::Api { status, message }),
        }
    }
}

/// Unwrap the `{ result: T }` read envelope; bodies without one pass through.
fn result_field(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Unwrap the `{ task: Job } | Job` envelope of job-producing calls.
fn task_field(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("task") => {
            map.remove("task").unwrap_or(Value::Null)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Typed operations against the editor backend, evaluated inside the page.
pub struct EditorClient {
    page: Arc<dyn PageRpc>,
    session: SessionContext,
}

impl EditorClient {
    pub fn new(page: Arc<dyn PageRpc>, session: SessionContext) -> Self {
        Self { page, session }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn page(&self) -> &Arc<dyn PageRpc> {
        &self.page
    }

    /// Issue one call, retrying identical arguments on 429 with a fixed
    /// backoff until [`RETRY_LIMIT`] is spent.
    async fn call(&self, request: RpcRequest) -> Result<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self.page.http(request.clone()).await?;
            match ApiOutcome::from_response(response) {
                ApiOutcome::RateLimited if attempt < RETRY_LIMIT => {
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        attempt,
                        "rate limited, backing off"
                    );
                    sleep(RETRY_BACKOFF).await;
                }
                ApiOutcome::RateLimited => {
                    return Err(Error::RateLimitExhausted { attempts: attempt })
                }
                outcome => {
                    debug!(method = %request.method, path = %request.path, attempt, "api call settled");
                    return outcome.into_result();
                }
            }
        }
    }

    fn authed(&self, request: RpcRequest) -> RpcRequest {
        request.with_auth(self.session.access_token.clone())
    }

    // -- reads --------------------------------------------------------------

    /// Public profile lookup; deliberately anonymous.
    pub async fn user(&self, username: &str) -> Result<UserInfo> {
        let value = self.call(RpcRequest::get(format!("/api/users/{username}"))).await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    /// Project listing, optionally scoped by a view filter; deliberately
    /// anonymous so public listings stay testable without a token.
    pub async fn list_projects(&self, view: Option<&str>) -> Result<Vec<Project>> {
        let path = match view {
            Some(view) => format!("/api/projects?view={view}"),
            None => "/api/projects".to_string(),
        };
        let value = self.call(RpcRequest::get(path)).await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn project(&self, id: u64) -> Result<Project> {
        let value = self
            .call(self.authed(RpcRequest::get(format!("/api/projects/{id}"))))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn list_apps(&self, project_id: u64) -> Result<Vec<AppInfo>> {
        let value = self
            .call(self.authed(RpcRequest::get(format!("/api/projects/{project_id}/apps"))))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn list_scenes(&self, project_id: u64) -> Result<Vec<Scene>> {
        let value = self
            .call(self.authed(RpcRequest::get(format!(
                "/api/projects/{project_id}/scenes"
            ))))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    // -- projects -----------------------------------------------------------

    pub async fn create_project(&self, spec: NewProject) -> Result<ProjectCreation> {
        let body = serde_json::to_value(&spec)?;
        let value = self
            .call(self.authed(RpcRequest::post("/api/projects", body)))
            .await?;
        if value.get("task").is_some() {
            let job = serde_json::from_value(task_field(value))?;
            Ok(ProjectCreation::Forking(job))
        } else {
            let project = serde_json::from_value(result_field(value))?;
            Ok(ProjectCreation::Created(project))
        }
    }

    pub async fn delete_project(&self, id: u64) -> Result<()> {
        self.call(self.authed(RpcRequest::delete(format!("/api/projects/{id}"))))
            .await?;
        Ok(())
    }

    pub async fn delete_app(&self, id: u64) -> Result<()> {
        self.call(self.authed(RpcRequest::delete(format!("/api/apps/{id}"))))
            .await?;
        Ok(())
    }

    // -- jobs and builds ----------------------------------------------------

    /// Start a build-download job; completion carries the download URL.
    pub async fn start_download(
        &self,
        project_id: u64,
        scenes: &[u64],
        name: &str,
    ) -> Result<Job> {
        let body = json!({ "projectId": project_id, "scenes": scenes, "name": name });
        let value = self
            .call(self.authed(RpcRequest::post("/api/apps/download", body)))
            .await?;
        Ok(serde_json::from_value(task_field(value))?)
    }

    /// Start publishing a scene as an app; the returned app embeds its build
    /// job.
    pub async fn start_publish(
        &self,
        project_id: u64,
        scene_id: u64,
        name: &str,
    ) -> Result<AppInfo> {
        let body = json!({ "projectId": project_id, "sceneId": scene_id, "name": name });
        let value = self
            .call(self.authed(RpcRequest::post("/api/apps", body)))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    /// Start importing a previously uploaded object into a project.
    pub async fn start_import(&self, project_id: u64, key: &str) -> Result<Job> {
        let body = json!({ "key": key });
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/projects/{project_id}/import"),
                body,
            )))
            .await?;
        Ok(serde_json::from_value(task_field(value))?)
    }

    pub async fn job(&self, id: u64) -> Result<Job> {
        let value = self
            .call(self.authed(RpcRequest::get(format!("/api/jobs/{id}"))))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn app(&self, id: u64) -> Result<AppInfo> {
        let value = self
            .call(self.authed(RpcRequest::get(format!("/api/apps/{id}"))))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    // -- chunked upload handshake -------------------------------------------

    pub async fn start_upload(&self, file_name: &str) -> Result<UploadTicket> {
        let body = json!({ "fileName": file_name });
        let value = self
            .call(self.authed(RpcRequest::post("/api/upload/start-upload", body)))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn signed_urls(&self, upload_id: &str, key: &str, parts: u32) -> Result<Vec<String>> {
        let body = json!({ "uploadId": upload_id, "key": key, "parts": parts });
        let value = self
            .call(self.authed(RpcRequest::post("/api/upload/signed-urls", body)))
            .await?;
        let urls = value
            .get("signedUrls")
            .cloned()
            .ok_or_else(|| Error::Upload("signed-urls response missing signedUrls".into()))?;
        Ok(serde_json::from_value(urls)?)
    }

    pub async fn complete_upload(
        &self,
        upload_id: &str,
        key: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<Value> {
        let body = json!({ "uploadId": upload_id, "key": key, "parts": parts });
        self.call(self.authed(RpcRequest::post("/api/upload/complete-upload", body)))
            .await
    }

    // -- version control ----------------------------------------------------

    pub async fn list_branches(&self, project_id: u64) -> Result<Vec<Branch>> {
        let value = self
            .call(self.authed(RpcRequest::get(format!(
                "/api/projects/{project_id}/branches"
            ))))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn create_branch(
        &self,
        project_id: u64,
        name: &str,
        source_branch_id: Option<&str>,
    ) -> Result<Branch> {
        let mut body = json!({ "name": name });
        if let Some(source) = source_branch_id {
            body["sourceBranchId"] = json!(source);
        }
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/projects/{project_id}/branches"),
                body,
            )))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn checkout_branch(&self, branch_id: &str) -> Result<Branch> {
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/branches/{branch_id}/checkout"),
                json!({}),
            )))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn create_checkpoint(&self, branch_id: &str, description: &str) -> Result<Checkpoint> {
        let body = json!({ "description": description });
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/branches/{branch_id}/checkpoints"),
                body,
            )))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn restore_checkpoint(&self, checkpoint_id: &str) -> Result<Branch> {
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/checkpoints/{checkpoint_id}/restore"),
                json!({}),
            )))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn start_merge(
        &self,
        project_id: u64,
        source_branch_id: &str,
        destination_branch_id: &str,
    ) -> Result<Merge> {
        let body = json!({
            "sourceBranchId": source_branch_id,
            "destinationBranchId": destination_branch_id,
        });
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/projects/{project_id}/merge"),
                body,
            )))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn resolve_conflicts(
        &self,
        merge_id: &str,
        resolutions: &[ConflictResolution],
    ) -> Result<Merge> {
        let body = json!({ "resolutions": resolutions });
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/merges/{merge_id}/conflicts"),
                body,
            )))
            .await?;
        Ok(serde_json::from_value(result_field(value))?)
    }

    pub async fn apply_merge(&self, merge_id: &str) -> Result<Job> {
        let value = self
            .call(self.authed(RpcRequest::post(
                format!("/api/merges/{merge_id}/apply"),
                json!({}),
            )))
            .await?;
        Ok(serde_json::from_value(task_field(value))?)
    }

    // -- raw access for the parity scenarios ---------------------------------

    /// Raw GET with the read envelope unwrapped; parity scenarios compare
    /// v1/v2 documents structurally without committing to a typed shape.
    pub async fn get_raw(&self, path: &str) -> Result<Value> {
        let value = self.call(self.authed(RpcRequest::get(path))).await?;
        Ok(result_field(value))
    }
}
