//! High-level editor operations
//!
//! Each operation composes the client, poller and uploader into a single
//! awaitable that either resolves with a usable result or errors — never a
//! silent partial success. These are what scenario code calls.

use std::path::Path;

use tracing::info;

use crate::client::{AppInfo, EditorClient, NewProject, Project, ProjectCreation, Scene};
use crate::error::{Error, Result};
use crate::jobs::{await_app, await_job, job_data_str, job_data_u64};
use crate::upload::Uploader;

/// Create a plain (non-fork) project.
pub async fn create_project(client: &EditorClient, name: &str) -> Result<Project> {
    match client
        .create_project(NewProject {
            name: name.to_string(),
            ..NewProject::default()
        })
        .await?
    {
        ProjectCreation::Created(project) => {
            info!(project_id = project.id, name, "project created");
            Ok(project)
        }
        ProjectCreation::Forking(job) => Err(Error::Fetch(format!(
            "plain creation unexpectedly produced fork job {}",
            job.id
        ))),
    }
}

/// Fork `source_id` into a new project and wait for the copy to finish.
///
/// The source's description, visibility and settings are fetched first and
/// carried onto the fork, then the completion job yields the new project id.
pub async fn fork_project(client: &EditorClient, source_id: u64, name: &str) -> Result<u64> {
    let source = client.project(source_id).await?;
    let creation = client
        .create_project(NewProject {
            name: name.to_string(),
            description: source.description.clone(),
            private: source.private,
            settings: source.settings.clone(),
            fork_from: Some(source_id),
        })
        .await?;

    match creation {
        // Some backends finish tiny forks synchronously.
        ProjectCreation::Created(project) => Ok(project.id),
        ProjectCreation::Forking(job) => {
            let job = await_job(client, job.id).await?;
            let forked = job_data_u64(&job, "projectId")?;
            info!(source_id, forked, "fork complete");
            Ok(forked)
        }
    }
}

/// First scene of a project; an empty scene list is a fetch error.
pub async fn first_scene(client: &EditorClient, project_id: u64) -> Result<Scene> {
    let mut scenes = client.list_scenes(project_id).await?;
    if scenes.is_empty() {
        return Err(Error::Fetch(format!(
            "no scenes found for project {project_id}"
        )));
    }
    Ok(scenes.remove(0))
}

/// Publish a scene as an app and wait for its build.
pub async fn publish_scene(
    client: &EditorClient,
    project_id: u64,
    scene_id: u64,
    name: &str,
) -> Result<AppInfo> {
    let app = client.start_publish(project_id, scene_id, name).await?;
    let app = await_app(client, app.id).await?;
    if app.url.is_none() {
        return Err(Error::Fetch(format!("published app {} has no url", app.id)));
    }
    info!(app_id = app.id, url = app.url.as_deref().unwrap_or(""), "publish complete");
    Ok(app)
}

/// Publish the first scene of a project.
pub async fn publish_first_scene(
    client: &EditorClient,
    project_id: u64,
    name: &str,
) -> Result<AppInfo> {
    let scene = first_scene(client, project_id).await?;
    publish_scene(client, project_id, scene.id, name).await
}

/// Build the given scenes for download and wait for the download URL.
pub async fn download_build(
    client: &EditorClient,
    project_id: u64,
    scenes: &[u64],
    name: &str,
) -> Result<String> {
    let job = client.start_download(project_id, scenes, name).await?;
    let job = await_job(client, job.id).await?;
    let url = job_data_str(&job, "downloadUrl")?;
    info!(project_id, %url, "download build complete");
    Ok(url)
}

/// Upload a file and import it into a project; returns the imported asset id.
pub async fn import_file(
    client: &EditorClient,
    uploader: &Uploader,
    project_id: u64,
    path: &Path,
) -> Result<u64> {
    let key = uploader.upload_file(client, path).await?;
    import_key(client, project_id, &key).await
}

/// Import an already-uploaded object by key.
pub async fn import_key(client: &EditorClient, project_id: u64, key: &str) -> Result<u64> {
    let job = client.start_import(project_id, key).await?;
    let job = await_job(client, job.id).await?;
    let asset = job_data_u64(&job, "assetId")?;
    info!(project_id, asset, "import complete");
    Ok(asset)
}
