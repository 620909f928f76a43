//! Publish and download scenarios, including job failure surfacing.

use sceneforge_e2e::{client, init_tracing, MockBackend};
use sceneforge_harness::error::Error;
use sceneforge_harness::{ops, upload};

#[tokio::test]
async fn publishing_the_first_scene_yields_a_launch_url() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    backend.set_job_poll_latency(1);
    let client = client(&backend);

    let project_id = backend.seed_project("publishable", &["Main", "Menu"]);
    let app = ops::publish_first_scene(&client, project_id, "publishable v1")
        .await
        .unwrap();

    let url = app.url.expect("published app has a url");
    assert!(url.contains("/launch/"), "{url}");

    let apps = client.list_apps(project_id).await.unwrap();
    assert!(apps.iter().any(|a| a.id == app.id));
}

#[tokio::test]
async fn download_build_resolves_to_a_fetchable_artifact() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    backend.set_job_poll_latency(1);
    let client = client(&backend);

    let project_id = backend.seed_project("downloadable", &["Main"]);
    let url = ops::download_build(&client, project_id, &[1], "downloadable-v1")
        .await
        .unwrap();
    assert!(url.ends_with(".zip"), "{url}");

    let http = reqwest::Client::new();
    let (size, checksum) = upload::fetch_and_checksum(&http, &url).await.unwrap();
    assert!(size > 0);
    assert_eq!(checksum.len(), 64);
}

#[tokio::test]
async fn failed_download_job_surfaces_the_backend_message() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    backend.set_job_poll_latency(1);
    let client = client(&backend);

    let project_id = backend.seed_project("doomed", &["Main"]);
    backend.fail_next_job("disk full");

    let err = ops::download_build(&client, project_id, &[1], "doomed-v1")
        .await
        .unwrap_err();
    assert!(err.is_job_failure());
    assert!(err.to_string().contains("disk full"), "{err}");
}

#[tokio::test]
async fn deleted_apps_disappear() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    backend.set_job_poll_latency(1);
    let client = client(&backend);

    let project_id = backend.seed_project("ephemeral", &["Main"]);
    let app = ops::publish_first_scene(&client, project_id, "ephemeral v1")
        .await
        .unwrap();

    client.delete_app(app.id).await.unwrap();
    match client.app(app.id).await.unwrap_err() {
        Error::Api { status, .. } => assert_eq!(status, 404),
        other => panic!("unexpected error: {other}"),
    }
}
