//! Project lifecycle scenarios: create, list, fork, delete, auth behavior.

use sceneforge_e2e::{anonymous_client, client, init_tracing, MockBackend};
use sceneforge_harness::error::Error;
use sceneforge_harness::ops;

#[tokio::test]
async fn project_lifecycle_create_list_get_delete() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let project = ops::create_project(&client, "demo cube").await.unwrap();
    assert_eq!(project.name, "demo cube");

    let listed = client.list_projects(None).await.unwrap();
    assert!(listed.iter().any(|p| p.id == project.id));

    let fetched = client.project(project.id).await.unwrap();
    assert_eq!(fetched.name, "demo cube");

    client.delete_project(project.id).await.unwrap();
    match client.project(project.id).await.unwrap_err() {
        Error::Api { status, .. } => assert_eq!(status, 404),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn fork_waits_for_the_job_and_carries_source_metadata() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    backend.set_job_poll_latency(1);
    let client = client(&backend);

    let source_id = backend.seed_project("terrain demo", &["Main"]);
    let forked_id = ops::fork_project(&client, source_id, "terrain fork")
        .await
        .unwrap();
    assert_ne!(forked_id, source_id);

    let source = client.project(source_id).await.unwrap();
    let fork = client.project(forked_id).await.unwrap();
    assert_eq!(fork.name, "terrain fork");
    assert_eq!(fork.description, source.description);
    assert_eq!(fork.settings, source.settings);

    // The fork also carries the source's scenes.
    let scenes = client.list_scenes(forked_id).await.unwrap();
    assert_eq!(scenes.len(), 1);
    assert_eq!(scenes[0].name, "Main");
}

#[tokio::test]
async fn listing_is_anonymous_but_project_reads_need_a_token() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let project_id = backend.seed_project("public gallery", &["Main"]);

    let anon = anonymous_client(&backend);
    let listed = anon.list_projects(None).await.unwrap();
    assert!(listed.iter().any(|p| p.id == project_id));

    match anon.project(project_id).await.unwrap_err() {
        Error::Api { status, .. } => assert_eq!(status, 401),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn view_filter_scopes_the_listing() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let public_id = backend.seed_project("shared scene", &[]);
    let all = client.list_projects(None).await.unwrap();
    let public = client.list_projects(Some("public")).await.unwrap();
    let private = client.list_projects(Some("private")).await.unwrap();

    assert!(all.iter().any(|p| p.id == public_id));
    assert!(public.iter().any(|p| p.id == public_id));
    assert!(private.iter().all(|p| p.id != public_id));
}

#[tokio::test]
async fn empty_scene_list_is_a_fetch_error() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let project_id = backend.seed_project("sceneless", &[]);
    let err = ops::first_scene(&client, project_id).await.unwrap_err();
    assert!(err.to_string().contains("no scenes found"), "{err}");
}

#[tokio::test]
async fn client_rides_out_a_429_burst() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let project_id = backend.seed_project("busy backend", &[]);
    backend.set_rate_limit_burst(1);

    // One 429, one backoff, then the read lands with identical arguments.
    let project = client.project(project_id).await.unwrap();
    assert_eq!(project.id, project_id);
}
