//! Legacy-vs-v2 API parity: the two read families must return
//! shape-equivalent documents.

use sceneforge_e2e::{client, init_tracing, MockBackend};
use sceneforge_harness::shape;

#[tokio::test]
async fn project_reads_are_shape_equivalent_across_versions() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let project_id = backend.seed_project("parity subject", &["Main"]);
    let legacy = client
        .get_raw(&format!("/api/projects/{project_id}"))
        .await
        .unwrap();
    let v2 = client
        .get_raw(&format!("/api/v2/projects/{project_id}"))
        .await
        .unwrap();

    assert!(
        shape::equivalent(&legacy, &v2),
        "shape drift: {:?}",
        shape::diff(&legacy, &v2)
    );
}

#[tokio::test]
async fn user_reads_are_shape_equivalent_across_versions() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let legacy = client.get_raw("/api/users/alice").await.unwrap();
    let v2 = client.get_raw("/api/v2/users/alice").await.unwrap();

    assert!(
        shape::equivalent(&legacy, &v2),
        "shape drift: {:?}",
        shape::diff(&legacy, &v2)
    );
}

#[tokio::test]
async fn the_comparison_rejects_genuinely_different_documents() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let project_id = backend.seed_project("parity subject", &["Main"]);
    let project = client
        .get_raw(&format!("/api/projects/{project_id}"))
        .await
        .unwrap();
    let user = client.get_raw("/api/users/alice").await.unwrap();

    // Sanity: the helper is not vacuously true on live payloads.
    assert!(shape::diff(&project, &user).is_some());
}
