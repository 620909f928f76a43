//! Chunked upload and import scenarios.

use bytes::Bytes;
use sceneforge_e2e::{client, init_tracing, MockBackend};
use sceneforge_harness::error::Error;
use sceneforge_harness::upload::Uploader;
use sceneforge_harness::ops;

#[tokio::test]
async fn chunked_upload_submits_ordered_unquoted_parts() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    // 2.5 chunks worth of payload must travel as exactly three parts.
    let chunk = 8u64;
    let payload = Bytes::from(vec![0xA5u8; (chunk * 5 / 2) as usize]);
    let uploader = Uploader::new().with_chunk_size(chunk);

    let key = uploader
        .upload_bytes(&client, "scene.zip", payload)
        .await
        .unwrap();

    assert!(backend.upload_completed(&key));
    let parts = backend.upload_parts(&key);
    assert_eq!(
        parts.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    for (_, etag) in &parts {
        assert!(!etag.contains('"'), "etag still quoted: {etag}");
    }
}

#[tokio::test]
async fn uploaded_object_imports_into_a_project() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    backend.set_job_poll_latency(1);
    let client = client(&backend);

    let project_id = backend.seed_project("importer", &["Main"]);
    let uploader = Uploader::new().with_chunk_size(16);
    let key = uploader
        .upload_bytes(&client, "props.zip", Bytes::from_static(b"not-really-a-zip"))
        .await
        .unwrap();

    let asset_id = ops::import_key(&client, project_id, &key).await.unwrap();
    assert!(asset_id > 0);
}

#[tokio::test]
async fn importing_an_unknown_key_is_rejected() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let client = client(&backend);

    let project_id = backend.seed_project("importer", &["Main"]);
    let err = client
        .start_import(project_id, "upload/u-999/ghost.zip")
        .await
        .unwrap_err();
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("no completed upload"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn files_upload_from_disk() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    backend.set_job_poll_latency(1);
    let client = client(&backend);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("terrain.zip");
    tokio::fs::write(&path, vec![7u8; 100]).await.unwrap();

    let project_id = backend.seed_project("importer", &["Main"]);
    let uploader = Uploader::new().with_chunk_size(64);
    let asset_id = ops::import_file(&client, &uploader, project_id, &path)
        .await
        .unwrap();
    assert!(asset_id > 0);
}
