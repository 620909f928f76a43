//! Scenario-test support for the SceneForge harness
//!
//! Provides the in-process mock backend, the HTTP-backed page double, and
//! shorthand constructors the scenario tests share. The scenarios themselves
//! live under `tests/`.

pub mod backend;
pub mod page;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sceneforge_harness::bridge::RequestInterceptor;
use sceneforge_harness::client::EditorClient;
use sceneforge_harness::session::SessionContext;

pub use backend::MockBackend;
pub use page::HttpPage;

/// Install the test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session context matching the mock backend's built-in user.
pub fn session_for(backend: &MockBackend) -> SessionContext {
    SessionContext {
        access_token: backend.token().to_string(),
        user_id: 7,
        username: "alice".to_string(),
        project_id: None,
        branch_id: None,
        engine_version: Some("2.4.1".to_string()),
    }
}

/// Client over a plain page, no throttling.
pub fn client(backend: &MockBackend) -> EditorClient {
    let page = Arc::new(HttpPage::new(backend.base_url()));
    EditorClient::new(page, session_for(backend))
}

/// Client whose every request rides the interception bridge.
pub fn client_with_bridge(backend: &MockBackend, bridge: Arc<RequestInterceptor>) -> EditorClient {
    let page = Arc::new(HttpPage::new(backend.base_url()).with_bridge(bridge));
    EditorClient::new(page, session_for(backend))
}

/// Client with a deliberately wrong token, for auth-behavior scenarios.
pub fn anonymous_client(backend: &MockBackend) -> EditorClient {
    let page = Arc::new(HttpPage::new(backend.base_url()));
    let mut session = session_for(backend);
    session.access_token = "not-a-valid-token".to_string();
    EditorClient::new(page, session)
}
