//! Session context read from the page-global configuration object

use serde::{Deserialize, Serialize};

use crate::driver::PageRpc;
use crate::error::{Error, Result};

/// Auth and addressing state for one editor page.
///
/// Read once after the page is ready; the backend keeps these stable for the
/// page's whole life, so the context is immutable by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub access_token: String,
    pub user_id: u64,
    pub username: String,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub engine_version: Option<String>,
}

impl SessionContext {
    /// Bootstrap from the page-global config object via the driver.
    pub async fn from_page(page: &dyn PageRpc) -> Result<Self> {
        let raw = page.bootstrap().await?;
        serde_json::from_value(raw)
            .map_err(|e| Error::Session(format!("incomplete page config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_the_shim_snapshot() {
        let raw = serde_json::json!({
            "accessToken": "tok-1",
            "userId": 7,
            "username": "alice",
            "projectId": 101,
            "branchId": "br-main",
            "engineVersion": "2.4.1",
        });
        let session: SessionContext = serde_json::from_value(raw).unwrap();
        assert_eq!(session.access_token, "tok-1");
        assert_eq!(session.project_id, Some(101));
        assert_eq!(session.branch_id.as_deref(), Some("br-main"));
    }

    #[test]
    fn missing_token_is_a_session_error() {
        let raw = serde_json::json!({
            "accessToken": null,
            "userId": 7,
            "username": "alice",
        });
        let err = serde_json::from_value::<SessionContext>(raw).unwrap_err();
        assert!(err.to_string().contains("invalid type"), "{err}");
    }
}
