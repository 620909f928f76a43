//! Browser driver seam
//!
//! The harness consumes a browser through two narrow capabilities: making an
//! HTTP call from inside the page, and reading the page-global configuration
//! object. [`PageRpc`] captures exactly that, so scenario code can run
//! against real Chrome (see [`cdp`]) or against a test double without
//! touching anything else.

pub mod cdp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One in-page HTTP call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Bearer token; absent for the anonymous reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl RpcRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut req = Self::new("POST", path);
        req.body = Some(body);
        req
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("DELETE", path)
    }

    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: None,
            auth: None,
        }
    }

    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }
}

/// Raw response surfaced by the shim: status plus parsed JSON body
/// (`null` when the body was empty or not JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl RpcResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

/// The browser collaborator, reduced to what the harness needs.
#[async_trait]
pub trait PageRpc: Send + Sync {
    /// Perform `request` from the page context and return the raw response.
    async fn http(&self, request: RpcRequest) -> Result<RpcResponse>;

    /// Read the page-global configuration object (token, user, project,
    /// engine version). Read once per page; the values never change while
    /// the page lives.
    async fn bootstrap(&self) -> Result<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_empty_fields() {
        let req = RpcRequest::get("/api/users/alice");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["method"], "GET");
        assert_eq!(value["path"], "/api/users/alice");
        assert!(value.get("body").is_none());
        assert!(value.get("auth").is_none());
    }

    #[test]
    fn request_carries_auth_and_body() {
        let req = RpcRequest::post("/api/projects", serde_json::json!({"name": "cube"}))
            .with_auth("tok-1");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["auth"], "tok-1");
        assert_eq!(value["body"]["name"], "cube");
    }
}
