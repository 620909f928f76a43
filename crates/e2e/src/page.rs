//! HTTP-backed stand-in for the browser page
//!
//! Implements the harness driver seam over a plain HTTP client pointed at
//! the mock backend, so scenarios exercise the client, poller and bridge
//! end-to-end without a browser. When a bridge is attached, every request —
//! polling included — is classified and throttled exactly like intercepted
//! page traffic.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use sceneforge_harness::bridge::RequestInterceptor;
use sceneforge_harness::driver::{PageRpc, RpcRequest, RpcResponse};
use sceneforge_harness::error::{Error, Result};

pub struct HttpPage {
    http: reqwest::Client,
    base_url: String,
    bridge: Option<Arc<RequestInterceptor>>,
    config: Value,
}

impl HttpPage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            bridge: None,
            config: Value::Null,
        }
    }

    /// Route every request through the shared interceptor, like intercepted
    /// browser traffic.
    pub fn with_bridge(mut self, bridge: Arc<RequestInterceptor>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Canned page-global config returned from `bootstrap`.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    async fn send(&self, request: &RpcRequest) -> Result<RpcResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::Driver(format!("bad method {}", request.method)))?;
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, request.path));
        if let Some(token) = &request.auth {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(RpcResponse { status, body })
    }
}

#[async_trait]
impl PageRpc for HttpPage {
    async fn http(&self, request: RpcRequest) -> Result<RpcResponse> {
        match &self.bridge {
            Some(bridge) => {
                bridge
                    .schedule(&request.method, &request.path, self.send(&request))
                    .await
            }
            None => self.send(&request).await,
        }
    }

    async fn bootstrap(&self) -> Result<Value> {
        Ok(self.config.clone())
    }
}
