//! Shared test doubles for the crate's unit tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::driver::{PageRpc, RpcRequest, RpcResponse};
use crate::error::{Error, Result};

/// A page that replays a scripted sequence of responses and records every
/// request it was asked to make.
pub(crate) struct ScriptedPage {
    responses: Mutex<VecDeque<RpcResponse>>,
    requests: Mutex<Vec<RpcRequest>>,
    config: Value,
}

impl ScriptedPage {
    pub fn new(responses: Vec<RpcResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PageRpc for ScriptedPage {
    async fn http(&self, request: RpcRequest) -> Result<RpcResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Driver("scripted responses exhausted".into()))
    }

    async fn bootstrap(&self) -> Result<Value> {
        Ok(self.config.clone())
    }
}

/// Convenience: the double as a trait object the client constructor expects.
pub(crate) fn scripted(responses: Vec<RpcResponse>) -> Arc<ScriptedPage> {
    Arc::new(ScriptedPage::new(responses))
}
