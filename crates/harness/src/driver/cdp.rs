//! Chrome DevTools Protocol page driver
//!
//! Attaches to an already-running browser over its debugging port (launching
//! and profile management belong to the surrounding tooling), installs the
//! in-page RPC shim, and optionally feeds every paused network request
//! through a [`RequestInterceptor`] before letting it continue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::bridge::RequestInterceptor;
use crate::driver::{PageRpc, RpcRequest, RpcResponse};
use crate::error::{Error, Result};

/// The versioned RPC module injected into every page.
pub const RPC_SHIM: &str = include_str!("rpc_shim.js");

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Command channel shared between the page handle and the read loop.
struct CommandBus {
    sink: AsyncMutex<WsSink>,
    pending: AsyncMutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
}

impl CommandBus {
    /// Send one CDP command and wait for its response payload.
    async fn command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = json!({ "id": id, "method": method, "params": params });
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(frame.to_string()))
            .await
            .map_err(|e| Error::Driver(format!("failed to send {method}: {e}")))?;

        let response = match timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Driver(format!(
                    "connection closed while awaiting {method}"
                )))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Driver(format!("{method} timed out")));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown protocol error");
            return Err(Error::Driver(format!("{method}: {message}")));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// A page attached over CDP.
pub struct CdpPage {
    bus: Arc<CommandBus>,
    interceptor: Arc<parking_lot::Mutex<Option<Arc<RequestInterceptor>>>>,
}

impl CdpPage {
    /// Attach to the first page target advertised by a browser's debugging
    /// endpoint, e.g. `http://127.0.0.1:9222`.
    pub async fn attach(debugger_url: &str) -> Result<Self> {
        let list_url = format!("{}/json/list", debugger_url.trim_end_matches('/'));
        let targets: Value = reqwest::get(&list_url)
            .await?
            .error_for_status()?
            .json()
            .await?;

        let ws_url = targets
            .as_array()
            .and_then(|targets| {
                targets
                    .iter()
                    .find(|t| t.get("type").and_then(Value::as_str) == Some("page"))
            })
            .and_then(|t| t.get("webSocketDebuggerUrl").and_then(Value::as_str))
            .ok_or_else(|| Error::Driver(format!("no page target at {list_url}")))?
            .to_string();

        debug!(%ws_url, "connecting to page target");
        let (stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| Error::Driver(format!("websocket connect failed: {e}")))?;
        let (sink, source) = stream.split();

        let bus = Arc::new(CommandBus {
            sink: AsyncMutex::new(sink),
            pending: AsyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });
        let interceptor: Arc<parking_lot::Mutex<Option<Arc<RequestInterceptor>>>> =
            Arc::new(parking_lot::Mutex::new(None));

        tokio::spawn(read_loop(source, bus.clone(), interceptor.clone()));

        let page = Self { bus, interceptor };
        page.bus.command("Page.enable", json!({})).await?;
        page.bus.command("Runtime.enable", json!({})).await?;
        info!("attached to page target");
        Ok(page)
    }

    /// Install the RPC shim in the current document and every future one.
    pub async fn install_rpc_shim(&self) -> Result<()> {
        self.bus
            .command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": RPC_SHIM }),
            )
            .await?;
        self.evaluate(RPC_SHIM).await?;
        Ok(())
    }

    /// Route every request matching `url_pattern` through the bridge before
    /// it leaves the browser.
    pub async fn enable_interception(
        &self,
        bridge: Arc<RequestInterceptor>,
        url_pattern: &str,
    ) -> Result<()> {
        *self.interceptor.lock() = Some(bridge);
        self.bus
            .command(
                "Fetch.enable",
                json!({ "patterns": [{ "urlPattern": url_pattern }] }),
            )
            .await?;
        info!(%url_pattern, "network interception enabled");
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.bus
            .command("Page.navigate", json!({ "url": url }))
            .await?;
        debug!(%url, "navigated");
        Ok(())
    }

    /// Evaluate an expression, awaiting any promise it returns, and hand back
    /// the JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let payload = self
            .bus
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = payload.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("unknown exception");
            return Err(Error::Driver(format!("page exception: {text}")));
        }
        Ok(payload
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn close(&self) -> Result<()> {
        let _ = self.bus.sink.lock().await.close().await;
        Ok(())
    }
}

#[async_trait]
impl PageRpc for CdpPage {
    async fn http(&self, request: RpcRequest) -> Result<RpcResponse> {
        let value = self.evaluate(&rpc_call_expression(&request)?).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Driver(format!("malformed shim response: {e}")))
    }

    async fn bootstrap(&self) -> Result<Value> {
        self.evaluate("window.__sfRpc.bootstrap()").await
    }
}

/// Expression invoking the shim for one request. The request rides as a JSON
/// literal, so no manual escaping is involved.
fn rpc_call_expression(request: &RpcRequest) -> Result<String> {
    Ok(format!(
        "window.__sfRpc.http({})",
        serde_json::to_string(request)?
    ))
}

/// Routes command responses to their waiters and paused requests through the
/// bridge. Ends when the socket closes; any still-pending commands observe a
/// dropped sender.
async fn read_loop(
    mut source: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    bus: Arc<CommandBus>,
    interceptor: Arc<parking_lot::Mutex<Option<Arc<RequestInterceptor>>>>,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if let Some(id) = frame.get("id").and_then(Value::as_u64) {
                    if let Some(waiter) = bus.pending.lock().await.remove(&id) {
                        let _ = waiter.send(frame);
                    }
                } else if frame.get("method").and_then(Value::as_str)
                    == Some("Fetch.requestPaused")
                {
                    handle_paused_request(&frame, &bus, &interceptor);
                }
            }
            Ok(WsMessage::Close(_)) => {
                debug!("page websocket closed");
                break;
            }
            Err(e) => {
                warn!("page websocket error: {e}");
                break;
            }
            _ => {}
        }
    }
}

/// Queue one paused request through the bridge and continue it exactly once.
fn handle_paused_request(
    frame: &Value,
    bus: &Arc<CommandBus>,
    interceptor: &Arc<parking_lot::Mutex<Option<Arc<RequestInterceptor>>>>,
) {
    let params = &frame["params"];
    let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
        return;
    };
    let request_id = request_id.to_string();
    let method = params["request"]["method"]
        .as_str()
        .unwrap_or("GET")
        .to_string();
    let url = params["request"]["url"].as_str().unwrap_or("/").to_string();

    let bridge = interceptor.lock().clone();
    let bus = bus.clone();
    tokio::spawn(async move {
        let continue_request = async {
            bus.command("Fetch.continueRequest", json!({ "requestId": request_id }))
                .await
        };
        let outcome = match bridge {
            Some(bridge) => bridge.schedule(&method, &url, continue_request).await,
            // Interception events without a bridge must not stall the page.
            None => continue_request.await,
        };
        if let Err(e) = outcome {
            // The page may be gone by the time a queued request drains.
            debug!(%method, %url, "late continue dropped: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_expression_embeds_the_request_as_json() {
        let req = RpcRequest::post("/api/projects", json!({"name": "cube \"one\""}))
            .with_auth("tok-1");
        let expr = rpc_call_expression(&req).unwrap();
        assert!(expr.starts_with("window.__sfRpc.http({"));
        // The quote inside the name survives as a JSON escape, not a raw quote.
        assert!(expr.contains(r#"cube \"one\""#));
    }

    #[test]
    fn shim_is_versioned_and_installs_once() {
        assert!(RPC_SHIM.contains("window.__sfRpc"));
        assert!(RPC_SHIM.contains("version"));
    }
}
