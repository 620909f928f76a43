//! SceneForge E2E Harness Core
//!
//! Traffic shaping, in-page RPC and job polling for driving the SceneForge
//! editor's rate-limited, job-based backend from a real browser.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ scenario code (crates/e2e)                                   │
//! │   ops::publish_scene / fork_project / download_build / ...   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ EditorClient ── typed calls, 429 backoff, ApiOutcome         │
//! │ jobs::poll / await_job ── start + poll → single awaitable    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ PageRpc (driver seam) ── cdp::CdpPage + rpc_shim.js          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ RequestInterceptor ── classify + defer every page request    │
//! │ RateLimiterRegistry ── cdn → edge → per-class chains         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry is constructed once per process and shared everywhere; the
//! backend enforces one global quota regardless of how many pages run.

pub mod bridge;
pub mod classify;
pub mod client;
pub mod driver;
pub mod error;
pub mod jobs;
pub mod limiter;
pub mod ops;
pub mod session;
pub mod shape;
pub mod upload;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the types nearly every consumer touches.
pub use bridge::RequestInterceptor;
pub use classify::{RequestClassifier, TrafficClass};
pub use client::{ApiOutcome, EditorClient, Job};
pub use driver::{PageRpc, RpcRequest, RpcResponse};
pub use error::{Error, Result};
pub use limiter::{RateLimiter, RateLimiterRegistry, RegistryConfig};
pub use session::SessionContext;

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
