//! Interception/scheduling bridge
//!
//! Sits between the browser's network interception and the limiter registry:
//! every outbound request to the backend domain is classified and held until
//! its limiter chain admits it, then allowed to continue unmodified, exactly
//! once. Scheduling itself never errors and never times out; if the page is
//! torn down while requests are queued, the queued continuations still
//! resolve and the late continue degrades to a logged no-op at the driver.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::classify::{RequestClassifier, TrafficClass};
use crate::limiter::RateLimiterRegistry;

/// Classifies intercepted requests and defers them through the shared
/// limiter registry.
pub struct RequestInterceptor {
    registry: Arc<RateLimiterRegistry>,
    classifier: RequestClassifier,
}

impl RequestInterceptor {
    pub fn new(registry: Arc<RateLimiterRegistry>) -> Self {
        Self {
            registry,
            classifier: RequestClassifier::new(),
        }
    }

    pub fn registry(&self) -> &Arc<RateLimiterRegistry> {
        &self.registry
    }

    /// Class for one intercepted request. `url` may be absolute or a bare
    /// path; only the path takes part in classification.
    pub fn classify(&self, method: &str, url: &str) -> TrafficClass {
        self.classifier.classify(method, url_path(url))
    }

    /// Admit `continuation` through the chain for this request's class, then
    /// run it. The continuation runs exactly once; its output passes through.
    pub async fn schedule<T, F>(&self, method: &str, url: &str, continuation: F) -> T
    where
        F: Future<Output = T>,
    {
        let class = self.classify(method, url);
        debug!(%method, %url, class = %class, "throttling intercepted request");
        self.registry.schedule(class, continuation).await
    }
}

/// Path component of `url`, which may be absolute or already a path.
fn url_path(url: &str) -> &str {
    if url.starts_with('/') {
        return url;
    }
    match url.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(at) => &rest[at..],
            None => "/",
        },
        None => url,
    }
}
