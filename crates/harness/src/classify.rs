//! Request classification into traffic classes
//!
//! Every outbound request is mapped to exactly one [`TrafficClass`] from its
//! HTTP method and path. Classification is pure and order-sensitive: strict
//! patterns override the polling patterns, which override asset patterns,
//! which override the method-based default.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Traffic class assigned to an outbound request.
///
/// The class selects which limiter chain admits the request. API classes ride
/// the full cdn -> edge -> class chain; `Edge` is everything else sent to the
/// backend domain (page loads, static assets) and rides cdn -> edge only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficClass {
    Cdn,
    Edge,
    ApiNormal,
    ApiStrict,
    ApiAssets,
    ApiPost,
    ApiDownload,
}

impl TrafficClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::Cdn => "cdn",
            TrafficClass::Edge => "edge",
            TrafficClass::ApiNormal => "api-normal",
            TrafficClass::ApiStrict => "api-strict",
            TrafficClass::ApiAssets => "api-assets",
            TrafficClass::ApiPost => "api-post",
            TrafficClass::ApiDownload => "api-download",
        }
    }
}

impl std::fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classification rule: optional method constraint plus a path pattern.
struct Rule {
    method: Option<&'static str>,
    pattern: Regex,
}

impl Rule {
    fn matches(&self, method: &str, path: &str) -> bool {
        self.method
            .map_or(true, |m| method.eq_ignore_ascii_case(m))
            && self.pattern.is_match(path)
    }
}

fn rule(method: Option<&'static str>, pattern: &str) -> Rule {
    Rule {
        method,
        // Patterns are static and known-good; a failure here is a programming
        // error caught by the classifier unit tests.
        pattern: Regex::new(pattern).expect("invalid classifier pattern"),
    }
}

/// Pure (method, path) -> [`TrafficClass`] mapping.
///
/// Construct one and share it; compiling the pattern set is the only cost.
pub struct RequestClassifier {
    strict: Vec<Rule>,
    download: Vec<Rule>,
    assets: Vec<Rule>,
}

impl RequestClassifier {
    pub fn new() -> Self {
        Self {
            // Mutating or expensive routes: single-id downloads, upload
            // handshake, app builds, splat publishing.
            strict: vec![
                rule(None, r"^/api/\d+/download(?:$|[/?])"),
                rule(Some("POST"), r"^/api/projects/\d+/upload$"),
                rule(
                    Some("POST"),
                    r"^/api/upload/(?:start-upload|signed-urls|complete-upload)$",
                ),
                rule(Some("POST"), r"^/api/apps$"),
                rule(Some("POST"), r"^/api/apps/download$"),
                rule(Some("POST"), r"^/api/splats$"),
                rule(Some("POST"), r"^/api/splats/publish$"),
            ],
            // Status polls for long-running jobs and builds; the download
            // tier carries the oversized reservoir these need.
            download: vec![
                rule(Some("GET"), r"^/api/jobs/\d+$"),
                rule(Some("GET"), r"^/api/apps/\d+$"),
            ],
            // Read-heavy asset endpoints. The bare-id pattern is a prefix
            // match, so strict paths like /api/{id}/download overlap it and
            // must win by precedence.
            assets: vec![
                rule(None, r"^/api/?$"),
                rule(None, r"^/api/\d+"),
                rule(None, r"^/api/\d+/reimport"),
            ],
        }
    }

    /// Classify one request. Pure: same inputs always yield the same class.
    pub fn classify(&self, method: &str, path: &str) -> TrafficClass {
        let path = strip_query(path);

        if !is_api_path(path) {
            return TrafficClass::Edge;
        }
        if self.strict.iter().any(|r| r.matches(method, path)) {
            return TrafficClass::ApiStrict;
        }
        if self.download.iter().any(|r| r.matches(method, path)) {
            return TrafficClass::ApiDownload;
        }
        if self.assets.iter().any(|r| r.matches(method, path)) {
            return TrafficClass::ApiAssets;
        }
        if method.eq_ignore_ascii_case("POST") {
            return TrafficClass::ApiPost;
        }
        TrafficClass::ApiNormal
    }
}

impl Default for RequestClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// True for paths under the backend API root.
pub fn is_api_path(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}
