//! Shell asset manifest and request route classification.

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CACHE_PREFIX: &str = "app-cache";
pub const DEFAULT_VERSION: &str = "v1";

/// Assets needed to render the shell without a network.
pub const DEFAULT_ASSETS: [&str; 5] = [
    "/",
    "/index.html",
    "/manifest",
    "/assets/icons/icon-192.png",
    "/assets/icons/icon-512.png",
];

// Only used to resolve relative request targets; never contacted.
const RESOLVE_BASE: &str = "http://shell.invalid/";

/// Versioned list of shell assets. One manifest = one cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellManifest {
    pub cache_prefix: String,
    pub version: String,
    pub assets: Vec<String>,
}

impl Default for ShellManifest {
    fn default() -> Self {
        Self {
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            version: DEFAULT_VERSION.to_string(),
            assets: DEFAULT_ASSETS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl ShellManifest {
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    /// Name of the cache generation this manifest installs into.
    pub fn generation(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }
}

/// How a request is treated by the cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteClass {
    /// Served cache-first.
    ShellAsset,
    /// Always served from the network and never stored.
    DynamicData,
}

/// Path and query of a request target, used as the cache key.
///
/// Accepts absolute URLs or origin-relative paths; fragments are dropped.
pub fn cache_key(target: &str) -> Option<String> {
    let url = resolve(target)?;
    Some(match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
    })
}

fn resolve(target: &str) -> Option<Url> {
    let base = Url::parse(RESOLVE_BASE).ok()?;
    base.join(target).ok()
}

fn segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Route table built once from configuration.
///
/// Dynamic prefixes are matched by whole path segment, so `/models/x.bin`
/// is dynamic while `/assets/models-guide.html` is not.
#[derive(Debug, Clone, Default)]
pub struct RouteClassifier {
    dynamic_prefixes: Vec<Vec<String>>,
}

impl RouteClassifier {
    /// Build from path prefixes (e.g. the models base `/models`).
    pub fn new<I, S>(dynamic_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dynamic_prefixes = dynamic_prefixes
            .into_iter()
            .filter_map(|p| resolve(p.as_ref()).map(|u| segments(&u)))
            .filter(|segs| !segs.is_empty())
            .collect();
        Self { dynamic_prefixes }
    }

    pub fn classify(&self, target: &str) -> RouteClass {
        let Some(url) = resolve(target) else {
            return RouteClass::ShellAsset;
        };
        let path = segments(&url);
        let dynamic = self
            .dynamic_prefixes
            .iter()
            .any(|prefix| path.len() >= prefix.len() && path[..prefix.len()] == prefix[..]);
        if dynamic {
            RouteClass::DynamicData
        } else {
            RouteClass::ShellAsset
        }
    }
}
