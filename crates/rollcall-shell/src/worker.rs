//! Install / activate / intercept lifecycle for the offline shell.

use crate::manifest::{cache_key, RouteClass, RouteClassifier, ShellManifest};
use crate::network::{FetchError, Network};
use crate::store::{CacheError, CacheStorage, ShellResponse};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("install failed fetching {asset}: {source}")]
    Fetch {
        asset: String,
        #[source]
        source: FetchError,
    },
    #[error("install failed: {asset} returned status {status}")]
    Status { asset: String, status: u16 },
    #[error("generation {0} is not installed")]
    NotInstalled(String),
    #[error(transparent)]
    Storage(#[from] CacheError),
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServedFrom {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub route: RouteClass,
    pub from: ServedFrom,
    pub response: ShellResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub current: String,
    pub deleted: Vec<String>,
    /// Generations that could not be deleted, with the error text.
    pub failed: Vec<(String, String)>,
}

pub struct ShellCache {
    manifest: ShellManifest,
    routes: RouteClassifier,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl ShellCache {
    pub fn new(
        manifest: ShellManifest,
        routes: RouteClassifier,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            manifest,
            routes,
            storage,
            network,
        }
    }

    pub fn manifest(&self) -> &ShellManifest {
        &self.manifest
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Snapshot every shell asset into the current generation.
    ///
    /// All-or-nothing: one failed or non-2xx fetch stores nothing.
    pub async fn install(&self) -> Result<Vec<String>, ShellError> {
        let generation = self.manifest.generation();
        let mut entries = Vec::with_capacity(self.manifest.assets.len());

        for asset in &self.manifest.assets {
            let key = cache_key(asset).ok_or_else(|| ShellError::Fetch {
                asset: asset.clone(),
                source: FetchError::InvalidTarget(asset.clone()),
            })?;
            let response = self
                .network
                .fetch(asset)
                .await
                .map_err(|source| ShellError::Fetch {
                    asset: asset.clone(),
                    source,
                })?;
            if !response.is_ok() {
                return Err(ShellError::Status {
                    asset: asset.clone(),
                    status: response.status,
                });
            }
            entries.push((key, response));
        }

        let keys = entries.iter().map(|(k, _)| k.clone()).collect();
        self.storage.put_all(&generation, entries).await?;
        tracing::info!(%generation, assets = self.manifest.assets.len(), "shell installed");
        Ok(keys)
    }

    /// Delete every generation except the current one.
    ///
    /// A failed deletion is logged and reported; it does not stop the others.
    pub async fn activate(&self) -> Result<ActivationReport, ShellError> {
        let current = self.manifest.generation();
        let existing = self.storage.generations().await?;
        if !existing.contains(&current) {
            return Err(ShellError::NotInstalled(current));
        }

        let mut report = ActivationReport {
            current: current.clone(),
            ..Default::default()
        };
        for name in existing.into_iter().filter(|n| *n != current) {
            match self.storage.delete(&name).await {
                Ok(_) => {
                    tracing::info!(generation = %name, "stale generation deleted");
                    report.deleted.push(name);
                }
                Err(e) => {
                    tracing::warn!(generation = %name, error = %e, "failed to delete stale generation");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        tracing::info!(%current, deleted = report.deleted.len(), "shell activated");
        Ok(report)
    }

    /// Install the current manifest and activate it immediately.
    pub async fn update(&self) -> Result<ActivationReport, ShellError> {
        self.install().await?;
        self.activate().await
    }

    /// Serve one request: dynamic data from the network, everything else cache-first.
    pub async fn handle(&self, target: &str) -> Result<Served, FetchError> {
        let route = self.routes.classify(target);
        if route == RouteClass::DynamicData {
            tracing::trace!(request = target, "dynamic route bypasses cache");
            return self.from_network(route, target).await;
        }

        let key = cache_key(target).ok_or_else(|| FetchError::InvalidTarget(target.to_string()))?;
        match self.storage.lookup(&key).await {
            Ok(Some(response)) => {
                tracing::trace!(%key, "cache hit");
                return Ok(Served {
                    route,
                    from: ServedFrom::Cache,
                    response,
                });
            }
            Ok(None) => tracing::trace!(%key, "cache miss"),
            Err(e) => tracing::warn!(%key, error = %e, "cache lookup failed; using network"),
        }
        self.from_network(route, target).await
    }

    async fn from_network(&self, route: RouteClass, target: &str) -> Result<Served, FetchError> {
        let response = self.network.fetch(target).await?;
        Ok(Served {
            route,
            from: ServedFrom::Network,
            response,
        })
    }
}
