//! Capability model loader.
//!
//! Loads the face locator, landmark refiner and descriptor extractor from the
//! configured models base and publishes a single readiness signal.

use crate::detector::{DescriptorExtractor, FaceLocator, LandmarkRefiner};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

// Weight manifests shipped alongside the shell under the models base.
const LOCATOR_MANIFEST: &str = "tiny_face_detector_model-weights_manifest.json";
const REFINER_MANIFEST: &str = "face_landmark_68_tiny_model-weights_manifest.json";
const EXTRACTOR_MANIFEST: &str = "face_recognition_model-weights_manifest.json";

/// One of the three sub-capabilities in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Locator,
    Landmarks,
    Descriptor,
}

impl CapabilityKind {
    pub fn manifest_name(self) -> &'static str {
        match self {
            Self::Locator => LOCATOR_MANIFEST,
            Self::Landmarks => REFINER_MANIFEST,
            Self::Descriptor => EXTRACTOR_MANIFEST,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Locator => "face locator",
            Self::Landmarks => "landmark refiner",
            Self::Descriptor => "descriptor extractor",
        };
        f.write_str(name)
    }
}

/// Where the capability bundle lives (a URL prefix or a directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    base: String,
}

impl ModelSource {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Location of the weights manifest for `kind`.
    pub fn manifest_location(&self, kind: CapabilityKind) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), kind.manifest_name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelLoadError {
    #[error("failed to load {kind}: {cause}")]
    Capability { kind: CapabilityKind, cause: String },
    #[error("model load cancelled")]
    Cancelled,
}

/// Constructs the concrete capabilities. Implemented by the inference backend.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn load_locator(&self, source: &ModelSource) -> Result<Arc<dyn FaceLocator>, String>;
    async fn load_refiner(&self, source: &ModelSource)
        -> Result<Arc<dyn LandmarkRefiner>, String>;
    async fn load_extractor(
        &self,
        source: &ModelSource,
    ) -> Result<Arc<dyn DescriptorExtractor>, String>;
}

/// The loaded capabilities. Cheap to clone.
#[derive(Clone)]
pub struct CapabilityBundle {
    pub locator: Arc<dyn FaceLocator>,
    pub refiner: Arc<dyn LandmarkRefiner>,
    pub extractor: Arc<dyn DescriptorExtractor>,
}

impl fmt::Debug for CapabilityBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBundle").finish_non_exhaustive()
    }
}

/// Readiness signal observed by the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

enum LoadState {
    NotStarted,
    Ready(CapabilityBundle),
    Failed(ModelLoadError),
}

/// Loads the bundle once. Failures are terminal for the loader's lifetime.
pub struct ModelLoader {
    provider: Arc<dyn CapabilityProvider>,
    source: ModelSource,
    state: LoadState,
    readiness: watch::Sender<Readiness>,
}

impl ModelLoader {
    pub fn new(provider: Arc<dyn CapabilityProvider>, source: ModelSource) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            provider,
            source,
            state: LoadState::NotStarted,
            readiness,
        }
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.readiness.subscribe()
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    /// Load all three capabilities. A no-op after success; after a failure
    /// the same error is returned without touching the provider again.
    pub async fn load(&mut self) -> Result<CapabilityBundle, ModelLoadError> {
        match &self.state {
            LoadState::Ready(bundle) => return Ok(bundle.clone()),
            LoadState::Failed(err) => return Err(err.clone()),
            LoadState::NotStarted => {}
        }

        match self.load_all().await {
            Ok(bundle) => {
                tracing::info!(base = self.source.base(), "capability bundle ready");
                self.state = LoadState::Ready(bundle.clone());
                self.readiness.send_replace(Readiness::Ready);
                Ok(bundle)
            }
            Err(err) => {
                tracing::error!(base = self.source.base(), error = %err, "capability load failed");
                self.state = LoadState::Failed(err.clone());
                self.readiness.send_replace(Readiness::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn load_all(&self) -> Result<CapabilityBundle, ModelLoadError> {
        let fail = |kind: CapabilityKind| move |cause: String| ModelLoadError::Capability { kind, cause };

        let locator = self
            .provider
            .load_locator(&self.source)
            .await
            .map_err(fail(CapabilityKind::Locator))?;
        tracing::debug!(manifest = %self.source.manifest_location(CapabilityKind::Locator), "face locator loaded");

        let refiner = self
            .provider
            .load_refiner(&self.source)
            .await
            .map_err(fail(CapabilityKind::Landmarks))?;
        tracing::debug!(manifest = %self.source.manifest_location(CapabilityKind::Landmarks), "landmark refiner loaded");

        let extractor = self
            .provider
            .load_extractor(&self.source)
            .await
            .map_err(fail(CapabilityKind::Descriptor))?;
        tracing::debug!(manifest = %self.source.manifest_location(CapabilityKind::Descriptor), "descriptor extractor loaded");

        Ok(CapabilityBundle {
            locator,
            refiner,
            extractor,
        })
    }
}
