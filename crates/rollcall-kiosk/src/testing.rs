//! Fakes for the kiosk unit tests: capabilities, frames, camera, backend.

use async_trait::async_trait;
use rollcall_core::detector::{DescriptorExtractor, DetectorError, FaceLocator, LandmarkRefiner};
use rollcall_core::types::DESCRIPTOR_LEN;
use rollcall_core::{
    AttendanceMarker, BoundingBox, CapabilityBundle, CapabilityProvider, DetectorOptions,
    FacialDescriptor, IdentificationResult, Identifier, Landmarks, ModelSource,
};
use rollcall_hw::{CameraError, Facing, Frame, FrameSource, StreamInfo, VideoBackend, VideoDevice};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn bbox(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width: size,
        height: size,
        confidence,
    }
}

fn gray_frame(seq: u32) -> Frame {
    Frame::new(vec![120; 16], 4, 4, seq).unwrap()
}

pub struct FakeLocator(pub Vec<BoundingBox>);

impl FaceLocator for FakeLocator {
    fn locate(&self, _: &[u8], _: u32, _: u32, _: &DetectorOptions) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.0.clone())
    }
}

pub struct FakeRefiner;

impl LandmarkRefiner for FakeRefiner {
    fn refine(&self, _: &[u8], _: u32, _: u32, face: &BoundingBox) -> Result<Landmarks, DetectorError> {
        Ok(Landmarks {
            points: vec![(face.x, face.y)],
        })
    }
}

/// Returns `len` values and remembers which face it was asked about.
pub struct FakeExtractor {
    len: usize,
    last: Mutex<Option<BoundingBox>>,
}

impl FakeExtractor {
    pub fn valid() -> Self {
        Self::with_len(DESCRIPTOR_LEN)
    }

    pub fn with_len(len: usize) -> Self {
        Self {
            len,
            last: Mutex::new(None),
        }
    }

    pub fn last_face(&self) -> Option<BoundingBox> {
        self.last.lock().unwrap().clone()
    }
}

impl DescriptorExtractor for FakeExtractor {
    fn extract(&self, _: &[u8], _: u32, _: u32, face: &BoundingBox, _: &Landmarks) -> Result<Vec<f32>, DetectorError> {
        *self.last.lock().unwrap() = Some(face.clone());
        Ok(vec![0.05; self.len])
    }
}

pub fn bundle(faces: Vec<BoundingBox>, extractor: Arc<FakeExtractor>) -> CapabilityBundle {
    CapabilityBundle {
        locator: Arc::new(FakeLocator(faces)),
        refiner: Arc::new(FakeRefiner),
        extractor,
    }
}

/// Frame source with optional latency and failure.
#[derive(Default)]
pub struct FakeFrames {
    pub delay: Option<Duration>,
    pub fail: bool,
    pub grabs: AtomicUsize,
}

impl FakeFrames {
    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn next_frame(&self) -> Result<Frame, CameraError> {
        let seq = self.grabs.fetch_add(1, Ordering::SeqCst) as u32;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(CameraError::NotStarted);
        }
        Ok(gray_frame(seq))
    }
}

/// Provider handing out one face at a fixed position, optionally after a delay.
pub struct FakeProvider {
    pub fail: bool,
    pub delay: Option<Duration>,
    pub faces: Vec<BoundingBox>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            fail: false,
            delay: None,
            faces: vec![bbox(8.0, 8.0, 48.0, 0.9)],
        }
    }
}

#[async_trait]
impl CapabilityProvider for FakeProvider {
    async fn load_locator(&self, _: &ModelSource) -> Result<Arc<dyn FaceLocator>, String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err("HTTP 404 fetching weights manifest".into());
        }
        Ok(Arc::new(FakeLocator(self.faces.clone())))
    }

    async fn load_refiner(&self, _: &ModelSource) -> Result<Arc<dyn LandmarkRefiner>, String> {
        Ok(Arc::new(FakeRefiner))
    }

    async fn load_extractor(&self, _: &ModelSource) -> Result<Arc<dyn DescriptorExtractor>, String> {
        Ok(Arc::new(FakeExtractor::valid()))
    }
}

#[derive(Default)]
pub struct CameraCounters {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub grabs: AtomicUsize,
}

struct FakeDevice {
    counters: Arc<CameraCounters>,
}

impl VideoDevice for FakeDevice {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            device: "fake0".into(),
            width: 4,
            height: 4,
            format: "GREY".into(),
        }
    }

    fn grab(&mut self) -> Result<Frame, CameraError> {
        let seq = self.counters.grabs.fetch_add(1, Ordering::SeqCst) as u32;
        Ok(gray_frame(seq))
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend that grants access or fails with a fixed error.
pub struct FakeBackend {
    pub refuse: Option<CameraError>,
    pub counters: Arc<CameraCounters>,
}

impl FakeBackend {
    pub fn granting() -> Self {
        Self {
            refuse: None,
            counters: Arc::default(),
        }
    }

    pub fn refusing(err: CameraError) -> Self {
        Self {
            refuse: Some(err),
            counters: Arc::default(),
        }
    }
}

#[async_trait]
impl VideoBackend for FakeBackend {
    async fn acquire(&self, _: Facing) -> Result<Box<dyn VideoDevice>, CameraError> {
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            counters: self.counters.clone(),
        }))
    }
}

/// Identifier answering with a fixed result after an optional delay.
pub struct FakeIdentifier {
    pub result: IdentificationResult,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeIdentifier {
    pub fn answering(result: IdentificationResult) -> Self {
        Self {
            result,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Identifier for FakeIdentifier {
    async fn identify(&self, descriptor: &FacialDescriptor) -> IdentificationResult {
        assert_eq!(descriptor.len(), DESCRIPTOR_LEN);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

#[derive(Default)]
pub struct FakeMarker {
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeMarker {
    pub fn marked(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttendanceMarker for FakeMarker {
    async fn mark_present(&self, student_id: &str) -> Result<(), String> {
        self.calls.lock().unwrap().push(student_id.to_string());
        if self.fail {
            Err("request failed with status code 500".into())
        } else {
            Ok(())
        }
    }
}
