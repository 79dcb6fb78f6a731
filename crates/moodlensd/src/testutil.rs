//! Fakes shared by the daemon's unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use moodlens_core::detector::DetectorError;
use moodlens_core::{
    CascadeTier, ClassifierError, EmotionClassifier, EmotionPipeline, FaceDetector, FacePatch,
    FaceRegion, ModelState, PipelineConfig, ProbabilityVector, RawImage,
};
use moodlens_store::{HistoryEntry, HistoryStore, Identity, IdentityEmotion, StoreError};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Classifier output peaking at `happy` (index 3).
pub const HAPPY: [f32; 7] = [0.02, 0.01, 0.02, 0.85, 0.03, 0.04, 0.03];
/// Classifier output peaking at `disgust`, which has no identity counterpart.
pub const DISGUST: [f32; 7] = [0.05, 0.80, 0.05, 0.02, 0.03, 0.02, 0.03];

/// White PNG of the given size.
pub fn png(w: u32, h: u32) -> RawImage {
    let frame = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));
    let mut buf = Cursor::new(Vec::new());
    frame.write_to(&mut buf, ImageFormat::Png).unwrap();
    RawImage::new(buf.into_inner()).with_content_type("image/png")
}

pub fn pipeline_with(regions: Vec<FaceRegion>, scores: [f32; 7]) -> EmotionPipeline {
    observed_pipeline(regions, scores).0
}

/// Like [`pipeline_with`], but hands back the fakes so call counts can be read.
pub fn observed_pipeline(
    regions: Vec<FaceRegion>,
    scores: [f32; 7],
) -> (EmotionPipeline, Arc<StaticDetector>, Arc<StaticClassifier>) {
    let detector = Arc::new(StaticDetector::new(regions));
    let classifier = Arc::new(StaticClassifier::new(scores));
    let models = ModelState::ready(detector.clone(), classifier.clone());
    (EmotionPipeline::new(models, PipelineConfig::default()), detector, classifier)
}

/// Returns the same regions at every tier.
pub struct StaticDetector {
    regions: Vec<FaceRegion>,
    pub calls: AtomicUsize,
}

impl StaticDetector {
    pub fn new(regions: Vec<FaceRegion>) -> Self {
        Self { regions, calls: AtomicUsize::new(0) }
    }
}

impl FaceDetector for StaticDetector {
    fn detect(&self, _gray: &image::GrayImage, _tier: &CascadeTier) -> Result<Vec<FaceRegion>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.regions.clone())
    }
}

pub struct StaticClassifier {
    scores: [f32; 7],
    pub calls: AtomicUsize,
}

impl StaticClassifier {
    pub fn new(scores: [f32; 7]) -> Self {
        Self { scores, calls: AtomicUsize::new(0) }
    }
}

impl EmotionClassifier for StaticClassifier {
    fn predict(&self, _patch: &FacePatch) -> Result<ProbabilityVector, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ProbabilityVector::from_slice(&self.scores)
            .ok_or(ClassifierError::WrongArity { got: self.scores.len(), expected: 7 })
    }
}

/// Sleeps before answering, to exercise timeouts.
pub struct SlowClassifier {
    delay: Duration,
}

impl SlowClassifier {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl EmotionClassifier for SlowClassifier {
    fn predict(&self, _patch: &FacePatch) -> Result<ProbabilityVector, ClassifierError> {
        std::thread::sleep(self.delay);
        ProbabilityVector::from_slice(&HAPPY).ok_or(ClassifierError::WrongArity { got: 7, expected: 7 })
    }
}

/// A store whose backing database is gone; every operation fails with an I/O error.
pub struct FailingStore {
    pub attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self { attempts: AtomicUsize::new(0) }
    }
}

fn unavailable() -> StoreError {
    StoreError::Io(std::io::Error::other("history database unavailable"))
}

#[async_trait]
impl HistoryStore for FailingStore {
    async fn append_history(
        &self,
        _identity_id: &str,
        _emotion: IdentityEmotion,
        _confidence: f32,
        _timestamp: DateTime<Utc>,
    ) -> Result<HistoryEntry, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(unavailable())
    }

    async fn history(&self, _identity_id: &str, _limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        Err(unavailable())
    }

    async fn get_identity(&self, _identity_id: &str) -> Result<Option<Identity>, StoreError> {
        Err(unavailable())
    }

    async fn create_identity(&self, _name: &str) -> Result<Identity, StoreError> {
        Err(unavailable())
    }
}
