//! End-to-end inference: decode → locate → select → normalize → classify → compose.

use crate::classifier::{classify, ClassifierError, EmotionClassifier};
use crate::composer::{compose_classified, compose_no_face};
use crate::decoder::{decode, DecodeError, RawImage};
use crate::detector::DetectorError;
use crate::locator::{FaceLocator, TierSet, DEFAULT_WORKING_WIDTH};
use crate::models::ModelState;
use crate::patch::{normalize, PatchError, PatchGeometry};
use crate::selector::select_dominant;
use crate::types::InferenceResult;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no image data found in request")]
    NoImageData,
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("emotion classifier unavailable: {0}")]
    ClassifierUnavailable(String),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
}

/// Tunables for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tiers: TierSet,
    pub working_width: u32,
    pub patch: PatchGeometry,
    pub report_probabilities: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiers: TierSet::default(),
            working_width: DEFAULT_WORKING_WIDTH,
            patch: PatchGeometry::default(),
            report_probabilities: true,
        }
    }
}

enum Stage {
    Ready {
        locator: FaceLocator,
        classifier: Arc<dyn EmotionClassifier>,
    },
    Unavailable(String),
}

/// The face-region emotion pipeline. Stateless between calls and safe to
/// share behind an `Arc`.
pub struct EmotionPipeline {
    stage: Stage,
    patch: PatchGeometry,
    report_probabilities: bool,
}

impl EmotionPipeline {
    pub fn new(models: ModelState, config: PipelineConfig) -> Self {
        let stage = match models {
            ModelState::Ready { detector, classifier } => Stage::Ready {
                locator: FaceLocator::new(detector, config.tiers, config.working_width),
                classifier,
            },
            ModelState::Unavailable { reason } => Stage::Unavailable(reason),
        };
        Self {
            stage,
            patch: config.patch,
            report_probabilities: config.report_probabilities,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.stage, Stage::Ready { .. })
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.stage {
            Stage::Ready { .. } => None,
            Stage::Unavailable(reason) => Some(reason),
        }
    }

    /// Run one still image through the pipeline.
    ///
    /// "No face located" is an `Ok` result labelled `no_face`.
    pub fn run(&self, raw: &RawImage) -> Result<InferenceResult, PipelineError> {
        let frame = decode(raw)?;

        let (locator, classifier) = match &self.stage {
            Stage::Ready { locator, classifier } => (locator, classifier),
            Stage::Unavailable(reason) => {
                return Err(PipelineError::ClassifierUnavailable(reason.clone()));
            }
        };

        let located = locator.locate(&frame)?;
        let Some(region) = select_dominant(&located.regions) else {
            tracing::info!("no face located at any tier");
            return Ok(compose_no_face());
        };

        let patch = normalize(&located.gray, &region, self.patch)?;
        let classification = classify(classifier.as_ref(), &patch)?;

        // Report the region in the caller's coordinates, not the working frame's.
        let reported = region
            .rescale(located.gray.dimensions(), frame.dimensions())
            .unwrap_or(region);

        tracing::info!(
            emotion = classification.label.as_str(),
            confidence = classification.confidence,
            tier = located.tier.map(|t| t.as_str()),
            candidates = located.regions.len(),
            "face classified"
        );

        Ok(compose_classified(classification, reported, self.report_probabilities))
    }
}
