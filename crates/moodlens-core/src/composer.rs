use crate::classifier::Classification;
use crate::types::{FaceRegion, InferenceResult, Outcome};
use chrono::Utc;

/// Result for a frame in which no tier located a face.
pub fn compose_no_face() -> InferenceResult {
    InferenceResult {
        outcome: Outcome::NoFace,
        confidence: 0.0,
        region: None,
        probabilities: None,
        timestamp: Utc::now(),
    }
}

/// Result for a located and classified face. Scores are clamped into [0, 1]
/// and the confidence is the clamped maximum, so the two always agree. The
/// timestamp is taken here, after all upstream work has finished.
pub fn compose_classified(
    classification: Classification,
    region: FaceRegion,
    report_probabilities: bool,
) -> InferenceResult {
    let probabilities = classification.probabilities.clamped();
    InferenceResult {
        outcome: Outcome::Emotion(classification.label),
        confidence: probabilities.get(classification.label),
        region: Some(region),
        probabilities: report_probabilities.then_some(probabilities),
        timestamp: Utc::now(),
    }
}
