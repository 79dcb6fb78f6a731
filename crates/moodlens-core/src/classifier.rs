//! Emotion classification via ONNX Runtime.
//!
//! Runs a FER-style CNN over a 64x64 grayscale face patch and returns one
//! score per [`EmotionLabel`], positionally aligned with [`EmotionLabel::ALL`].

use crate::patch::FacePatch;
use crate::types::{EmotionLabel, ProbabilityVector};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} — place the emotion model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("classifier returned {got} scores, expected {expected}")]
    WrongArity { got: usize, expected: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Patch-to-scores capability. Implementations must tolerate concurrent callers.
pub trait EmotionClassifier: Send + Sync {
    fn predict(&self, patch: &FacePatch) -> Result<ProbabilityVector, ClassifierError>;
}

/// Label and confidence derived from one classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: EmotionLabel,
    pub confidence: f32,
    pub probabilities: ProbabilityVector,
}

/// Invoke the classifier exactly once and take the arg-max. Scores that are
/// NaN or infinite fail the call.
pub fn classify(classifier: &dyn EmotionClassifier, patch: &FacePatch) -> Result<Classification, ClassifierError> {
    let probabilities = classifier.predict(patch)?;
    if !probabilities.is_finite() {
        return Err(ClassifierError::InferenceFailed(format!(
            "non-finite scores: {:?}",
            probabilities.as_slice()
        )));
    }
    let (label, confidence) = probabilities.argmax();
    Ok(Classification { label, confidence, probabilities })
}

/// ONNX-backed emotion classifier.
pub struct OnnxEmotionClassifier {
    session: Mutex<Session>,
}

impl OnnxEmotionClassifier {
    /// Load the emotion model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded emotion model"
        );

        Ok(Self { session: Mutex::new(session) })
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn predict(&self, patch: &FacePatch) -> Result<ProbabilityVector, ClassifierError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::InferenceFailed("classifier session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(patch.tensor.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("emotion scores: {e}")))?;

        tracing::trace!(scores = ?raw, "emotion model raw output");

        ProbabilityVector::from_slice(raw).ok_or(ClassifierError::WrongArity {
            got: raw.len(),
            expected: EmotionLabel::COUNT,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::patch::{normalize, PatchGeometry};
    use crate::types::FaceRegion;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Classifier that returns a fixed vector and counts invocations.
    pub(crate) struct FixedClassifier {
        pub scores: Vec<f32>,
        pub calls: AtomicUsize,
    }

    impl FixedClassifier {
        pub(crate) fn new(scores: Vec<f32>) -> Self {
            Self { scores, calls: AtomicUsize::new(0) }
        }
    }

    impl EmotionClassifier for FixedClassifier {
        fn predict(&self, _patch: &FacePatch) -> Result<ProbabilityVector, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ProbabilityVector::from_slice(&self.scores).ok_or(ClassifierError::WrongArity {
                got: self.scores.len(),
                expected: EmotionLabel::COUNT,
            })
        }
    }

    fn patch() -> FacePatch {
        let gray = GrayImage::from_pixel(64, 64, Luma([90]));
        normalize(&gray, &FaceRegion::new(0, 0, 64, 64), PatchGeometry::default()).unwrap()
    }

    #[test]
    fn test_classify_takes_argmax() {
        let clf = FixedClassifier::new(vec![0.05, 0.0, 0.05, 0.7, 0.1, 0.05, 0.05]);
        let c = classify(&clf, &patch()).unwrap();
        assert_eq!(c.label, EmotionLabel::Happy);
        assert!((c.confidence - 0.7).abs() < 1e-6);
        assert_eq!(c.confidence, c.probabilities.get(c.label));
        assert_eq!(clf.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_classify_confidence_is_max() {
        let clf = FixedClassifier::new(vec![0.2, 0.1, 0.05, 0.05, 0.05, 0.05, 0.5]);
        let c = classify(&clf, &patch()).unwrap();
        let max = c.probabilities.as_slice().iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(c.confidence, max);
        assert_eq!(c.label, EmotionLabel::Neutral);
    }

    #[test]
    fn test_classify_wrong_arity() {
        let clf = FixedClassifier::new(vec![0.1; 8]);
        let err = classify(&clf, &patch()).unwrap_err();
        assert!(matches!(err, ClassifierError::WrongArity { got: 8, expected: 7 }));
    }

    #[test]
    fn test_classify_rejects_nan_scores() {
        let clf = FixedClassifier::new(vec![f32::NAN; 7]);
        let err = classify(&clf, &patch()).unwrap_err();
        assert!(matches!(err, ClassifierError::InferenceFailed(_)));
        assert_eq!(clf.calls.load(Ordering::SeqCst), 1);

        let clf = FixedClassifier::new(vec![0.1, 0.1, f32::INFINITY, 0.1, 0.1, 0.1, 0.1]);
        assert!(matches!(classify(&clf, &patch()), Err(ClassifierError::InferenceFailed(_))));
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmotionClassifier::load("/nonexistent/emotion.onnx", 1).err().unwrap();
        assert!(matches!(err, ClassifierError::ModelNotFound(_)));
    }
}
