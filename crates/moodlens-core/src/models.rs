//! Process-wide model assets, loaded once during startup.

use crate::classifier::{EmotionClassifier, OnnxEmotionClassifier};
use crate::detector::{FaceDetector, ScrfdDetector};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const CLASSIFIER_MODEL_FILE: &str = "emotion_mini_xception.onnx";

/// Default model directory: `$XDG_DATA_HOME/moodlens/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("moodlens/models")
}

/// Locations of the two model assets.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub classifier: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            classifier: dir.join(CLASSIFIER_MODEL_FILE),
        }
    }
}

/// Either both models are ready, or the reason they never will be.
///
/// The unavailable state is terminal for the life of the process; nothing
/// retries the load.
#[derive(Clone)]
pub enum ModelState {
    Ready {
        detector: Arc<dyn FaceDetector>,
        classifier: Arc<dyn EmotionClassifier>,
    },
    Unavailable {
        reason: String,
    },
}

impl ModelState {
    pub fn ready(detector: Arc<dyn FaceDetector>, classifier: Arc<dyn EmotionClassifier>) -> Self {
        ModelState::Ready { detector, classifier }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        ModelState::Unavailable { reason: reason.into() }
    }

    /// Load both ONNX models. Failure is logged once and captured as
    /// [`ModelState::Unavailable`] rather than returned.
    pub fn load(paths: &ModelPaths, intra_threads: usize) -> Self {
        let detector_path = paths.detector.to_string_lossy();
        let classifier_path = paths.classifier.to_string_lossy();

        let detector = match ScrfdDetector::load(&detector_path, intra_threads) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(path = %detector_path, error = %e, "face detector failed to load");
                return Self::unavailable(format!("face detector: {e}"));
            }
        };

        let classifier = match OnnxEmotionClassifier::load(&classifier_path, intra_threads) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(path = %classifier_path, error = %e, "emotion classifier failed to load");
                return Self::unavailable(format!("emotion classifier: {e}"));
            }
        };

        Self::ready(Arc::new(detector), Arc::new(classifier))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready { .. })
    }
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Ready { .. } => f.write_str("ModelState::Ready"),
            ModelState::Unavailable { reason } => write!(f, "ModelState::Unavailable({reason})"),
        }
    }
}
