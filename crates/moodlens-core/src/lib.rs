//! moodlens-core — face-region emotion inference.
//!
//! Locates the dominant face with a strict-then-relaxed SCRFD cascade and
//! classifies its expression with a FER-style CNN, both running via ONNX
//! Runtime for CPU inference.

pub mod classifier;
pub mod composer;
pub mod decoder;
pub mod detector;
pub mod locator;
pub mod models;
pub mod patch;
pub mod pipeline;
pub mod selector;
pub mod types;

pub use classifier::{Classification, ClassifierError, EmotionClassifier, OnnxEmotionClassifier};
pub use decoder::{decode_base64_payload, DecodeError, RawImage};
pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use locator::{CascadeTier, FaceLocator, TierConfigError, TierSet};
pub use models::{default_model_dir, ModelPaths, ModelState};
pub use patch::{FacePatch, PatchGeometry, PatchLayout};
pub use pipeline::{EmotionPipeline, PipelineConfig, PipelineError};
pub use types::{EmotionLabel, FaceRegion, InferenceResult, Outcome, ProbabilityVector};
