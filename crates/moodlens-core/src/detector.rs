//! Face detection backends.
//!
//! [`FaceDetector`] is the seam the locator drives; [`ScrfdDetector`] is the
//! shipped backend, an anchor-free SCRFD model run through ONNX Runtime with
//! 3-stride decoding and NMS post-processing.

use crate::locator::CascadeTier;
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_MIN_OUTPUTS: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the SCRFD model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Candidate-region producer.
///
/// Implementations must be safe to share across concurrent pipeline calls.
pub trait FaceDetector: Send + Sync {
    /// Return candidate face regions in `gray`, in the detector's own order,
    /// using the parameters of one cascade tier.
    fn detect(&self, gray: &GrayImage, tier: &CascadeTier) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// A decoded box in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    score: f32,
}

impl Candidate {
    fn width(&self) -> f32 {
        self.right - self.left
    }

    fn height(&self) -> f32 {
        self.bottom - self.top
    }

    fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    fn overlap(&self, other: &Candidate) -> f32 {
        let w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// How a frame was fitted into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    fitted_w: u32,
    fitted_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let fitted_w = ((width as f32 * scale).round() as u32).clamp(1, side);
        let fitted_h = ((height as f32 * scale).round() as u32).clamp(1, side);
        Self {
            scale,
            offset_x: (side - fitted_w) / 2,
            offset_y: (side - fitted_h) / 2,
            fitted_w,
            fitted_h,
        }
    }

    /// Map a model-input point back onto the source frame.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x as f32) / self.scale, (y - self.offset_y as f32) / self.scale)
    }
}

/// Where one stride's score and box tensors sit among the session outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideHeads {
    stride: u32,
    score: usize,
    bbox: usize,
}

/// Map stride heads by output name (`score_8`, `bbox_16`, ...), falling back
/// to the conventional order: scores for all strides, then boxes.
fn locate_heads(names: &[String]) -> [StrideHeads; 3] {
    let position = |kind: &str, stride: u32| names.iter().position(|n| *n == format!("{kind}_{stride}"));

    let mut heads = [StrideHeads { stride: 0, score: 0, bbox: 0 }; 3];
    let mut named = true;
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (position("score", stride), position("bbox", stride)) {
            (Some(score), Some(bbox)) => heads[slot] = StrideHeads { stride, score, bbox },
            _ => {
                named = false;
                break;
            }
        }
    }
    if named {
        return heads;
    }

    tracing::info!(?names, "SCRFD output names not recognized; assuming positional layout");
    let n = SCRFD_STRIDES.len();
    let mut positional = heads;
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        positional[slot] = StrideHeads { stride, score: slot, bbox: slot + n };
    }
    positional
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    heads: [StrideHeads; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        // Keypoint heads, when exported, are ignored.
        if names.len() < SCRFD_MIN_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox heads for 3 strides ({SCRFD_MIN_OUTPUTS} outputs), got {}",
                names.len()
            )));
        }

        let heads = locate_heads(&names);
        tracing::debug!(?heads, "SCRFD stride heads");

        Ok(Self { session: Mutex::new(session), heads })
    }
}

/// Letterbox `gray` into the square model input, normalized and replicated
/// across three channels. Padding normalizes to zero.
fn to_input_tensor(gray: &GrayImage, side: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = gray.dimensions();
    let letterbox = Letterbox::fit(width, height, side);
    let fitted = imageops::resize(gray, letterbox.fitted_w, letterbox.fitted_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, side as usize, side as usize));
    for (x, y, pixel) in fitted.enumerate_pixels() {
        let value = (pixel[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = ((x + letterbox.offset_x) as usize, (y + letterbox.offset_y) as usize);
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = value;
        }
    }
    (tensor, letterbox)
}

/// Decode one stride's anchors whose score clears `min_score`.
///
/// Box tensors hold (left, top, right, bottom) distances from the anchor
/// centre in stride units.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    stride: u32,
    side: u32,
    letterbox: &Letterbox,
    min_score: f32,
) -> Vec<Candidate> {
    let columns = (side / stride) as usize;
    let anchors = columns * columns * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    scores
        .iter()
        .take(anchors)
        .enumerate()
        .filter(|(_, &score)| score > min_score)
        .filter_map(|(i, &score)| {
            let d = boxes.get(i * 4..i * 4 + 4)?;
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % columns) as f32 * step;
            let cy = (cell / columns) as f32 * step;
            let (left, top) = letterbox.unmap(cx - d[0] * step, cy - d[1] * step);
            let (right, bottom) = letterbox.unmap(cx + d[2] * step, cy + d[3] * step);
            Some(Candidate { left, top, right, bottom, score })
        })
        .collect()
}

/// Greedy NMS. Each kept box carries the number of candidates it suppressed,
/// which stands in for a cascade's neighbour count.
fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<(Candidate, u32)> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept = Vec::new();
    let mut remaining = candidates;
    while let Some((best, rest)) = remaining.split_first() {
        let best = *best;
        let before = rest.len();
        let survivors: Vec<Candidate> = rest.iter().copied().filter(|c| best.overlap(c) <= iou_threshold).collect();
        kept.push((best, (before - survivors.len()) as u32));
        remaining = survivors;
    }
    kept
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, gray: &GrayImage, tier: &CascadeTier) -> Result<Vec<FaceRegion>, DetectorError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = to_input_tensor(gray, SCRFD_INPUT_SIZE);

        let mut candidates = Vec::new();
        {
            let mut session = self
                .session
                .lock()
                .map_err(|_| DetectorError::InferenceFailed("detector session lock poisoned".into()))?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            for head in &self.heads {
                let (_, scores) = outputs[head.score].try_extract_tensor::<f32>().map_err(|e| {
                    DetectorError::InferenceFailed(format!("score head, stride {}: {e}", head.stride))
                })?;
                let (_, boxes) = outputs[head.bbox].try_extract_tensor::<f32>().map_err(|e| {
                    DetectorError::InferenceFailed(format!("bbox head, stride {}: {e}", head.stride))
                })?;
                candidates.extend(decode_level(
                    scores,
                    boxes,
                    head.stride,
                    SCRFD_INPUT_SIZE,
                    &letterbox,
                    tier.min_score,
                ));
            }
        }

        let raw = candidates.len();
        let (min_w, min_h) = (tier.min_size.0 as f32, tier.min_size.1 as f32);
        let regions: Vec<FaceRegion> = suppress(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter(|(c, support)| *support >= tier.min_neighbors && c.width() >= min_w && c.height() >= min_h)
            .filter_map(|(c, _)| FaceRegion::from_corners(c.left, c.top, c.right, c.bottom, width, height))
            .collect();

        tracing::debug!(
            raw,
            kept = regions.len(),
            min_neighbors = tier.min_neighbors,
            min_score = tier.min_score,
            "SCRFD detection pass"
        );
        Ok(regions)
    }
}
