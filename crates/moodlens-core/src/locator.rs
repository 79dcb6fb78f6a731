//! Face location with a strict-then-relaxed detection cascade.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_WORKING_WIDTH: u32 = 300;
/// Working height is capped at this multiple of the working width.
pub const MAX_WORKING_ASPECT: u32 = 4;

/// One detection attempt's parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CascadeTier {
    /// Pyramid step between scales; backends without a pyramid ignore it.
    pub scale_factor: f32,
    /// Overlapping candidates required to keep a detection.
    pub min_neighbors: u32,
    /// Smallest accepted (width, height) in working-frame pixels.
    pub min_size: (u32, u32),
    /// Score threshold for backends that produce per-candidate scores.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_min_score() -> f32 {
    0.5
}

impl CascadeTier {
    /// Low false-positive tier, tried first.
    pub fn strict() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 4,
            min_size: (30, 30),
            min_score: 0.5,
        }
    }

    /// Higher-recall tier, tried only when the strict tier finds nothing.
    pub fn relaxed() -> Self {
        Self {
            scale_factor: 1.05,
            min_neighbors: 1,
            min_size: (20, 20),
            min_score: 0.35,
        }
    }

    fn validate(&self, name: &str) -> Result<(), TierConfigError> {
        if !(self.scale_factor > 1.0) {
            return Err(TierConfigError::Invalid(format!(
                "{name}: scale_factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(TierConfigError::Invalid(format!(
                "{name}: min_score must be within [0, 1], got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TierConfigError {
    #[error("failed to read tier file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse tier file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid tier: {0}")]
    Invalid(String),
}

/// The ordered pair of tiers the locator walks through.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TierSet {
    pub strict: CascadeTier,
    pub relaxed: CascadeTier,
}

impl Default for TierSet {
    fn default() -> Self {
        Self {
            strict: CascadeTier::strict(),
            relaxed: CascadeTier::relaxed(),
        }
    }
}

impl TierSet {
    /// Parse a TOML document with `[strict]` and `[relaxed]` tables.
    pub fn from_toml_str(src: &str) -> Result<Self, TierConfigError> {
        let tiers: TierSet = toml::from_str(src)?;
        tiers.strict.validate("strict")?;
        tiers.relaxed.validate("relaxed")?;
        Ok(tiers)
    }

    pub fn load(path: &Path) -> Result<Self, TierConfigError> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
    }
}

/// Which tier produced the located regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Strict,
    Relaxed,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Strict => "strict",
            TierKind::Relaxed => "relaxed",
        }
    }
}

/// Result of one locator run over a frame.
#[derive(Debug)]
pub struct Located {
    /// Grayscale working frame the regions refer to.
    pub gray: GrayImage,
    /// Regions from the first tier that found anything, in detector order.
    pub regions: Vec<FaceRegion>,
    /// `None` when every tier came back empty.
    pub tier: Option<TierKind>,
}

/// Resizes, converts to grayscale, then walks the tiers until one finds a face.
pub struct FaceLocator {
    detector: Arc<dyn FaceDetector>,
    tiers: TierSet,
    working_width: u32,
}

impl FaceLocator {
    pub fn new(detector: Arc<dyn FaceDetector>, tiers: TierSet, working_width: u32) -> Self {
        Self {
            detector,
            tiers,
            working_width: working_width.max(1),
        }
    }

    pub fn working_width(&self) -> u32 {
        self.working_width
    }

    pub fn locate(&self, frame: &RgbImage) -> Result<Located, DetectorError> {
        let working = resize_to_width(frame, self.working_width);
        let gray = imageops::grayscale(&working);
        let (w, h) = gray.dimensions();

        for (kind, tier) in [
            (TierKind::Strict, &self.tiers.strict),
            (TierKind::Relaxed, &self.tiers.relaxed),
        ] {
            let regions: Vec<FaceRegion> = self
                .detector
                .detect(&gray, tier)?
                .into_iter()
                .filter_map(|r| r.clamp_to(w, h))
                .collect();

            if !regions.is_empty() {
                tracing::debug!(tier = kind.as_str(), count = regions.len(), "faces located");
                return Ok(Located { gray, regions, tier: Some(kind) });
            }
            tracing::debug!(tier = kind.as_str(), "no faces at tier");
        }

        Ok(Located { gray, regions: Vec::new(), tier: None })
    }
}

/// Resize into a `width` × `MAX_WORKING_ASPECT * width` box keeping the aspect
/// ratio. Width is `width` unless the frame is taller than the box allows;
/// both sides are at least one pixel.
pub fn resize_to_width(frame: &RgbImage, width: u32) -> RgbImage {
    let (w, h) = frame.dimensions();
    let max_height = width.saturating_mul(MAX_WORKING_ASPECT);
    let scale = (width as f64 / w as f64).min(max_height as f64 / h as f64);
    let out_w = ((w as f64 * scale).round() as u32).clamp(1, width);
    let out_h = ((h as f64 * scale).round() as u32).clamp(1, max_height);
    if (out_w, out_h) == (w, h) {
        return frame.clone();
    }
    imageops::resize(frame, out_w, out_h, FilterType::Triangle)
}
