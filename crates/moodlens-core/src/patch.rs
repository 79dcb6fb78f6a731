//! Face patch normalization: crop, resize, rescale into the classifier batch.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PATCH_SIZE: u32 = 64;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("face region {0:?} lies outside the {1}x{2} frame")]
    EmptyRegion(FaceRegion, u32, u32),
}

/// Memory layout of the one-sample batch handed to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchLayout {
    /// `[1, H, W, 1]`, as Keras-exported models expect.
    #[default]
    Nhwc,
    /// `[1, 1, H, W]`
    Nchw,
}

impl FromStr for PatchLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nhwc" => Ok(PatchLayout::Nhwc),
            "nchw" => Ok(PatchLayout::Nchw),
            other => Err(format!("unknown patch layout: {other}")),
        }
    }
}

/// Classifier input geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGeometry {
    pub size: u32,
    pub layout: PatchLayout,
}

impl Default for PatchGeometry {
    fn default() -> Self {
        Self { size: DEFAULT_PATCH_SIZE, layout: PatchLayout::Nhwc }
    }
}

/// A normalized single-face sample with values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct FacePatch {
    pub tensor: Array4<f32>,
    pub layout: PatchLayout,
}

impl FacePatch {
    /// Value at patch pixel (x, y), independent of layout.
    pub fn at(&self, x: usize, y: usize) -> f32 {
        match self.layout {
            PatchLayout::Nhwc => self.tensor[[0, y, x, 0]],
            PatchLayout::Nchw => self.tensor[[0, 0, y, x]],
        }
    }
}

/// Crop `gray` to `region`, resize to the patch geometry and scale to `[0, 1]`.
pub fn normalize(gray: &GrayImage, region: &FaceRegion, geometry: PatchGeometry) -> Result<FacePatch, PatchError> {
    let (fw, fh) = gray.dimensions();
    let region = region
        .clamp_to(fw, fh)
        .ok_or(PatchError::EmptyRegion(*region, fw, fh))?;

    let crop = imageops::crop_imm(gray, region.x, region.y, region.width, region.height).to_image();
    let size = geometry.size.max(1);
    let resized = imageops::resize(&crop, size, size, FilterType::Triangle);

    let s = size as usize;
    let mut tensor = match geometry.layout {
        PatchLayout::Nhwc => Array4::<f32>::zeros((1, s, s, 1)),
        PatchLayout::Nchw => Array4::<f32>::zeros((1, 1, s, s)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = pixel[0] as f32 / 255.0;
        let (x, y) = (x as usize, y as usize);
        match geometry.layout {
            PatchLayout::Nhwc => tensor[[0, y, x, 0]] = value,
            PatchLayout::Nchw => tensor[[0, 0, y, x]] = value,
        }
    }

    Ok(FacePatch { tensor, layout: geometry.layout })
}
