use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Axis-aligned face bounding box in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Bounding-box area, widened so large frames cannot overflow.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clamp the region so it lies entirely inside a `frame_width` × `frame_height` grid.
    ///
    /// Returns `None` when nothing of the region remains inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<Self> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { x: self.x, y: self.y, width, height })
    }

    /// Build a clamped region from floating-point corner coordinates.
    pub fn from_corners(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x1 = x1.max(0.0).min(fw).floor();
        let y1 = y1.max(0.0).min(fh).floor();
        let x2 = x2.max(0.0).min(fw).ceil();
        let y2 = y2.max(0.0).min(fh).ceil();
        if !(x2 > x1 && y2 > y1) {
            return None;
        }
        Self::new(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32)
            .clamp_to(frame_width, frame_height)
    }

    /// Map a region from a resized frame back onto the original frame.
    pub fn rescale(
        &self,
        from: (u32, u32),
        to: (u32, u32),
    ) -> Option<Self> {
        let sx = to.0 as f32 / from.0.max(1) as f32;
        let sy = to.1 as f32 / from.1.max(1) as f32;
        let x1 = self.x as f32 * sx;
        let y1 = self.y as f32 * sy;
        let x2 = (self.x + self.width) as f32 * sx;
        let y2 = (self.y + self.height) as f32 * sy;
        Self::from_corners(x1.round(), y1.round(), x2.round(), y2.round(), to.0, to.1)
    }
}

/// The classifier's closed label set, in output-vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Scared,
    Happy,
    Sad,
    Surprised,
    Neutral,
}

impl EmotionLabel {
    /// Labels in the exact order of the classifier's output vector.
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Scared,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprised,
        EmotionLabel::Neutral,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Scared => "scared",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Surprised => "surprised",
            EmotionLabel::Neutral => "neutral",
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-label scores, positionally aligned with [`EmotionLabel::ALL`].
///
/// Values come straight from the classifier and are not renormalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector {
    values: [f32; EmotionLabel::COUNT],
}

impl ProbabilityVector {
    /// Accept a raw classifier output. Returns `None` when the length does
    /// not match the label set.
    pub fn from_slice(raw: &[f32]) -> Option<Self> {
        let values: [f32; EmotionLabel::COUNT] = raw.try_into().ok()?;
        Some(Self { values })
    }

    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.values[label.index()]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Copy with every score clamped into [0, 1].
    pub fn clamped(&self) -> Self {
        Self {
            values: self.values.map(|v| v.clamp(0.0, 1.0)),
        }
    }

    /// Index and value of the highest score. The first maximum wins ties and
    /// NaN never wins.
    pub fn argmax(&self) -> (EmotionLabel, f32) {
        let mut best = 0usize;
        for (i, &v) in self.values.iter().enumerate().skip(1) {
            let current = self.values[best];
            if v > current || (current.is_nan() && !v.is_nan()) {
                best = i;
            }
        }
        (EmotionLabel::ALL[best], self.values[best])
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f32)> + '_ {
        EmotionLabel::ALL.iter().copied().zip(self.values.iter().copied())
    }
}

impl Serialize for ProbabilityVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(EmotionLabel::COUNT))?;
        for (label, value) in self.iter() {
            map.serialize_entry(label.as_str(), &value)?;
        }
        map.end()
    }
}

/// Label reported for a call: either a classified emotion or no face at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Emotion(EmotionLabel),
    NoFace,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Emotion(label) => label.as_str(),
            Outcome::NoFace => "no_face",
        }
    }

    pub fn emotion(&self) -> Option<EmotionLabel> {
        match self {
            Outcome::Emotion(label) => Some(*label),
            Outcome::NoFace => None,
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final, immutable result of one pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    #[serde(rename = "emotion")]
    pub outcome: Outcome,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<FaceRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<ProbabilityVector>,
    pub timestamp: DateTime<Utc>,
}

impl InferenceResult {
    pub fn is_no_face(&self) -> bool {
        self.outcome == Outcome::NoFace
    }
}
