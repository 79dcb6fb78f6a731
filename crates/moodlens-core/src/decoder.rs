//! Image decoding: raw uploads and base64 payloads into RGB frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Unsupported(#[from] image::ImageError),
}

/// Opaque image bytes as received, before any decoding.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, content_type: None }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decode raw bytes into an RGB pixel grid. The format is sniffed from the
/// bytes; the declared content type is informational only.
pub fn decode(raw: &RawImage) -> Result<RgbImage, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }

    let frame = image::load_from_memory(&raw.bytes)?.to_rgb8();
    if frame.width() == 0 || frame.height() == 0 {
        return Err(DecodeError::Empty);
    }

    tracing::debug!(
        width = frame.width(),
        height = frame.height(),
        bytes = raw.bytes.len(),
        content_type = raw.content_type.as_deref(),
        "decoded frame"
    );
    Ok(frame)
}

/// Decode a base64 payload, accepting an optional `data:image/...;base64,` prefix.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = payload.trim();
    let body = match trimmed.find("base64,") {
        Some(pos) => &trimmed[pos + "base64,".len()..],
        None => trimmed,
    };
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = STANDARD.decode(body.as_bytes())?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(bytes)
}
