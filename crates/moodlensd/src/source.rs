//! Image source resolution shared by every detection route.

use moodlens_core::{decode_base64_payload, PipelineError, RawImage};
use serde::Deserialize;

/// Multipart field names tried for the upload, in priority order.
pub const UPLOAD_FIELDS: [&str; 2] = ["image", "file"];
pub const IDENTITY_FIELD: &str = "identity_id";

/// One received multipart part.
#[derive(Debug, Clone)]
pub struct UploadField {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// JSON request form: a base64 image (data-URL prefix allowed).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonImageRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub identity_id: Option<String>,
}

/// The request body as the transport received it.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Multipart(Vec<UploadField>),
    Json(JsonImageRequest),
    Raw {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

/// Image bytes plus the identity the caller attached, if any.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub image: RawImage,
    pub identity_id: Option<String>,
}

/// Pick the image out of a request body.
///
/// Multipart uploads win first (`image`, then `file`; first non-empty part),
/// then a JSON base64 `image`, then a raw body declared as `image/*`.
/// Nothing usable is [`PipelineError::NoImageData`]; malformed base64 is a
/// decode error.
pub fn resolve_image_source(body: RequestBody) -> Result<ResolvedSource, PipelineError> {
    match body {
        RequestBody::Multipart(fields) => {
            let identity_id = fields
                .iter()
                .find(|f| f.name == IDENTITY_FIELD)
                .and_then(|f| non_empty(String::from_utf8_lossy(&f.data).into_owned()));

            let upload = UPLOAD_FIELDS
                .iter()
                .find_map(|name| fields.iter().find(|f| f.name == *name && !f.data.is_empty()))
                .ok_or(PipelineError::NoImageData)?;

            let mut image = RawImage::new(upload.data.clone());
            if let Some(ct) = &upload.content_type {
                image = image.with_content_type(ct.clone());
            }
            Ok(ResolvedSource { image, identity_id })
        }
        RequestBody::Json(req) => {
            let payload = req
                .image
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or(PipelineError::NoImageData)?;
            let bytes = decode_base64_payload(payload)?;
            if bytes.is_empty() {
                return Err(PipelineError::NoImageData);
            }
            Ok(ResolvedSource {
                image: RawImage::new(bytes),
                identity_id: req.identity_id.and_then(non_empty),
            })
        }
        RequestBody::Raw { content_type, bytes } => {
            let is_image = content_type
                .as_deref()
                .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"));
            if !is_image || bytes.is_empty() {
                return Err(PipelineError::NoImageData);
            }
            let mut image = RawImage::new(bytes);
            if let Some(ct) = content_type {
                image = image.with_content_type(ct);
            }
            Ok(ResolvedSource { image, identity_id: None })
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
