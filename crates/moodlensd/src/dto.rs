//! Wire types for the HTTP API.

use moodlens_core::InferenceResult;
use moodlens_store::{HistoryEntry, Identity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    #[serde(flatten)]
    pub result: InferenceResult,
    /// Present only when the request named an identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_updated: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateIdentityRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub identity: Identity,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub models_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_unavailable_reason: Option<String>,
    pub engine_workers: usize,
    pub history_store: bool,
    pub uptime_secs: u64,
}
