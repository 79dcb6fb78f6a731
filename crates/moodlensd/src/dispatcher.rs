//! Best-effort emotion history writes after identity-scoped detections.

use moodlens_core::InferenceResult;
use moodlens_store::{HistoryStore, IdentityEmotion};
use std::sync::Arc;

/// Appends detection outcomes to identity histories. Never fails the caller.
#[derive(Clone)]
pub struct HistoryDispatcher {
    store: Option<Arc<dyn HistoryStore>>,
}

impl HistoryDispatcher {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A dispatcher with no backing store; every dispatch reports `false`.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn store(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.store.as_ref()
    }

    /// Record `result` against `identity_id`. Returns whether an entry was
    /// appended.
    pub async fn dispatch(&self, identity_id: &str, result: &InferenceResult) -> bool {
        let Some(label) = result.outcome.emotion() else {
            tracing::debug!(identity = identity_id, "no face located; history left unchanged");
            return false;
        };
        let Some(emotion) = IdentityEmotion::from_label_name(label.as_str()) else {
            tracing::debug!(identity = identity_id, label = label.as_str(), "label has no identity emotion");
            return false;
        };
        let Some(store) = &self.store else {
            tracing::warn!(identity = identity_id, "history store unavailable; entry dropped");
            return false;
        };

        match store
            .append_history(identity_id, emotion, result.confidence, result.timestamp)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(identity = identity_id, %emotion, error = %e, "history write failed");
                false
            }
        }
    }
}
