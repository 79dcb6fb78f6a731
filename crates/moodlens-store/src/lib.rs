//! moodlens-store — identity records and per-identity emotion history.
//!
//! The pipeline never depends on this crate. The daemon feeds it through a
//! best-effort dispatcher after each identity-scoped inference.

pub mod emotion;
pub mod store;

pub use emotion::{parse_label, IdentityEmotion, RawEmotion};
pub use store::{HistoryEntry, HistoryStore, Identity, SqliteHistoryStore, StoreError};
