//! moodlensd — HTTP front end for the moodlens emotion pipeline.
//!
//! Models load once at startup into a shared pipeline; a pool of engine
//! threads runs inference while axum handlers await replies. Identity-scoped
//! detections feed the history store on a best-effort basis.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod dto;
pub mod engine;
pub mod source;

#[cfg(test)]
mod testutil;

pub use api::{build_router, AppState};
pub use config::Config;
pub use dispatcher::HistoryDispatcher;
pub use engine::{spawn_engine, EngineError, EngineHandle};
