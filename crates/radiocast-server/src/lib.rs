//! Radiocast live-feed dispatch and session engine
//!
//! The server accepts recorded radio calls from ingestion sources, stores
//! them, and fans each accepted call out over WebSockets to listeners whose
//! subscription and credential admit it.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]

pub mod access;
pub mod admission;
pub mod dirwatch;
pub mod dispatcher;
pub mod downstream;
pub mod handlers;
pub mod ingest;
pub mod playback;
pub mod routes;
pub mod session;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
