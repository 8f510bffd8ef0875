//! Ingress API and worker processes for the media-conversion job pipeline.
//! Both binaries in `src/bin/` are thin wrappers around this library: the
//! state machine, transcoder driver, and HTTP client all live in
//! `mediaconvert_core` and are exercised identically from either process.

pub mod app;
pub mod error;
pub mod handlers;
pub mod reaper;
pub mod runner;
pub mod state;

pub use app::create_app;
pub use error::{AppError, AppResult};
pub use state::AppState;
