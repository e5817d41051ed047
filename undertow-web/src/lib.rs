//! Undertow Web - relay endpoint server
//!
//! Serves the player's static files and bridges WebSocket connections on
//! `/stream` to relay sessions.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{AppState, ServerError, build_router, run_server};
