//! Integration tests for Undertow
//!
//! These tests drive whole relay sessions against scripted stand-ins for
//! the transcoder and prober, and feed relayed packets through the client
//! pipeline.

#![cfg(unix)]

#[path = "integration/support.rs"]
mod support;

#[path = "integration/client_pipeline.rs"]
mod client_pipeline;
#[path = "integration/session_lifecycle.rs"]
mod session_lifecycle;
#[path = "integration/upload_probe.rs"]
mod upload_probe;
