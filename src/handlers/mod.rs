//! # HTTP Request Handlers
//!
//! Thin request/response wrappers around the call-bridge core: call-control
//! webhooks (outbound/incoming), and the session monitoring surface.

pub mod auth;
pub mod calls;
pub mod sessions;

pub use calls::{incoming_call, outbound_call};
pub use sessions::{list_sessions, session_count, terminate_session};
