//! # Agent Connector
//!
//! The agent platform is an opaque remote peer reached over a duplex JSON
//! WebSocket. This module owns that boundary: obtaining the short-lived
//! signed connection URL, opening the socket, and translating between the
//! platform's wire messages and the gateway's own [`AgentEvent`] vocabulary.
//!
//! Audio crossing this boundary is always canonical PCM (16-bit mono 16kHz),
//! base64-encoded inside JSON envelopes.

pub mod elevenlabs;

/// A message from the agent platform, normalized for the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// One chunk of agent speech as canonical PCM bytes.
    Audio(Vec<u8>),

    /// The caller spoke over the agent; every undelivered agent frame must
    /// be flushed before any further audio is forwarded.
    Interruption,

    /// Keep-alive probe; answered immediately with a pong, never forwarded.
    Ping { event_id: Option<i64> },

    /// Text the agent spoke (logged for observability, not relayed).
    AgentResponse(String),

    /// Transcription of what the caller said (logged, not relayed).
    UserTranscript(String),

    /// Any event kind the gateway does not act on.
    Other { kind: String },
}
