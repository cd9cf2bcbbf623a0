//! # Dialer Adapters
//!
//! Vendor integration is expressed as a capability bundle rather than an
//! inheritance tree: each telephony vendor contributes one [`DialerAdapter`]
//! value composed of three independent strategies plus the vendor name.
//!
//! ## Capability Bundle:
//! - **AudioTranscoder**: converts between the vendor wire payload and the
//!   canonical agent format (PCM 16-bit mono 16kHz)
//! - **MessageBuilder**: constructs outbound wire messages in the vendor's
//!   JSON/XML dialect
//! - **ConnectionHandler**: parses inbound vendor messages into the
//!   vendor-neutral [`DialerEvent`]
//!
//! An adapter is immutable once registered and is shared read-only by every
//! concurrent bridge for that vendor.

pub mod registry; // vendor name -> adapter lookup
pub mod twilio;   // reference vendor (mu-law 8kHz media streams)

use crate::audio::Downsampler;
use crate::error::BridgeError;
use serde_json::Value;
use std::collections::HashMap;

/// A vendor message normalized into the gateway's own vocabulary.
///
/// Unrecognized vendor events become [`DialerEvent::Unknown`]; the bridge
/// logs and ignores those rather than failing the call.
#[derive(Debug, Clone, PartialEq)]
pub enum DialerEvent {
    /// The vendor opened the media stream and identified the call.
    Start {
        call_id: Option<String>,
        stream_id: String,
        custom_parameters: HashMap<String, String>,
    },

    /// One inbound audio frame, still base64 in the vendor's native encoding.
    Media { payload: String },

    /// Playback-position marker echoed back by the vendor.
    Mark { name: String },

    /// A DTMF keypress from the caller.
    Dtmf { digit: String },

    /// The vendor ended the media stream.
    Stop,

    /// Anything the adapter does not recognize.
    Unknown { event: String },
}

/// Call identifiers carried by a vendor `Start` event.
#[derive(Debug, Clone)]
pub struct CallMetadata {
    pub call_id: Option<String>,
    pub stream_id: String,
    pub custom_parameters: HashMap<String, String>,
}

/// Converts audio between the vendor wire format and canonical PCM.
///
/// `to_canonical` must be deterministic and side-effect free. The
/// agent → dialer direction threads the caller-owned [`Downsampler`] through
/// so the rate conversion can carry samples across frame boundaries without
/// the adapter holding per-call state.
pub trait AudioTranscoder: Send + Sync {
    /// Vendor base64 payload -> canonical PCM bytes (16-bit mono 16kHz).
    fn to_canonical(&self, payload: &str) -> Result<Vec<u8>, BridgeError>;

    /// Canonical PCM bytes -> vendor base64 payload.
    fn from_canonical(
        &self,
        downsampler: &mut Downsampler,
        pcm: &[u8],
    ) -> Result<String, BridgeError>;
}

/// Builds outbound messages in the vendor's wire dialect.
pub trait MessageBuilder: Send + Sync {
    /// Audio envelope addressed to the given stream.
    fn audio_message(&self, stream_id: &str, payload: &str) -> Value;

    /// Synchronization marker, if the vendor supports one.
    fn mark_message(&self, stream_id: &str, name: &str) -> Value;

    /// Buffer-flush message sent on interruption. `None` when the vendor has
    /// no such concept; the bridge then relies on its own queue flush alone.
    fn clear_message(&self, stream_id: &str) -> Option<Value>;

    /// Call-setup response document (e.g. TwiML) instructing the vendor to
    /// open a bidirectional media stream to `websocket_url`.
    fn connection_response(
        &self,
        websocket_url: &str,
        custom_params: Option<&HashMap<String, String>>,
    ) -> String;
}

/// Parses inbound vendor messages into [`DialerEvent`]s.
pub trait ConnectionHandler: Send + Sync {
    /// Parse one raw text message from the vendor socket.
    ///
    /// Undecodable input is a [`BridgeError::Protocol`]; decodable input with
    /// an unrecognized discriminator is [`DialerEvent::Unknown`].
    fn parse_incoming(&self, raw: &str) -> Result<DialerEvent, BridgeError>;

    /// Pull the call identifiers out of a `Start` event.
    fn extract_metadata(&self, event: &DialerEvent) -> Option<CallMetadata> {
        match event {
            DialerEvent::Start {
                call_id,
                stream_id,
                custom_parameters,
            } => Some(CallMetadata {
                call_id: call_id.clone(),
                stream_id: stream_id.clone(),
                custom_parameters: custom_parameters.clone(),
            }),
            _ => None,
        }
    }
}

/// One vendor's immutable capability bundle.
///
/// Built once at startup, registered by name, and shared read-only across
/// all concurrent sessions of that vendor.
pub struct DialerAdapter {
    name: &'static str,
    pub transcoder: Box<dyn AudioTranscoder>,
    pub messages: Box<dyn MessageBuilder>,
    pub events: Box<dyn ConnectionHandler>,
}

impl DialerAdapter {
    pub fn new(
        name: &'static str,
        transcoder: Box<dyn AudioTranscoder>,
        messages: Box<dyn MessageBuilder>,
        events: Box<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            name,
            transcoder,
            messages,
            events,
        }
    }

    /// Vendor name this adapter was registered under.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for DialerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialerAdapter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
