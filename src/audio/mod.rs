//! # Audio Module
//!
//! Conversion between telephony wire audio and the canonical agent format.
//!
//! ## Key Components:
//! - **Transcode**: G.711 mu-law expand/compress and 8kHz ⇄ 16kHz resampling
//!
//! ## Canonical Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//!
//! Every conversion produces a new buffer; frames are never mutated in place.
//! Vendor-specific base64 framing lives with each dialer adapter, not here.

pub mod transcode; // G.711 mu-law codec and rate conversion

pub use transcode::{Downsampler, CANONICAL_SAMPLE_RATE, DIALER_SAMPLE_RATE};
