//! # Audio Transcoding Primitives
//!
//! Pure conversion routines between the telephony wire format (G.711 mu-law
//! at 8kHz) and the canonical agent format (linear PCM, 16-bit, mono, 16kHz).
//! Everything in this module is deterministic and side-effect free; the only
//! state anywhere is the single carry sample held by [`Downsampler`] so that
//! decimation never loses a sample across frame boundaries.
//!
//! ## Conversion Pipeline:
//! - **Dialer → agent**: mu-law bytes → linear samples → 2x upsample → PCM bytes
//! - **Agent → dialer**: PCM bytes → linear samples → 2x decimate → mu-law bytes
//!
//! The mu-law expansion/compression follows ITU-T G.711: expansion is exact,
//! compression quantizes, and compressing an already-quantized signal is the
//! identity (`compress(expand(x)) == x` for every byte `x`).

use crate::error::BridgeError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Sample rate used by the reference telephony vendor (G.711).
pub const DIALER_SAMPLE_RATE: u32 = 8_000;

/// Canonical sample rate expected by the agent platform.
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Bytes per canonical sample (16-bit PCM).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Expand one mu-law byte to a 16-bit linear PCM sample (ITU-T G.711).
pub fn ulaw_expand(compressed: u8) -> i16 {
    let sign: i32 = if compressed < 0x80 { -1 } else { 1 };
    let inverted = (!compressed) as i32;
    let exponent = (inverted >> 4) & 0x07;
    let segment = exponent + 1;
    let mantissa = inverted & 0x0F;

    let step = 4i32 << segment;

    (sign * ((0x80 << exponent) + step * mantissa + step / 2 - 4 * 33)) as i16
}

/// Compress one 16-bit linear PCM sample to a mu-law byte (ITU-T G.711).
///
/// Compression is lossy: samples are quantized to the nearest mu-law code.
/// For inputs that are themselves the result of [`ulaw_expand`], the original
/// byte is recovered exactly.
pub fn ulaw_compress(sample: i16) -> u8 {
    // Magnitude with the G.711 bias of 33, clamped to the 13-bit range.
    let absno = if sample < 0 {
        ((((!sample) as u16) >> 2) as i32) + 33
    } else {
        ((sample >> 2) as i32) + 33
    };
    let absno = absno.min(0x1FFF);

    // Locate the segment (position of the highest set bit above bit 5).
    let mut i = absno >> 6;
    let mut segno = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x08 - segno;
    let low_nibble = 0x0F - ((absno >> segno) & 0x0F);
    let mut code = (high_nibble << 4) | low_nibble;

    if sample >= 0 {
        code |= 0x80;
    }

    code as u8
}

/// Decode a mu-law byte slice into linear samples. Exact, 1:1 sample count.
pub fn decode_ulaw(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| ulaw_expand(b)).collect()
}

/// Encode linear samples as mu-law bytes. Lossy quantization, 1:1 sample count.
pub fn encode_ulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| ulaw_compress(s)).collect()
}

/// Upsample 8kHz samples to 16kHz by inserting one linearly interpolated
/// sample between each adjacent pair.
///
/// The output length is exactly twice the input length; the final input
/// sample is duplicated since it has no successor to interpolate toward.
pub fn upsample_2x(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 2);

    for (i, &sample) in samples.iter().enumerate() {
        out.push(sample);
        let next = if i + 1 < samples.len() {
            samples[i + 1]
        } else {
            sample
        };
        out.push(((sample as i32 + next as i32) / 2) as i16);
    }

    out
}

/// Stateful 16kHz → 8kHz decimator.
///
/// Adjacent sample pairs are averaged down to one output sample. When a frame
/// contains an odd number of samples the trailing sample is carried over and
/// prefixed to the next frame, so no sample is ever dropped at a frame
/// boundary. One `Downsampler` belongs to exactly one call direction; it is
/// never shared between sessions.
#[derive(Debug, Default)]
pub struct Downsampler {
    carry: Option<i16>,
}

impl Downsampler {
    pub fn new() -> Self {
        Self { carry: None }
    }

    /// Decimate a frame by 2, averaging pairs and carrying any odd remainder.
    pub fn decimate_2x(&mut self, samples: &[i16]) -> Vec<i16> {
        let mut input = Vec::with_capacity(samples.len() + 1);
        if let Some(carried) = self.carry.take() {
            input.push(carried);
        }
        input.extend_from_slice(samples);

        let mut out = Vec::with_capacity(input.len() / 2);
        let mut chunks = input.chunks_exact(2);
        for pair in &mut chunks {
            out.push(((pair[0] as i32 + pair[1] as i32) / 2) as i16);
        }

        if let [leftover] = chunks.remainder() {
            self.carry = Some(*leftover);
        }

        out
    }

    /// Number of samples currently held back waiting for a pair.
    pub fn pending(&self) -> usize {
        usize::from(self.carry.is_some())
    }
}

/// Parse little-endian 16-bit PCM bytes into samples.
///
/// A byte length that is not a multiple of the sample width is a
/// [`BridgeError::Conversion`]; callers drop the frame and continue.
pub fn pcm_bytes_to_samples(data: &[u8]) -> Result<Vec<i16>, BridgeError> {
    if data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(BridgeError::Conversion(format!(
            "PCM payload of {} bytes is not a whole number of 16-bit samples",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / BYTES_PER_SAMPLE);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    Ok(samples)
}

/// Serialize samples as little-endian 16-bit PCM bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulaw_roundtrip_is_identity_on_quantized_input() {
        // Every mu-law code must survive expand -> compress unchanged. The
        // one exception is 0x7F, the redundant "negative zero": it expands
        // to the same linear 0 as 0xFF and re-encodes as 0xFF.
        for byte in 0u8..=255 {
            let expanded = ulaw_expand(byte);
            let expected = if byte == 0x7F { 0xFF } else { byte };
            assert_eq!(
                ulaw_compress(expanded),
                expected,
                "code 0x{:02X} did not round-trip (expanded to {})",
                byte,
                expanded
            );
        }

        // Both zero codes decode to exactly zero.
        assert_eq!(ulaw_expand(0x7F), 0);
        assert_eq!(ulaw_expand(0xFF), 0);
    }

    #[test]
    fn test_ulaw_silence_decodes_near_zero() {
        // 0xFF is mu-law silence; 160 bytes is one 20ms Twilio frame.
        let silence = vec![0xFFu8; 160];
        let samples = decode_ulaw(&silence);

        assert_eq!(samples.len(), 160);
        for sample in &samples {
            assert!(sample.abs() <= 8, "silence decoded to {}", sample);
        }

        // Re-encoding must return the original bytes exactly.
        assert_eq!(encode_ulaw(&samples), silence);
    }

    #[test]
    fn test_upsample_doubles_sample_count() {
        let input: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
        let output = upsample_2x(&input);
        assert_eq!(output.len(), input.len() * 2);

        // Interpolated samples sit between their neighbors.
        assert_eq!(output[0], input[0]);
        assert_eq!(output[1], (input[0] as i32 + input[1] as i32) as i16 / 2);
        assert_eq!(output[2], input[1]);
    }

    #[test]
    fn test_mulaw_frame_duration_preserved() {
        // N mu-law bytes at 8kHz become exactly 2N canonical samples at 16kHz,
        // so a 20ms frame stays a 20ms frame.
        let frame = vec![0x7Fu8; 160];
        let pcm = samples_to_pcm_bytes(&upsample_2x(&decode_ulaw(&frame)));
        assert_eq!(pcm.len(), frame.len() * 2 * BYTES_PER_SAMPLE);
        assert_eq!(pcm.len(), 640); // 160 samples -> 320 samples -> 640 bytes
    }

    #[test]
    fn test_downsampler_halves_even_frames() {
        let mut down = Downsampler::new();
        let input: Vec<i16> = (0..320).map(|i| i as i16).collect();
        let output = down.decimate_2x(&input);
        assert_eq!(output.len(), 160);
        assert_eq!(down.pending(), 0);
    }

    #[test]
    fn test_downsampler_carries_odd_remainder() {
        let mut down = Downsampler::new();

        // 5 samples: two pairs decimated, one carried.
        let first = down.decimate_2x(&[10, 20, 30, 40, 50]);
        assert_eq!(first.len(), 2);
        assert_eq!(down.pending(), 1);

        // The carried 50 pairs with the incoming 70.
        let second = down.decimate_2x(&[70, 1, 3]);
        assert_eq!(second, vec![60, 2]);
        assert_eq!(down.pending(), 0);

        // No samples lost: 8 in, 4 out at factor 2.
        assert_eq!(first.len() + second.len(), 4);
    }

    #[test]
    fn test_pcm_parse_rejects_odd_length() {
        let err = pcm_bytes_to_samples(&[0u8; 321]).unwrap_err();
        assert!(matches!(err, BridgeError::Conversion(_)));
    }

    #[test]
    fn test_pcm_byte_roundtrip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 12345, -12345];
        let bytes = samples_to_pcm_bytes(&samples);
        assert_eq!(pcm_bytes_to_samples(&bytes).unwrap(), samples);
    }
}
