//! # Twilio Audio Transcoder
//!
//! Twilio media payloads are base64-encoded G.711 mu-law at 8kHz; the agent
//! platform expects linear PCM 16-bit mono at 16kHz. Both directions are a
//! three-step pipeline over the primitives in [`crate::audio::transcode`].

use crate::audio::transcode::{
    decode_ulaw, encode_ulaw, pcm_bytes_to_samples, samples_to_pcm_bytes, upsample_2x,
};
use crate::audio::Downsampler;
use crate::dialer::AudioTranscoder;
use crate::error::BridgeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Stateless mu-law 8kHz ⇄ PCM 16kHz conversion for Twilio media streams.
pub struct TwilioTranscoder;

impl AudioTranscoder for TwilioTranscoder {
    fn to_canonical(&self, payload: &str) -> Result<Vec<u8>, BridgeError> {
        let mulaw = BASE64
            .decode(payload)
            .map_err(|e| BridgeError::Conversion(format!("invalid base64 payload: {}", e)))?;

        if mulaw.is_empty() {
            return Err(BridgeError::Conversion("empty media payload".to_string()));
        }

        let linear_8k = decode_ulaw(&mulaw);
        let linear_16k = upsample_2x(&linear_8k);
        Ok(samples_to_pcm_bytes(&linear_16k))
    }

    fn from_canonical(
        &self,
        downsampler: &mut Downsampler,
        pcm: &[u8],
    ) -> Result<String, BridgeError> {
        let linear_16k = pcm_bytes_to_samples(pcm)?;
        let linear_8k = downsampler.decimate_2x(&linear_16k);
        let mulaw = encode_ulaw(&linear_8k);
        Ok(BASE64.encode(mulaw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_roundtrip() {
        // 160 bytes of mu-law silence is one 20ms Twilio frame.
        let transcoder = TwilioTranscoder;
        let silence_b64 = BASE64.encode(vec![0xFFu8; 160]);

        let pcm = transcoder.to_canonical(&silence_b64).unwrap();
        assert_eq!(pcm.len(), 160 * 2 * 2); // 2x samples, 2 bytes each

        // All decoded samples are near-zero amplitude.
        let samples = pcm_bytes_to_samples(&pcm).unwrap();
        assert!(samples.iter().all(|s| s.abs() <= 8));

        // Converting back through the decimator recovers the original frame.
        let mut down = Downsampler::new();
        let back = transcoder.from_canonical(&mut down, &pcm).unwrap();
        assert_eq!(BASE64.decode(back).unwrap(), vec![0xFFu8; 160]);
    }

    #[test]
    fn test_invalid_base64_is_conversion_error() {
        let transcoder = TwilioTranscoder;
        let err = transcoder.to_canonical("not-base64!!!").unwrap_err();
        assert!(matches!(err, BridgeError::Conversion(_)));
    }

    #[test]
    fn test_odd_pcm_length_is_conversion_error() {
        let transcoder = TwilioTranscoder;
        let mut down = Downsampler::new();
        let err = transcoder.from_canonical(&mut down, &[0u8; 5]).unwrap_err();
        assert!(matches!(err, BridgeError::Conversion(_)));
    }

    #[test]
    fn test_from_canonical_carries_across_frames() {
        let transcoder = TwilioTranscoder;
        let mut down = Downsampler::new();

        // 3 samples (6 bytes) leaves one sample pending in the decimator.
        let first = transcoder
            .from_canonical(&mut down, &samples_to_pcm_bytes(&[100, 200, 300]))
            .unwrap();
        assert_eq!(BASE64.decode(first).unwrap().len(), 1);
        assert_eq!(down.pending(), 1);

        // The carried sample pairs with the next frame's first sample.
        let second = transcoder
            .from_canonical(&mut down, &samples_to_pcm_bytes(&[400]))
            .unwrap();
        assert_eq!(BASE64.decode(second).unwrap().len(), 1);
        assert_eq!(down.pending(), 0);
    }
}
