//! # Twilio Dialer Adapter
//!
//! Reference vendor implementation. Twilio Media Streams speak G.711 mu-law
//! at 8kHz over a JSON WebSocket protocol addressed by `streamSid`, and call
//! setup is answered with a TwiML document.
//!
//! ## Components:
//! - **Transcoder**: base64 mu-law 8kHz ⇄ canonical PCM 16kHz
//! - **Message Builder**: `media`/`mark`/`clear` envelopes and TwiML
//! - **Connection Handler**: `start`/`media`/`stop`/`mark`/`dtmf` parsing

pub mod connection_handler;
pub mod message_builder;
pub mod transcoder;

use crate::config::TwilioConfig;
use crate::dialer::DialerAdapter;
use crate::error::BridgeError;
use serde_json::Value;
use tracing::{error, info};

pub use connection_handler::TwilioConnectionHandler;
pub use message_builder::TwilioMessageBuilder;
pub use transcoder::TwilioTranscoder;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Build the Twilio capability bundle.
pub fn adapter() -> DialerAdapter {
    DialerAdapter::new(
        "twilio",
        Box::new(TwilioTranscoder),
        Box::new(TwilioMessageBuilder),
        Box::new(TwilioConnectionHandler),
    )
}

/// Validate that the Twilio credentials look usable before placing calls.
pub fn validate_config(cfg: &TwilioConfig) -> Result<(), BridgeError> {
    if cfg.account_sid.is_empty() || cfg.auth_token.is_empty() {
        return Err(BridgeError::UpstreamSetup(
            "Twilio credentials not configured".to_string(),
        ));
    }
    if !cfg.account_sid.starts_with("AC") {
        return Err(BridgeError::UpstreamSetup(
            "Twilio account SID must start with 'AC'".to_string(),
        ));
    }
    if !cfg.phone_number.starts_with('+') {
        return Err(BridgeError::UpstreamSetup(
            "Twilio phone number must be in E.164 format".to_string(),
        ));
    }
    Ok(())
}

/// Place an outbound call through the Twilio REST API.
///
/// This is an opaque collaborator call: the TwiML handed over here tells
/// Twilio to open its media stream back at the gateway once the callee
/// answers. Returns the vendor-assigned call SID.
pub async fn place_call(
    cfg: &TwilioConfig,
    to_number: &str,
    twiml: &str,
) -> Result<String, BridgeError> {
    validate_config(cfg)?;

    let url = format!("{}/Accounts/{}/Calls.json", TWILIO_API_BASE, cfg.account_sid);
    let params = [
        ("From", cfg.phone_number.as_str()),
        ("To", to_number),
        ("Twiml", twiml),
    ];

    info!("Initiating Twilio call to {}", to_number);

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .basic_auth(&cfg.account_sid, Some(&cfg.auth_token))
        .form(&params)
        .send()
        .await
        .map_err(|e| BridgeError::UpstreamSetup(format!("Twilio request failed: {}", e)))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| BridgeError::UpstreamSetup(format!("Twilio response unreadable: {}", e)))?;

    if !status.is_success() {
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        error!("Twilio API error ({}): {}", status, message);
        return Err(BridgeError::UpstreamSetup(format!(
            "Twilio error: {}",
            message
        )));
    }

    let call_sid = body
        .get("sid")
        .and_then(|s| s.as_str())
        .ok_or_else(|| BridgeError::UpstreamSetup("no call SID in Twilio response".to_string()))?;

    info!("Twilio call initiated - CallSid: {}", call_sid);
    Ok(call_sid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn twilio_config(sid: &str, token: &str, number: &str) -> TwilioConfig {
        TwilioConfig {
            account_sid: sid.to_string(),
            auth_token: token.to_string(),
            phone_number: number.to_string(),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(validate_config(&twilio_config("AC123", "token", "+15550100")).is_ok());
        assert!(validate_config(&twilio_config("", "token", "+15550100")).is_err());
        assert!(validate_config(&twilio_config("XX123", "token", "+15550100")).is_err());
        assert!(validate_config(&twilio_config("AC123", "token", "15550100")).is_err());
    }

    #[test]
    fn test_adapter_bundles_under_vendor_name() {
        let adapter = adapter();
        assert_eq!(adapter.name(), "twilio");
    }
}
