//! # Twilio Connection Handler
//!
//! Parses Twilio Media Streams WebSocket messages into vendor-neutral
//! [`DialerEvent`]s. Twilio discriminates on an `event` field:
//! `connected`, `start`, `media`, `stop`, `mark`, `dtmf`.

use crate::dialer::{ConnectionHandler, DialerEvent};
use crate::error::BridgeError;
use serde_json::Value;
use std::collections::HashMap;

/// Normalizes inbound Twilio messages.
pub struct TwilioConnectionHandler;

impl ConnectionHandler for TwilioConnectionHandler {
    fn parse_incoming(&self, raw: &str) -> Result<DialerEvent, BridgeError> {
        let message: Value = serde_json::from_str(raw)
            .map_err(|e| BridgeError::Protocol(format!("undecodable dialer message: {}", e)))?;

        let event = message
            .get("event")
            .and_then(|e| e.as_str())
            .ok_or_else(|| BridgeError::Protocol("dialer message without event field".into()))?;

        match event {
            "start" => parse_start(&message),
            "media" => {
                let payload = message
                    .get("media")
                    .and_then(|m| m.get("payload"))
                    .and_then(|p| p.as_str())
                    .ok_or_else(|| BridgeError::Protocol("media event without payload".into()))?;
                Ok(DialerEvent::Media {
                    payload: payload.to_string(),
                })
            }
            "stop" => Ok(DialerEvent::Stop),
            "mark" => {
                let name = message
                    .get("mark")
                    .and_then(|m| m.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                Ok(DialerEvent::Mark {
                    name: name.to_string(),
                })
            }
            "dtmf" => {
                let digit = message
                    .get("dtmf")
                    .and_then(|d| d.get("digit"))
                    .and_then(|d| d.as_str())
                    .unwrap_or_default();
                Ok(DialerEvent::Dtmf {
                    digit: digit.to_string(),
                })
            }
            other => Ok(DialerEvent::Unknown {
                event: other.to_string(),
            }),
        }
    }
}

fn parse_start(message: &Value) -> Result<DialerEvent, BridgeError> {
    let start = message
        .get("start")
        .ok_or_else(|| BridgeError::Protocol("start event without start block".into()))?;

    // Twilio duplicates streamSid at the top level and inside the block;
    // prefer the block, fall back to the envelope.
    let stream_id = start
        .get("streamSid")
        .or_else(|| message.get("streamSid"))
        .and_then(|s| s.as_str())
        .ok_or_else(|| BridgeError::Protocol("start event without streamSid".into()))?;

    let call_id = start
        .get("callSid")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let mut custom_parameters = HashMap::new();
    if let Some(params) = start.get("customParameters").and_then(|p| p.as_object()) {
        for (key, value) in params {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            custom_parameters.insert(key.clone(), value);
        }
    }

    Ok(DialerEvent::Start {
        call_id,
        stream_id: stream_id.to_string(),
        custom_parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_event() {
        let handler = TwilioConnectionHandler;
        let raw = r#"{
            "event": "start",
            "streamSid": "MZ0001",
            "start": {
                "callSid": "CA0001",
                "streamSid": "MZ0001",
                "customParameters": {"agent_id": "agent_123", "name": "Ada"}
            }
        }"#;

        match handler.parse_incoming(raw).unwrap() {
            DialerEvent::Start {
                call_id,
                stream_id,
                custom_parameters,
            } => {
                assert_eq!(call_id.as_deref(), Some("CA0001"));
                assert_eq!(stream_id, "MZ0001");
                assert_eq!(custom_parameters["agent_id"], "agent_123");
                assert_eq!(custom_parameters["name"], "Ada");
            }
            other => panic!("expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_event() {
        let handler = TwilioConnectionHandler;
        let raw = r#"{"event": "media", "streamSid": "MZ0001", "media": {"payload": "AAAA"}}"#;

        assert_eq!(
            handler.parse_incoming(raw).unwrap(),
            DialerEvent::Media {
                payload: "AAAA".to_string()
            }
        );
    }

    #[test]
    fn test_parse_stop_mark_and_dtmf() {
        let handler = TwilioConnectionHandler;

        assert_eq!(
            handler.parse_incoming(r#"{"event": "stop"}"#).unwrap(),
            DialerEvent::Stop
        );
        assert_eq!(
            handler
                .parse_incoming(r#"{"event": "mark", "mark": {"name": "m1"}}"#)
                .unwrap(),
            DialerEvent::Mark {
                name: "m1".to_string()
            }
        );
        assert_eq!(
            handler
                .parse_incoming(r#"{"event": "dtmf", "dtmf": {"digit": "5"}}"#)
                .unwrap(),
            DialerEvent::Dtmf {
                digit: "5".to_string()
            }
        );
    }

    #[test]
    fn test_unrecognized_event_is_unknown_not_error() {
        let handler = TwilioConnectionHandler;
        assert_eq!(
            handler.parse_incoming(r#"{"event": "connected"}"#).unwrap(),
            DialerEvent::Unknown {
                event: "connected".to_string()
            }
        );
    }

    #[test]
    fn test_undecodable_message_is_protocol_error() {
        let handler = TwilioConnectionHandler;
        assert!(matches!(
            handler.parse_incoming("not json").unwrap_err(),
            BridgeError::Protocol(_)
        ));
        assert!(matches!(
            handler.parse_incoming(r#"{"no_event": true}"#).unwrap_err(),
            BridgeError::Protocol(_)
        ));
    }

    #[test]
    fn test_metadata_extraction_from_start() {
        let handler = TwilioConnectionHandler;
        let event = handler
            .parse_incoming(
                r#"{"event": "start", "start": {"callSid": "CA1", "streamSid": "MZ1"}}"#,
            )
            .unwrap();

        let metadata = handler.extract_metadata(&event).unwrap();
        assert_eq!(metadata.call_id.as_deref(), Some("CA1"));
        assert_eq!(metadata.stream_id, "MZ1");
        assert!(handler.extract_metadata(&DialerEvent::Stop).is_none());
    }
}
