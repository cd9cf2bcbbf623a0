//! # Twilio Message Builder
//!
//! Outbound wire documents in Twilio's two dialects: JSON envelopes for the
//! media-stream WebSocket and TwiML for call setup.

use crate::dialer::MessageBuilder;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Builds Twilio media-stream messages and TwiML responses.
pub struct TwilioMessageBuilder;

impl MessageBuilder for TwilioMessageBuilder {
    fn audio_message(&self, stream_id: &str, payload: &str) -> Value {
        json!({
            "event": "media",
            "streamSid": stream_id,
            "media": {
                "payload": payload
            }
        })
    }

    fn mark_message(&self, stream_id: &str, name: &str) -> Value {
        json!({
            "event": "mark",
            "streamSid": stream_id,
            "mark": {
                "name": name
            }
        })
    }

    /// Twilio's `clear` message drops audio already buffered on the vendor
    /// side, which the interruption flush depends on.
    fn clear_message(&self, stream_id: &str) -> Option<Value> {
        Some(json!({
            "event": "clear",
            "streamSid": stream_id
        }))
    }

    fn connection_response(
        &self,
        websocket_url: &str,
        custom_params: Option<&HashMap<String, String>>,
    ) -> String {
        let mut parameters_xml = String::new();
        if let Some(params) = custom_params {
            // Deterministic parameter order keeps the document reproducible.
            let mut keys: Vec<&String> = params.keys().collect();
            keys.sort();
            for key in keys {
                parameters_xml.push_str(&format!(
                    "\n            <Parameter name=\"{}\" value=\"{}\" />",
                    xml_escape(key),
                    xml_escape(&params[key])
                ));
            }
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <Stream url="{}">{}
        </Stream>
    </Connect>
</Response>"#,
            xml_escape(websocket_url),
            parameters_xml
        )
    }
}

/// Escape the five XML-significant characters for attribute values.
fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_message_shape() {
        let builder = TwilioMessageBuilder;
        let msg = builder.audio_message("MZ123", "AAAA");

        assert_eq!(msg["event"], "media");
        assert_eq!(msg["streamSid"], "MZ123");
        assert_eq!(msg["media"]["payload"], "AAAA");
    }

    #[test]
    fn test_clear_message_targets_stream() {
        let builder = TwilioMessageBuilder;
        let msg = builder.clear_message("MZ123").unwrap();

        assert_eq!(msg["event"], "clear");
        assert_eq!(msg["streamSid"], "MZ123");
    }

    #[test]
    fn test_twiml_includes_stream_url_and_parameters() {
        let builder = TwilioMessageBuilder;
        let mut params = HashMap::new();
        params.insert("agent_id".to_string(), "agent_123".to_string());
        params.insert("name".to_string(), "Ada".to_string());

        let twiml =
            builder.connection_response("wss://gateway.example.com/twilio/media-stream", Some(&params));

        assert!(twiml.contains(r#"<Stream url="wss://gateway.example.com/twilio/media-stream">"#));
        assert!(twiml.contains(r#"<Parameter name="agent_id" value="agent_123" />"#));
        assert!(twiml.contains(r#"<Parameter name="name" value="Ada" />"#));
    }

    #[test]
    fn test_twiml_escapes_attribute_values() {
        let builder = TwilioMessageBuilder;
        let mut params = HashMap::new();
        params.insert("note".to_string(), r#"a<b&"c""#.to_string());

        let twiml = builder.connection_response("wss://example.com/ws?a=1&b=2", Some(&params));

        assert!(twiml.contains("wss://example.com/ws?a=1&amp;b=2"));
        assert!(twiml.contains("a&lt;b&amp;&quot;c&quot;"));
        assert!(!twiml.contains(r#"value="a<b"#));
    }
}
