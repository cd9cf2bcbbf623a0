//! # ElevenLabs Agent Connection
//!
//! Concrete agent-platform binding for the ElevenLabs Conversational AI
//! WebSocket API. Connection setup is two steps: fetch a signed WebSocket
//! URL (valid for a short window) via REST, then open the duplex socket.
//! Both steps run under the caller's setup timeout; any failure is an
//! [`BridgeError::UpstreamSetup`] and the session never goes active.

use crate::agent::AgentEvent;
use crate::config::AgentConfig;
use crate::error::BridgeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// Write half of the agent socket.
pub type AgentSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of the agent socket.
pub type AgentSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Fetch a signed WebSocket URL for the given agent.
pub async fn get_signed_url(cfg: &AgentConfig, agent_id: &str) -> Result<String, BridgeError> {
    let url = format!("{}/convai/conversation/get-signed-url", cfg.api_base);

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .header("xi-api-key", &cfg.api_key)
        .query(&[("agent_id", agent_id)])
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| BridgeError::UpstreamSetup(format!("signed-url request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BridgeError::UpstreamSetup(format!(
            "signed-url request returned {}: {}",
            status, body
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| BridgeError::UpstreamSetup(format!("signed-url response unreadable: {}", e)))?;

    body.get("signed_url")
        .and_then(|u| u.as_str())
        .map(str::to_string)
        .ok_or_else(|| BridgeError::UpstreamSetup("no signed URL in response".to_string()))
}

/// Establish the agent-side connection under a bounded window.
///
/// Returns the split socket halves so the two relay directions can run
/// independently. A timeout here fails the session during setup.
pub async fn connect(
    cfg: &AgentConfig,
    agent_id: &str,
    window: Duration,
) -> Result<(AgentSink, AgentSource), BridgeError> {
    let setup = async {
        let signed_url = get_signed_url(cfg, agent_id).await?;
        debug!("Obtained signed URL for agent {}", agent_id);

        let (socket, _response) = connect_async(signed_url.as_str())
            .await
            .map_err(|e| BridgeError::UpstreamSetup(format!("agent connect failed: {}", e)))?;

        info!("Agent WebSocket connection established for {}", agent_id);
        Ok(socket.split())
    };

    tokio::time::timeout(window, setup).await.map_err(|_| {
        BridgeError::UpstreamSetup(format!(
            "agent connection not established within {}ms",
            window.as_millis()
        ))
    })?
}

/// Session-start message carrying the dynamic variables for this call.
pub fn initialization_message(dynamic_variables: &HashMap<String, Value>) -> String {
    let override_config = if dynamic_variables.contains_key("prompt")
        || dynamic_variables.contains_key("first_message")
    {
        json!({
            "agent": {
                "prompt": { "prompt": dynamic_variables.get("prompt") },
                "first_message": dynamic_variables.get("first_message"),
                "language": dynamic_variables.get("language")
            }
        })
    } else {
        Value::Null
    };

    json!({
        "type": "conversation_initiation_client_data",
        "conversation_config_override": override_config,
        "dynamic_variables": dynamic_variables
    })
    .to_string()
}

/// Wrap one canonical PCM chunk for transmission to the agent.
pub fn audio_chunk_message(pcm: &[u8]) -> String {
    json!({ "user_audio_chunk": BASE64.encode(pcm) }).to_string()
}

/// Reply to a platform ping, echoing its event id.
pub fn pong_message(event_id: Option<i64>) -> String {
    json!({ "type": "pong", "event_id": event_id }).to_string()
}

/// Parse one inbound platform message into an [`AgentEvent`].
///
/// Undecodable input is a [`BridgeError::Protocol`]; decodable messages of
/// kinds the gateway does not act on come back as [`AgentEvent::Other`].
pub fn parse_event(raw: &str) -> Result<AgentEvent, BridgeError> {
    let data: Value = serde_json::from_str(raw)
        .map_err(|e| BridgeError::Protocol(format!("undecodable agent message: {}", e)))?;

    let kind = data.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match kind {
        "audio" => {
            let audio_b64 = data
                .get("audio_event")
                .and_then(|e| e.get("audio_base_64"))
                .and_then(|a| a.as_str())
                .ok_or_else(|| BridgeError::Protocol("audio event without payload".into()))?;

            let pcm = BASE64
                .decode(audio_b64)
                .map_err(|e| BridgeError::Protocol(format!("invalid agent audio base64: {}", e)))?;

            Ok(AgentEvent::Audio(pcm))
        }
        "interruption" | "interruption_event" => Ok(AgentEvent::Interruption),
        "ping" | "ping_event" => Ok(AgentEvent::Ping {
            event_id: data
                .get("ping_event")
                .and_then(|p| p.get("event_id"))
                .or_else(|| data.get("event_id"))
                .and_then(|id| id.as_i64()),
        }),
        "agent_response" | "agent_response_event" => {
            let response = data
                .get("agent_response_event")
                .and_then(|e| e.get("agent_response").or_else(|| e.get("response")))
                .and_then(|r| r.as_str())
                .unwrap_or_default();
            Ok(AgentEvent::AgentResponse(response.to_string()))
        }
        "user_transcript" | "user_transcription_event" => {
            let transcript = data
                .get("user_transcription_event")
                .and_then(|e| e.get("user_transcript").or_else(|| e.get("user_transcription")))
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            Ok(AgentEvent::UserTranscript(transcript.to_string()))
        }
        other => Ok(AgentEvent::Other {
            kind: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_message_carries_variables() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), json!("Ada"));
        vars.insert("emi_eligible".to_string(), json!(true));

        let msg: Value = serde_json::from_str(&initialization_message(&vars)).unwrap();
        assert_eq!(msg["type"], "conversation_initiation_client_data");
        assert_eq!(msg["dynamic_variables"]["name"], "Ada");
        assert_eq!(msg["dynamic_variables"]["emi_eligible"], true);
        assert!(msg["conversation_config_override"].is_null());
    }

    #[test]
    fn test_initialization_message_with_prompt_override() {
        let mut vars = HashMap::new();
        vars.insert("prompt".to_string(), json!("You are a billing assistant"));

        let msg: Value = serde_json::from_str(&initialization_message(&vars)).unwrap();
        assert_eq!(
            msg["conversation_config_override"]["agent"]["prompt"]["prompt"],
            "You are a billing assistant"
        );
    }

    #[test]
    fn test_audio_chunk_roundtrip() {
        let pcm = vec![0u8, 1, 2, 3, 255];
        let msg: Value = serde_json::from_str(&audio_chunk_message(&pcm)).unwrap();
        let decoded = BASE64
            .decode(msg["user_audio_chunk"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn test_parse_audio_event() {
        let raw = json!({
            "type": "audio",
            "audio_event": { "audio_base_64": BASE64.encode([1u8, 2, 3]) }
        })
        .to_string();

        assert_eq!(parse_event(&raw).unwrap(), AgentEvent::Audio(vec![1, 2, 3]));
    }

    #[test]
    fn test_parse_interruption_and_ping() {
        assert_eq!(
            parse_event(r#"{"type": "interruption"}"#).unwrap(),
            AgentEvent::Interruption
        );
        assert_eq!(
            parse_event(r#"{"type": "ping", "ping_event": {"event_id": 7}}"#).unwrap(),
            AgentEvent::Ping { event_id: Some(7) }
        );
    }

    #[test]
    fn test_pong_echoes_event_id() {
        let msg: Value = serde_json::from_str(&pong_message(Some(7))).unwrap();
        assert_eq!(msg["type"], "pong");
        assert_eq!(msg["event_id"], 7);
    }

    #[test]
    fn test_unhandled_kinds_are_other() {
        assert_eq!(
            parse_event(r#"{"type": "conversation_initiation_metadata"}"#).unwrap(),
            AgentEvent::Other {
                kind: "conversation_initiation_metadata".to_string()
            }
        );
    }

    #[test]
    fn test_undecodable_message_is_protocol_error() {
        assert!(matches!(
            parse_event("{{nope").unwrap_err(),
            BridgeError::Protocol(_)
        ));
    }
}
