//! # Call-Control Webhooks
//!
//! Vendor-agnostic endpoints for placing and answering calls. Both resolve
//! the vendor's adapter from the registry and lean on its message builder
//! for the wire documents; the actual bridging happens later, when the
//! vendor dials back into the media-stream WebSocket.

use crate::dialer::twilio;
use crate::error::{AppError, AppResult};
use crate::handlers::auth::require_api_key;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

/// Request body for `POST /{vendor}/outbound-call`.
#[derive(Debug, Deserialize)]
pub struct OutboundCallRequest {
    /// Agent persona to bridge the call to
    pub agent_id: String,

    /// Dialer metadata; `to_number` is required, `dynamic_variables` are
    /// forwarded to the agent at session start
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl OutboundCallRequest {
    fn to_number(&self) -> Option<&str> {
        self.metadata.get("to_number").and_then(|v| v.as_str())
    }

    fn dynamic_variables(&self) -> HashMap<String, Value> {
        self.metadata
            .get("dynamic_variables")
            .and_then(|v| v.as_object())
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

/// Place an outbound call through the vendor's REST API.
///
/// The call-setup document handed to the vendor carries the agent id and
/// dynamic variables as custom stream parameters, so the media-stream start
/// event can reconstruct the full session context.
pub async fn outbound_call(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<OutboundCallRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    require_api_key(&req, &config)?;

    let vendor = path.into_inner();
    let adapter = state.adapters.get(&vendor)?;

    let to_number = body
        .to_number()
        .ok_or_else(|| AppError::BadRequest("to_number is required in metadata".to_string()))?
        .to_string();

    // Flatten routing info and dynamic variables into stream parameters.
    let mut custom_params: HashMap<String, String> = HashMap::new();
    custom_params.insert("agent_id".to_string(), body.agent_id.clone());
    custom_params.insert("to_number".to_string(), to_number.clone());
    for (key, value) in body.dynamic_variables() {
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        custom_params.insert(key, value);
    }

    let websocket_url = config.media_stream_url(&vendor);
    info!("Initiating outbound call via {} to {}", vendor, to_number);

    let setup_document = adapter
        .messages
        .connection_response(&websocket_url, Some(&custom_params));

    // Outbound placement is an opaque vendor REST call; only the reference
    // vendor implements it so far.
    let call_id = match vendor.as_str() {
        "twilio" => twilio::place_call(&config.twilio, &to_number, &setup_document).await?,
        other => {
            return Err(AppError::BadRequest(format!(
                "outbound calls not supported for dialer '{}'",
                other
            )))
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "call_id": call_id,
        "to": to_number,
        "status": "queued",
        "message": "Outbound call initiated successfully"
    })))
}

/// Query parameters for `POST /{vendor}/incoming-call`.
#[derive(Debug, Deserialize)]
pub struct IncomingCallQuery {
    pub agent_id: Option<String>,
}

/// Answer an incoming-call webhook with the vendor's call-setup document,
/// instructing it to open a media stream back to this gateway.
pub async fn incoming_call(
    path: web::Path<String>,
    query: web::Query<IncomingCallQuery>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let vendor = path.into_inner();
    let adapter = state.adapters.get(&vendor)?;

    let agent_id = query
        .agent_id
        .clone()
        .unwrap_or_else(|| config.agent.default_agent_id.clone());

    if agent_id.is_empty() {
        return Err(AppError::BadRequest(
            "no agent_id provided and no default configured".to_string(),
        ));
    }

    info!("Incoming call via {}, agent: {}", vendor, agent_id);

    let mut custom_params = HashMap::new();
    custom_params.insert("agent_id".to_string(), agent_id);

    let websocket_url = config.media_stream_url(&vendor);
    let document = adapter
        .messages
        .connection_response(&websocket_url, Some(&custom_params));

    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(document))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_request_metadata_extraction() {
        let body = r#"{
            "agent_id": "agent_123",
            "metadata": {
                "to_number": "+15550100",
                "dynamic_variables": {"name": "Ada", "emi_eligible": true}
            }
        }"#;

        let request: OutboundCallRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.agent_id, "agent_123");
        assert_eq!(request.to_number(), Some("+15550100"));

        let vars = request.dynamic_variables();
        assert_eq!(vars["name"], Value::String("Ada".to_string()));
        assert_eq!(vars["emi_eligible"], Value::Bool(true));
    }

    #[test]
    fn test_outbound_request_without_metadata() {
        let request: OutboundCallRequest =
            serde_json::from_str(r#"{"agent_id": "agent_123"}"#).unwrap();
        assert_eq!(request.to_number(), None);
        assert!(request.dynamic_variables().is_empty());
    }
}
