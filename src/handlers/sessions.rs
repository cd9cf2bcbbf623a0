//! # Session Monitoring Surface
//!
//! Operator-facing views over the session registry: listing, counting, and
//! forced termination. Reads are cheap snapshots; termination goes through
//! the registry's idempotent end path.

use crate::error::AppResult;
use crate::handlers::auth::require_api_key;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::info;

/// `GET /api/v1/sessions`: id/state/duration listing of every known
/// session, including recently-ended ones inside the retention window.
pub async fn list_sessions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let sessions = state.sessions.list_sessions();

    Ok(HttpResponse::Ok().json(json!({
        "active_count": state.sessions.active_count(),
        "max_sessions": state.sessions.max_concurrent(),
        "total_tracked": sessions.len(),
        "sessions": sessions,
    })))
}

/// `GET /api/v1/sessions/count`: just the admission numbers.
pub async fn session_count(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "active_count": state.sessions.active_count(),
        "max_sessions": state.sessions.max_concurrent(),
    })))
}

/// `DELETE /api/v1/sessions/{id}`: force-end a session. Idempotent: ending
/// an already-ended session reports the same terminal state.
pub async fn terminate_session(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    require_api_key(&req, &config)?;

    let session_id = path.into_inner();
    let final_state = state
        .sessions
        .end_session(&session_id, Some("terminated by operator"))?;

    info!("Operator terminated session {}", session_id);

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "state": final_state.as_str(),
    })))
}
