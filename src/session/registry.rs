//! # Session Registry and Admission Control
//!
//! Tracks every live call bridge in the process and enforces the
//! concurrent-session ceiling. A single mutex around the map is the one
//! global ordering point: the ceiling check, the insert, and every
//! termination are serialized through it, so admission can never race past
//! capacity.
//!
//! Ended sessions linger in the map for a configurable retention window so
//! monitoring can still read them; their ids stay reserved until a sweep
//! removes them. Retained sessions do not count against the ceiling.

use crate::error::BridgeError;
use crate::session::{CallSession, SessionState};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Registry of all call sessions, live and recently ended.
pub struct SessionRegistry {
    /// Sessions mapped by session id; the single shared resource between bridges
    sessions: Mutex<HashMap<String, Arc<CallSession>>>,

    /// Maximum number of sessions in a live state
    max_concurrent: usize,

    /// How long ended sessions stay readable before removal
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(max_concurrent: usize, retention: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_concurrent,
            retention,
        }
    }

    /// Admit a new session.
    ///
    /// Fails with `CapacityExceeded` when the number of live sessions has
    /// reached the ceiling, and with `DuplicateSession` when the id is still
    /// present (including ended sessions inside the retention window). On
    /// either failure the registry is left untouched.
    pub fn create_session(
        &self,
        session_id: Option<String>,
        vendor: &str,
        agent_id: &str,
        call_id: Option<String>,
        stream_id: Option<String>,
        dynamic_variables: HashMap<String, Value>,
    ) -> Result<Arc<CallSession>, BridgeError> {
        let mut sessions = self.sessions.lock().unwrap();

        let live = sessions.values().filter(|s| s.state().is_live()).count();
        if live >= self.max_concurrent {
            return Err(BridgeError::CapacityExceeded {
                limit: self.max_concurrent,
            });
        }

        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if sessions.contains_key(&session_id) {
            return Err(BridgeError::DuplicateSession(session_id));
        }

        let session = Arc::new(CallSession::new(
            session_id.clone(),
            vendor.to_string(),
            agent_id.to_string(),
            call_id,
            stream_id,
            dynamic_variables,
        ));

        sessions.insert(session_id.clone(), session.clone());
        info!(
            "Session {} admitted ({}/{} live)",
            session_id,
            live + 1,
            self.max_concurrent
        );

        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// End a session: cancel its bridge, drive the state machine to
    /// `Ended`, and leave the entry for the retention sweep.
    ///
    /// Idempotent: ending an already-ended session reports the terminal
    /// state again without error or side effect.
    pub fn end_session(&self, session_id: &str, reason: Option<&str>) -> Result<SessionState, BridgeError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;

        if session.state().is_terminal() {
            return Ok(SessionState::Ended);
        }

        if let Some(reason) = reason {
            session.set_error(reason.to_string());
        }

        // Wake the owning bridge so it tears down both connections; the
        // state transition below stands even if the bridge is already gone.
        session.cancel();
        session.advance(SessionState::Ending);
        session.advance(SessionState::Ended);

        info!(
            "Session {} ended after {:.1}s",
            session_id,
            session.duration_seconds()
        );

        Ok(SessionState::Ended)
    }

    /// Number of sessions currently counting against the ceiling.
    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.state().is_live())
            .count()
    }

    /// Total entries including retained ended sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Monitoring snapshot of every known session. The lock is held only
    /// long enough to clone the `Arc`s.
    pub fn list_sessions(&self) -> Vec<Value> {
        let sessions: Vec<Arc<CallSession>> =
            self.sessions.lock().unwrap().values().cloned().collect();

        let mut summaries: Vec<Value> = sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| {
            a["started_at"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["started_at"].as_str().unwrap_or_default())
        });
        summaries
    }

    /// Remove ended sessions whose retention window has expired. Returns
    /// the number of entries removed. Called periodically by the runtime
    /// and directly by tests.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::zero());
        let mut sessions = self.sessions.lock().unwrap();

        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| match s.ended_at() {
                Some(ended) => now.signed_duration_since(ended) >= retention,
                None => false,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            debug!("Session {} removed after retention window", id);
        }

        expired.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ceiling: usize) -> SessionRegistry {
        SessionRegistry::new(ceiling, Duration::from_secs(0))
    }

    fn admit(reg: &SessionRegistry, id: &str) -> Result<Arc<CallSession>, BridgeError> {
        reg.create_session(
            Some(id.to_string()),
            "twilio",
            "agent_123",
            None,
            None,
            HashMap::new(),
        )
    }

    #[test]
    fn test_ceiling_rejects_session_past_capacity() {
        let reg = registry(10);
        for i in 0..10 {
            admit(&reg, &format!("s{}", i)).unwrap();
        }
        assert_eq!(reg.active_count(), 10);

        // The 11th admission fails and leaves the registry untouched.
        let err = admit(&reg, "s10").unwrap_err();
        assert!(matches!(err, BridgeError::CapacityExceeded { limit: 10 }));
        assert_eq!(reg.active_count(), 10);
        assert_eq!(reg.len(), 10);
    }

    #[test]
    fn test_ending_a_session_frees_capacity() {
        let reg = registry(1);
        admit(&reg, "s1").unwrap();
        assert!(matches!(
            admit(&reg, "s2").unwrap_err(),
            BridgeError::CapacityExceeded { .. }
        ));

        reg.end_session("s1", None).unwrap();
        assert_eq!(reg.active_count(), 0);

        // Capacity is free even though s1 is still retained in the map.
        admit(&reg, "s2").unwrap();
        assert_eq!(reg.active_count(), 1);
    }

    #[test]
    fn test_end_session_is_idempotent() {
        let reg = registry(5);
        admit(&reg, "s1").unwrap();

        assert_eq!(reg.end_session("s1", None).unwrap(), SessionState::Ended);
        let ended_at = reg.get("s1").unwrap().ended_at();

        // Second end: same terminal state, no error, timestamp untouched.
        assert_eq!(reg.end_session("s1", None).unwrap(), SessionState::Ended);
        assert_eq!(reg.get("s1").unwrap().ended_at(), ended_at);
    }

    #[test]
    fn test_end_session_unknown_id() {
        let reg = registry(5);
        assert!(matches!(
            reg.end_session("missing", None).unwrap_err(),
            BridgeError::SessionNotFound(_)
        ));
    }

    #[test]
    fn test_retained_id_blocks_reuse_until_sweep() {
        let reg = registry(5);
        admit(&reg, "s1").unwrap();
        reg.end_session("s1", None).unwrap();

        // Retained entry still owns the id.
        assert!(matches!(
            admit(&reg, "s1").unwrap_err(),
            BridgeError::DuplicateSession(_)
        ));

        // Zero retention: the sweep frees the id immediately.
        assert_eq!(reg.sweep_expired(), 1);
        admit(&reg, "s1").unwrap();
    }

    #[test]
    fn test_sweep_ignores_live_sessions() {
        let reg = registry(5);
        admit(&reg, "s1").unwrap();
        assert_eq!(reg.sweep_expired(), 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_ending_one_session_leaves_others_untouched() {
        let reg = registry(5);
        admit(&reg, "s1").unwrap();
        let s2 = admit(&reg, "s2").unwrap();
        let mut s2_cancel = s2.cancelled();

        reg.end_session("s1", Some("operator request")).unwrap();

        assert_eq!(reg.get("s2").unwrap().state(), SessionState::Initializing);
        assert!(!s2_cancel.has_changed().unwrap());
        assert_eq!(reg.active_count(), 1);
        assert_eq!(
            reg.get("s1").unwrap().last_error().as_deref(),
            Some("operator request")
        );
    }

    #[test]
    fn test_forced_end_signals_the_bridge() {
        let reg = registry(5);
        let session = admit(&reg, "s1").unwrap();
        let mut cancel = session.cancelled();

        reg.end_session("s1", None).unwrap();
        assert!(cancel.has_changed().unwrap());
        assert!(*cancel.borrow_and_update());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let reg = registry(100);
        let a = reg
            .create_session(None, "twilio", "agent", None, None, HashMap::new())
            .unwrap();
        let b = reg
            .create_session(None, "twilio", "agent", None, None, HashMap::new())
            .unwrap();
        assert_ne!(a.session_id, b.session_id);
    }
}
