//! # Call Session Management
//!
//! Tracks the lifecycle of call-bridge sessions. Each session represents one
//! phone call bridged between a dialer and an agent, exclusively owned by a
//! single bridge for its lifetime and referenced (never owned) by the
//! registry for admission control and monitoring.
//!
//! ## Session Lifecycle:
//! 1. **Initializing**: dialer connected, waiting for the vendor start event
//!    and the agent-side connection
//! 2. **Active**: both legs up, audio relaying in both directions
//! 3. **Ending**: either peer signaled termination; flush window running
//! 4. **Ended**: terminal, resources released
//!
//! Transitions are strictly monotonic; there are no cycles and no re-entry.

pub mod registry;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

pub use registry::SessionRegistry;

/// Current lifecycle state of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Dialer connected, agent leg not yet established
    Initializing,
    /// Both legs up, audio flowing
    Active,
    /// Termination signaled, flush window running
    Ending,
    /// Terminal; all resources released
    Ended,
}

impl SessionState {
    /// Convert state to string for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Ending => "ending",
            SessionState::Ended => "ended",
        }
    }

    /// Whether this state counts against the admission ceiling.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Initializing | SessionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended)
    }
}

/// One active or recently-ended bridged call.
///
/// ## Thread Safety:
/// State fields use interior locking so the owning bridge, the registry,
/// and monitoring readers can observe the session concurrently. The
/// dialer/agent connections themselves are owned by the bridge alone and
/// never appear here.
#[derive(Debug)]
pub struct CallSession {
    /// Unique for the process lifetime (UUID unless caller-provided)
    pub session_id: String,

    /// Vendor this call arrived through
    pub vendor: String,

    /// Agent persona the call is bridged to
    pub agent_id: String,

    /// Opaque context forwarded to the agent at session start
    pub dynamic_variables: HashMap<String, Value>,

    /// Vendor-assigned call identifier (absent until the start event)
    call_id: RwLock<Option<String>>,

    /// Vendor transport identifier used to address outbound frames
    stream_id: RwLock<Option<String>>,

    state: RwLock<SessionState>,

    pub started_at: DateTime<Utc>,

    /// Set exactly once, on the transition into `Ended`
    ended_at: RwLock<Option<DateTime<Utc>>>,

    /// Frames dropped to conversion or queue-full conditions
    dropped_frames: AtomicU64,

    /// The error that ended the session, if any
    last_error: RwLock<Option<String>>,

    /// Forced-termination signal; the bridge watches the receiving side
    cancel: watch::Sender<bool>,
}

impl CallSession {
    pub fn new(
        session_id: String,
        vendor: String,
        agent_id: String,
        call_id: Option<String>,
        stream_id: Option<String>,
        dynamic_variables: HashMap<String, Value>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);

        Self {
            session_id,
            vendor,
            agent_id,
            dynamic_variables,
            call_id: RwLock::new(call_id),
            stream_id: RwLock::new(stream_id),
            state: RwLock::new(SessionState::Initializing),
            started_at: Utc::now(),
            ended_at: RwLock::new(None),
            dropped_frames: AtomicU64::new(0),
            last_error: RwLock::new(None),
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    /// Advance the state machine. Backward transitions are refused, which
    /// makes every caller's transition attempt idempotent: the first
    /// observed trigger wins and later ones are no-ops.
    ///
    /// Returns true when the state actually changed.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.write().unwrap();
        if next <= *state {
            return false;
        }
        *state = next;

        if next == SessionState::Ended {
            let mut ended_at = self.ended_at.write().unwrap();
            if ended_at.is_none() {
                *ended_at = Some(Utc::now());
            }
        }

        true
    }

    pub fn call_id(&self) -> Option<String> {
        self.call_id.read().unwrap().clone()
    }

    pub fn stream_id(&self) -> Option<String> {
        self.stream_id.read().unwrap().clone()
    }

    /// Record the identifiers delivered by the vendor start event.
    pub fn set_call_refs(&self, call_id: Option<String>, stream_id: String) {
        if call_id.is_some() {
            *self.call_id.write().unwrap() = call_id;
        }
        *self.stream_id.write().unwrap() = Some(stream_id);
    }

    pub fn record_dropped_frame(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn set_error(&self, message: String) {
        *self.last_error.write().unwrap() = Some(message);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *self.ended_at.read().unwrap()
    }

    /// Session duration in seconds: up to now while live, up to `ended_at`
    /// once terminal.
    pub fn duration_seconds(&self) -> f64 {
        let end_time = self.ended_at().unwrap_or_else(Utc::now);
        let duration = end_time.signed_duration_since(self.started_at);
        duration.num_milliseconds() as f64 / 1000.0
    }

    /// Subscribe to the forced-termination signal.
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Fire the forced-termination signal. The owning bridge reacts by
    /// driving its teardown; calling this on a dead bridge is harmless.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Monitoring snapshot of this session.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id,
            "vendor": self.vendor,
            "agent_id": self.agent_id,
            "call_id": self.call_id(),
            "stream_id": self.stream_id(),
            "state": self.state().as_str(),
            "started_at": self.started_at.to_rfc3339(),
            "ended_at": self.ended_at().map(|t| t.to_rfc3339()),
            "duration_seconds": self.duration_seconds(),
            "dropped_frames": self.dropped_frames(),
            "last_error": self.last_error(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> CallSession {
        CallSession::new(
            id.to_string(),
            "twilio".to_string(),
            "agent_123".to_string(),
            None,
            None,
            HashMap::new(),
        )
    }

    #[test]
    fn test_states_advance_monotonically() {
        let s = session("s1");
        assert_eq!(s.state(), SessionState::Initializing);

        assert!(s.advance(SessionState::Active));
        assert!(s.advance(SessionState::Ending));
        assert!(s.advance(SessionState::Ended));

        // No re-entry from the terminal state.
        assert!(!s.advance(SessionState::Active));
        assert!(!s.advance(SessionState::Ending));
        assert_eq!(s.state(), SessionState::Ended);
    }

    #[test]
    fn test_skipping_states_is_allowed_backwards_is_not() {
        let s = session("s2");
        // A setup failure jumps straight from Initializing to Ended.
        assert!(s.advance(SessionState::Ended));
        assert!(!s.advance(SessionState::Active));
    }

    #[test]
    fn test_ended_at_set_exactly_once() {
        let s = session("s3");
        assert!(s.ended_at().is_none());

        s.advance(SessionState::Ended);
        let first = s.ended_at().unwrap();

        // A second (refused) transition must not touch the timestamp.
        s.advance(SessionState::Ended);
        assert_eq!(s.ended_at().unwrap(), first);
    }

    #[test]
    fn test_live_states_count_for_admission() {
        assert!(SessionState::Initializing.is_live());
        assert!(SessionState::Active.is_live());
        assert!(!SessionState::Ending.is_live());
        assert!(!SessionState::Ended.is_live());
    }

    #[test]
    fn test_cancel_signal_reaches_subscriber() {
        let s = session("s4");
        let mut rx = s.cancelled();
        assert!(!*rx.borrow());

        s.cancel();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn test_call_refs_recorded_from_start_event() {
        let s = session("s5");
        s.set_call_refs(Some("CA1".to_string()), "MZ1".to_string());
        assert_eq!(s.call_id().as_deref(), Some("CA1"));
        assert_eq!(s.stream_id().as_deref(), Some("MZ1"));

        // A later event without a call id keeps the existing one.
        s.set_call_refs(None, "MZ2".to_string());
        assert_eq!(s.call_id().as_deref(), Some("CA1"));
    }
}
