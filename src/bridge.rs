//! # Call Bridge
//!
//! The duplex relay state machine for one phone call. Each dialer WebSocket
//! connection becomes one [`CallBridge`] actor that owns both legs of the
//! call: the dialer-side socket (driven by the actor context) and the
//! agent-side socket (driven by two auxiliary tokio tasks). The two relay
//! directions never block each other:
//!
//! - **dialer → agent**: vendor media events are converted to canonical PCM
//!   in the actor's message handler and pushed onto a bounded channel that a
//!   writer task drains into the agent socket
//! - **agent → dialer**: a reader task converts agent audio to the vendor
//!   format and mails the framed message back to the actor, which writes it
//!   to the dialer socket
//!
//! ## Interruption Handling:
//! When the agent signals barge-in, every frame accepted for transmission to
//! the dialer but not yet sent must be discarded before any newer frame goes
//! out. Frames are stamped with a generation number at conversion time; an
//! interruption bumps the generation, so stale frames still sitting in the
//! actor mailbox are dropped on arrival, and the vendor's own buffer is
//! flushed with its `clear` message.
//!
//! ## Lifecycle:
//! `Initializing` (await vendor start, admit session, connect agent) →
//! `Active` (both relays running) → `Ending` (bounded flush window) →
//! `Ended` (terminal). Whichever termination trigger reaches the actor
//! first wins; the monotonic session state makes later triggers no-ops.

use crate::agent::elevenlabs::{self, AgentSource};
use crate::agent::AgentEvent;
use crate::audio::Downsampler;
use crate::config::AppConfig;
use crate::dialer::{DialerAdapter, DialerEvent};
use crate::error::BridgeError;
use crate::session::{CallSession, SessionRegistry, SessionState};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as AgentMessage;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

/// How often the actor checks heartbeat and call-duration limits.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(15);

/// Dialer considered gone after this long without any traffic.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Generation stamp guarding the agent → dialer direction.
///
/// Audio frames are stamped when converted; an interruption bumps the
/// current generation, making every previously stamped frame stale. The
/// actor drops stale frames on arrival, which guarantees no pre-interruption
/// audio is ever delivered after post-interruption audio.
#[derive(Debug, Default)]
pub struct InterruptionGate {
    current: AtomicU64,
}

impl InterruptionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp for a frame produced now.
    pub fn stamp(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Invalidate everything stamped so far.
    pub fn bump(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether a stamped frame predates the newest interruption.
    pub fn is_stale(&self, stamp: u64) -> bool {
        stamp < self.current.load(Ordering::SeqCst)
    }
}

/// WebSocket actor bridging one dialer connection to one agent connection.
pub struct CallBridge {
    adapter: Arc<DialerAdapter>,
    registry: Arc<SessionRegistry>,
    config: AppConfig,

    /// Session owned by this bridge; None until the vendor start event
    session: Option<Arc<CallSession>>,

    /// Dialer → agent channel; None until the agent leg is up
    agent_tx: Option<mpsc::Sender<String>>,

    gate: Arc<InterruptionGate>,
    last_heartbeat: Instant,
    connected_at: Instant,
}

impl CallBridge {
    pub fn new(adapter: Arc<DialerAdapter>, registry: Arc<SessionRegistry>, config: AppConfig) -> Self {
        Self {
            adapter,
            registry,
            config,
            session: None,
            agent_tx: None,
            gate: Arc::new(InterruptionGate::new()),
            last_heartbeat: Instant::now(),
            connected_at: Instant::now(),
        }
    }

    fn session_id(&self) -> &str {
        self.session
            .as_ref()
            .map(|s| s.session_id.as_str())
            .unwrap_or("-")
    }

    /// Vendor `Start`: admit the session, then establish the agent leg.
    fn handle_start(
        &mut self,
        call_id: Option<String>,
        stream_id: String,
        custom_parameters: HashMap<String, String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if self.session.is_some() {
            warn!("Duplicate start event on stream {}, ignoring", stream_id);
            return;
        }

        let agent_id = custom_parameters
            .get("agent_id")
            .cloned()
            .unwrap_or_else(|| self.config.agent.default_agent_id.clone());

        if agent_id.is_empty() {
            error!("Start event without agent id and no default configured");
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Policy,
                description: Some("no agent configured".to_string()),
            }));
            ctx.stop();
            return;
        }

        let dynamic_variables = dynamic_variables_from_params(&custom_parameters);

        // Admission: serialized ceiling check + insert. A rejection happens
        // before the agent leg or any relay resources exist.
        let session = match self.registry.create_session(
            None,
            self.adapter.name(),
            &agent_id,
            call_id.clone(),
            Some(stream_id.clone()),
            dynamic_variables.clone(),
        ) {
            Ok(session) => session,
            Err(err @ BridgeError::CapacityExceeded { .. }) => {
                warn!("Admission refused: {}", err);
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Again,
                    description: Some(err.to_string()),
                }));
                ctx.stop();
                return;
            }
            Err(err) => {
                error!("Session admission failed: {}", err);
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some(err.to_string()),
                }));
                ctx.stop();
                return;
            }
        };

        info!(
            "Media stream started - session: {}, call: {:?}, stream: {}",
            session.session_id, call_id, stream_id
        );
        self.session = Some(session.clone());

        // Forced termination (operator or max-duration from the registry
        // side) arrives through the session's cancel signal.
        let addr = ctx.address();
        let mut cancelled = session.cancelled();
        tokio::spawn(async move {
            while cancelled.changed().await.is_ok() {
                if *cancelled.borrow() {
                    addr.do_send(ForceEnd);
                    break;
                }
            }
        });

        // Establish the agent leg off the actor thread.
        let addr = ctx.address();
        let adapter = self.adapter.clone();
        let gate = self.gate.clone();
        let agent_cfg = self.config.agent.clone();
        let timeout = Duration::from_millis(self.config.bridge.agent_connect_timeout_ms);
        let queue_depth = self.config.bridge.audio_queue_depth;
        let session_for_tasks = session.clone();

        tokio::spawn(async move {
            match elevenlabs::connect(&agent_cfg, &session_for_tasks.agent_id, timeout).await {
                Ok((mut sink, source)) => {
                    let init = elevenlabs::initialization_message(&session_for_tasks.dynamic_variables);
                    if let Err(e) = sink.send(AgentMessage::Text(init)).await {
                        addr.do_send(SetupFailed {
                            error: format!("agent initialization failed: {}", e),
                        });
                        return;
                    }

                    let (tx, mut rx) = mpsc::channel::<String>(queue_depth);

                    // Writer: drains the bounded channel into the agent
                    // socket; exits once every sender is dropped.
                    let writer_addr = addr.clone();
                    tokio::spawn(async move {
                        while let Some(text) = rx.recv().await {
                            if let Err(e) = sink.send(AgentMessage::Text(text)).await {
                                writer_addr.do_send(AgentClosed {
                                    reason: format!("agent socket write failed: {}", e),
                                });
                                return;
                            }
                        }
                        let _ = sink.close().await;
                    });

                    // Reader: the agent → dialer relay direction.
                    tokio::spawn(relay_agent_to_dialer(
                        source,
                        tx.clone(),
                        addr.clone(),
                        adapter,
                        gate,
                        session_for_tasks,
                    ));

                    addr.do_send(AgentReady { tx });
                }
                Err(err) => {
                    addr.do_send(SetupFailed {
                        error: err.to_string(),
                    });
                }
            }
        });
    }

    /// Vendor `Media`: dialer → agent relay step.
    fn handle_media(&mut self, payload: &str) {
        let Some(session) = &self.session else {
            debug!("Media before start event, dropping frame");
            return;
        };

        if session.state() != SessionState::Active {
            debug!("Media while {}, dropping frame", session.state().as_str());
            return;
        }

        let Some(tx) = &self.agent_tx else { return };

        match self.adapter.transcoder.to_canonical(payload) {
            Ok(pcm) => {
                let chunk = elevenlabs::audio_chunk_message(&pcm);
                match tx.try_send(chunk) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // A stalled agent socket must not stall the dialer
                        // read loop; shedding the frame keeps us live.
                        session.record_dropped_frame();
                        warn!(
                            "Session {}: agent audio queue full, frame dropped",
                            session.session_id
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        // Writer is gone; AgentClosed is already in flight.
                        debug!("Session {}: agent channel closed", session.session_id);
                    }
                }
            }
            Err(err) => {
                session.record_dropped_frame();
                warn!("Session {}: {}", session.session_id, err);
            }
        }
    }

    /// Enter `Ending`: give in-flight frames a bounded window, then stop.
    fn begin_ending(&mut self, reason: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = &self.session else {
            ctx.stop();
            return;
        };

        if !session.advance(SessionState::Ending) {
            return;
        }
        info!("Session {} ending: {}", session.session_id, reason);

        // Dropping the sender lets the writer drain queued frames to the
        // agent and then close that socket.
        self.agent_tx.take();

        let flush_window = Duration::from_millis(self.config.bridge.flush_window_ms);
        ctx.run_later(flush_window, |_, ctx| {
            ctx.stop();
        });
    }

    /// Immediate teardown for fatal conditions: no flush window.
    fn abort(&mut self, reason: &str, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(session) = &self.session {
            session.set_error(reason.to_string());
            session.advance(SessionState::Ending);
        }
        self.agent_tx.take();
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Error,
            description: Some(reason.to_string()),
        }));
        ctx.stop();
    }
}

/// The agent → dialer relay direction, run as its own task so a stalled
/// dialer read never blocks agent audio already in flight.
async fn relay_agent_to_dialer(
    mut source: AgentSource,
    pong_tx: mpsc::Sender<String>,
    addr: Addr<CallBridge>,
    adapter: Arc<DialerAdapter>,
    gate: Arc<InterruptionGate>,
    session: Arc<CallSession>,
) {
    // Carry state for 16kHz -> 8kHz decimation lives here, owned by this
    // direction of this call alone.
    let mut downsampler = Downsampler::new();
    let stream_id = session.stream_id().unwrap_or_default();

    let reason = loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break format!("agent socket error: {}", e),
            None => break "agent closed connection".to_string(),
        };

        let text = match message {
            AgentMessage::Text(text) => text,
            AgentMessage::Close(_) => break "agent closed connection".to_string(),
            // Protocol-level ping/pong is handled by the transport.
            _ => continue,
        };

        match elevenlabs::parse_event(&text) {
            Ok(AgentEvent::Audio(pcm)) => {
                match adapter.transcoder.from_canonical(&mut downsampler, &pcm) {
                    Ok(payload) => {
                        let wire = adapter.messages.audio_message(&stream_id, &payload);
                        addr.do_send(ForwardFrame {
                            text: wire.to_string(),
                            stamp: gate.stamp(),
                        });
                    }
                    Err(err) => {
                        session.record_dropped_frame();
                        warn!("Session {}: {}", session.session_id, err);
                    }
                }
            }
            Ok(AgentEvent::Interruption) => {
                // Everything stamped before this point is now stale.
                gate.bump();
                addr.do_send(FlushBacklog);
            }
            Ok(AgentEvent::Ping { event_id }) => {
                if pong_tx
                    .send(elevenlabs::pong_message(event_id))
                    .await
                    .is_err()
                {
                    break "agent writer gone".to_string();
                }
            }
            Ok(AgentEvent::AgentResponse(response)) => {
                info!("Session {}: agent said: {}", session.session_id, response);
            }
            Ok(AgentEvent::UserTranscript(transcript)) => {
                info!("Session {}: caller said: {}", session.session_id, transcript);
            }
            Ok(AgentEvent::Other { kind }) => {
                debug!("Session {}: ignoring agent event '{}'", session.session_id, kind);
            }
            Err(err) => {
                // Malformed message: ignore it, keep the bridge alive.
                warn!("Session {}: {}", session.session_id, err);
            }
        }
    };

    addr.do_send(AgentClosed { reason });
}

/// Build the agent's dynamic-variable context from vendor custom parameters.
///
/// Routing keys are stripped, and the string booleans vendors produce when
/// round-tripping parameters through call-setup documents come back as real
/// booleans.
fn dynamic_variables_from_params(params: &HashMap<String, String>) -> HashMap<String, Value> {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != "agent_id" && key.as_str() != "to_number")
        .map(|(key, value)| {
            let value = match value.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => Value::String(other.to_string()),
            };
            (key.clone(), value)
        })
        .collect()
}

// Internal actor messages

/// Agent leg established; carries the dialer → agent channel.
#[derive(Message)]
#[rtype(result = "()")]
struct AgentReady {
    tx: mpsc::Sender<String>,
}

/// Agent leg could not be established during `Initializing`.
#[derive(Message)]
#[rtype(result = "()")]
struct SetupFailed {
    error: String,
}

/// One converted audio frame headed for the dialer, generation-stamped.
#[derive(Message)]
#[rtype(result = "()")]
struct ForwardFrame {
    text: String,
    stamp: u64,
}

/// Agent barge-in: flush the vendor-side buffer too.
#[derive(Message)]
#[rtype(result = "()")]
struct FlushBacklog;

/// The agent connection is gone (close or error).
#[derive(Message)]
#[rtype(result = "()")]
struct AgentClosed {
    reason: String,
}

/// Forced termination via the session registry.
#[derive(Message)]
#[rtype(result = "()")]
struct ForceEnd;

impl Actor for CallBridge {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Dialer connection started ({})", self.adapter.name());

        ctx.run_interval(HOUSEKEEPING_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > HEARTBEAT_TIMEOUT {
                warn!("Session {}: dialer heartbeat timeout", act.session_id());
                act.abort("dialer heartbeat timeout", ctx);
                return;
            }

            let max_duration = Duration::from_secs(act.config.bridge.max_call_duration_secs);
            if act.connected_at.elapsed() > max_duration {
                warn!("Session {}: max call duration reached", act.session_id());
                act.begin_ending("max call duration reached", ctx);
                return;
            }

            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.agent_tx.take();

        if let Some(session) = &self.session {
            let reason = session.last_error();
            let _ = self
                .registry
                .end_session(&session.session_id, reason.as_deref());
            info!(
                "Session {} closed after {:.1}s ({} dropped frames)",
                session.session_id,
                session.duration_seconds(),
                session.dropped_frames()
            );
        } else {
            info!("Dialer connection closed before any session started");
        }
    }
}

/// Inbound dialer traffic: the dialer → agent relay direction.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallBridge {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => match self.adapter.events.parse_incoming(&text) {
                Ok(DialerEvent::Start {
                    call_id,
                    stream_id,
                    custom_parameters,
                }) => {
                    self.handle_start(call_id, stream_id, custom_parameters, ctx);
                }
                Ok(DialerEvent::Media { payload }) => {
                    self.handle_media(&payload);
                }
                Ok(DialerEvent::Dtmf { digit }) => {
                    // The agent protocol has no DTMF equivalent.
                    info!("Session {}: DTMF '{}' dropped", self.session_id(), digit);
                }
                Ok(DialerEvent::Mark { name }) => {
                    debug!("Session {}: mark '{}'", self.session_id(), name);
                }
                Ok(DialerEvent::Stop) => {
                    self.begin_ending("dialer stop event", ctx);
                }
                Ok(DialerEvent::Unknown { event }) => {
                    warn!("Session {}: unknown dialer event '{}'", self.session_id(), event);
                }
                Err(err) => {
                    // Malformed wire message: log and ignore.
                    warn!("Session {}: {}", self.session_id(), err);
                }
            },
            Ok(ws::Message::Binary(_)) => {
                debug!("Unexpected binary frame from dialer, ignoring");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!("Session {}: dialer closed: {:?}", self.session_id(), reason);
                if let Some(session) = &self.session {
                    session.advance(SessionState::Ending);
                }
                self.agent_tx.take();
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Session {}: dialer socket error: {}", self.session_id(), err);
                self.abort(&format!("dialer socket error: {}", err), ctx);
            }
        }
    }
}

impl Handler<AgentReady> for CallBridge {
    type Result = ();

    fn handle(&mut self, msg: AgentReady, _ctx: &mut Self::Context) {
        let Some(session) = &self.session else { return };

        if session.advance(SessionState::Active) {
            info!("Session {} active", session.session_id);
            self.agent_tx = Some(msg.tx);
        } else {
            // Termination won the race against setup; dropping the sender
            // closes the freshly opened agent leg.
            debug!(
                "Session {} already {}, discarding agent leg",
                session.session_id,
                session.state().as_str()
            );
        }
    }
}

impl Handler<SetupFailed> for CallBridge {
    type Result = ();

    fn handle(&mut self, msg: SetupFailed, ctx: &mut Self::Context) {
        error!("Session {}: {}", self.session_id(), msg.error);
        self.abort(&msg.error, ctx);
    }
}

impl Handler<ForwardFrame> for CallBridge {
    type Result = ();

    fn handle(&mut self, msg: ForwardFrame, ctx: &mut Self::Context) {
        // Frames stamped before the latest interruption are the abandoned
        // backlog; they must never reach the dialer.
        if self.gate.is_stale(msg.stamp) {
            debug!("Session {}: dropping flushed frame", self.session_id());
            return;
        }

        ctx.text(msg.text);
    }
}

impl Handler<FlushBacklog> for CallBridge {
    type Result = ();

    fn handle(&mut self, _msg: FlushBacklog, ctx: &mut Self::Context) {
        info!("Session {}: interruption, flushing backlog", self.session_id());

        let stream_id = self
            .session
            .as_ref()
            .and_then(|s| s.stream_id())
            .unwrap_or_default();

        if let Some(clear) = self.adapter.messages.clear_message(&stream_id) {
            ctx.text(clear.to_string());
        }
    }
}

impl Handler<AgentClosed> for CallBridge {
    type Result = ();

    fn handle(&mut self, msg: AgentClosed, ctx: &mut Self::Context) {
        let session_active = self
            .session
            .as_ref()
            .map(|s| !s.state().is_terminal())
            .unwrap_or(false);

        if session_active {
            info!("Session {}: {}", self.session_id(), msg.reason);
        }

        // The agent leg is gone; nothing left to flush toward it.
        if let Some(session) = &self.session {
            session.advance(SessionState::Ending);
        }
        self.agent_tx.take();
        ctx.close(None);
        ctx.stop();
    }
}

impl Handler<ForceEnd> for CallBridge {
    type Result = ();

    fn handle(&mut self, _msg: ForceEnd, ctx: &mut Self::Context) {
        info!("Session {}: forced termination", self.session_id());
        self.agent_tx.take();
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: Some("session terminated".to_string()),
        }));
        ctx.stop();
    }
}

/// WebSocket endpoint handler: upgrade `GET /{vendor}/media-stream` into a
/// [`CallBridge`] actor bound to that vendor's adapter.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let vendor = path.into_inner();

    let adapter = match state.adapters.get(&vendor) {
        Ok(adapter) => adapter,
        Err(err) => {
            warn!("Media stream for unknown vendor '{}'", vendor);
            return Err(actix_web::error::ErrorNotFound(err.to_string()));
        }
    };

    info!(
        "New {} media-stream connection from {:?}",
        vendor,
        req.connection_info().peer_addr()
    );

    let bridge = CallBridge::new(adapter, state.sessions.clone(), state.get_config());
    ws::start(bridge, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_invalidates_earlier_stamps() {
        let gate = InterruptionGate::new();

        let before = gate.stamp();
        assert!(!gate.is_stale(before));

        gate.bump();
        let after = gate.stamp();

        // Every frame stamped before the interruption is stale; frames
        // stamped after it are deliverable.
        assert!(gate.is_stale(before));
        assert!(!gate.is_stale(after));
    }

    #[test]
    fn test_gate_ordering_across_multiple_interruptions() {
        let gate = InterruptionGate::new();

        let g0 = gate.stamp();
        gate.bump();
        let g1 = gate.stamp();
        gate.bump();
        let g2 = gate.stamp();

        assert!(gate.is_stale(g0));
        assert!(gate.is_stale(g1));
        assert!(!gate.is_stale(g2));
    }

    #[test]
    fn test_dynamic_variables_strip_routing_keys() {
        let mut params = HashMap::new();
        params.insert("agent_id".to_string(), "agent_123".to_string());
        params.insert("to_number".to_string(), "+15550100".to_string());
        params.insert("name".to_string(), "Ada".to_string());
        params.insert("emi_eligible".to_string(), "true".to_string());
        params.insert("waiver_eligible".to_string(), "false".to_string());

        let vars = dynamic_variables_from_params(&params);

        assert!(!vars.contains_key("agent_id"));
        assert!(!vars.contains_key("to_number"));
        assert_eq!(vars["name"], Value::String("Ada".to_string()));
        assert_eq!(vars["emi_eligible"], Value::Bool(true));
        assert_eq!(vars["waiver_eligible"], Value::Bool(false));
    }
}
