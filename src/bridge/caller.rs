//! # Call-Leg Listener
//!
//! One actor per inbound media-stream WebSocket connection. The actor owns
//! the `CallSession` outright, so every state mutation (gate transitions,
//! stream SID assignment, counters) happens inside its mailbox and cannot
//! race a media frame.
//!
//! ## Connection lifecycle:
//! 1. **started**: heartbeat timer armed; session setup (negotiate →
//!    connect → configure) kicked off in a background task.
//! 2. Setup task reports back via `Negotiated` / `StreamOpened` /
//!    `SetupFailed` messages; the readiness gate advances accordingly.
//! 3. Provider events (`start`/`media`/`stop`) and backend events both run
//!    through the relay core; the actor only executes the returned actions.
//! 4. **stopped**: the single teardown funnel. Whichever leg dies first,
//!    the other is released here and the registry entry removed; the
//!    symmetric-teardown invariant holds by construction.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bridge::backend::{self, BackendSignal};
use crate::bridge::protocol::{BackendOutbound, ProviderEvent};
use crate::bridge::relay::{self, RelayAction};
use crate::bridge::session::{CallSession, SessionHandle};
use crate::config::AppConfig;
use crate::state::AppState;

/// How often the actor pings the provider socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long without any pong before the connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor bridging one phone call to one translation session.
pub struct CallerLeg {
    /// Local identifier for log correlation; exists from the moment the
    /// socket opens, before negotiation yields a backend session id.
    connection_id: uuid::Uuid,
    state: AppState,
    config: AppConfig,
    session: CallSession,

    /// Sender feeding the backend writer task; `None` until setup completes
    /// and again after teardown. Dropping it releases the backend leg.
    backend_tx: Option<mpsc::Sender<BackendOutbound>>,

    last_heartbeat: Instant,
}

impl CallerLeg {
    pub fn new(state: AppState) -> Self {
        let config = state.get_config();
        Self {
            connection_id: uuid::Uuid::new_v4(),
            state,
            config,
            session: CallSession::new(),
            backend_tx: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Kick off session setup: negotiation, then the streaming connect.
    /// Both report back into the mailbox; a failure at either step stops
    /// the actor, which closes the caller leg (setup failures never leave a
    /// registered session behind).
    fn start_session_setup(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let config = self.config.clone();
        let client = self.state.http_client.clone();
        let addr = ctx.address();
        let recipient = addr.clone().recipient::<BackendSignal>();

        tokio::spawn(async move {
            let session_id = match backend::negotiate(&client, &config).await {
                Ok(id) => id,
                Err(e) => {
                    addr.do_send(SetupFailed {
                        error: e.to_string(),
                    });
                    return;
                }
            };
            addr.do_send(Negotiated {
                session_id: session_id.clone(),
            });

            match backend::open_stream(&config, recipient).await {
                Ok(tx) => addr.do_send(StreamOpened { backend_tx: tx }),
                Err(e) => addr.do_send(SetupFailed {
                    error: e.to_string(),
                }),
            }
        });
    }

    /// Execute the relay core's actions in order.
    fn execute_actions(&mut self, actions: Vec<RelayAction>, ctx: &mut ws::WebsocketContext<Self>) {
        for action in actions {
            match action {
                RelayAction::SendToBackend(event) => {
                    let Some(tx) = &self.backend_tx else {
                        debug!("No backend leg; discarding outbound event");
                        continue;
                    };
                    match tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Bounded queue: drop on overflow instead of
                            // growing without limit.
                            self.session.frames_dropped += 1;
                            warn!("Backend send queue full; dropping frame");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!("Backend writer already gone");
                        }
                    }
                }
                RelayAction::SendToCaller(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json) => ctx.text(json),
                    Err(e) => error!("Failed to serialize caller envelope: {}", e),
                },
                RelayAction::BeginTeardown => {
                    self.session.begin_close();
                    ctx.stop();
                }
            }
        }
    }

    fn handle_provider_event(&mut self, event: ProviderEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let had_stream_sid = self.session.stream_sid.is_some();
        let actions = relay::on_provider_event(&mut self.session, event);

        // Sync a freshly learned stream SID into the registry so the entry
        // reflects both identifiers.
        if !had_stream_sid {
            if let (Some(session_id), Some(stream_sid)) =
                (&self.session.session_id, &self.session.stream_sid)
            {
                self.state.registry.set_stream_sid(session_id, stream_sid);
            }
        }

        self.execute_actions(actions, ctx);
    }

    /// Release everything this call holds: drop the backend sender (ending
    /// the writer task, which closes the backend socket), remove the
    /// registry entry, and mark the session closed. Called from `stopped`,
    /// so it runs exactly once per call regardless of which leg died first.
    fn finish_teardown(&mut self) {
        self.session.begin_close();

        // Dropping our sender (and the registry's clone below) ends the
        // backend writer task, which closes the backend socket.
        self.backend_tx = None;
        if let Some(session_id) = &self.session.session_id {
            if self.state.registry.remove(session_id) {
                debug!(session_id = %session_id, "Registry entry removed");
            }
        }
        self.session.mark_closed();
    }

    /// A backend loss counts as mid-call once setup completed (the backend
    /// sender exists), even if the configuration ack has not arrived yet;
    /// before that it is a setup-phase event.
    fn backend_loss_is_midcall(&self) -> bool {
        self.backend_tx.is_some()
    }
}

/// Negotiation succeeded; the backend assigned a session identifier.
#[derive(Message)]
#[rtype(result = "()")]
struct Negotiated {
    session_id: String,
}

/// The streaming socket is open and the configuration event has been sent.
#[derive(Message)]
#[rtype(result = "()")]
struct StreamOpened {
    backend_tx: mpsc::Sender<BackendOutbound>,
}

/// Negotiation or streaming connect failed; abort this call.
#[derive(Message)]
#[rtype(result = "()")]
struct SetupFailed {
    error: String,
}

impl Actor for CallerLeg {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Caller media stream connected");
        self.state.increment_active_connections();

        // Protocol-level heartbeat: providers answer WS pings even though
        // they never send JSON keepalives.
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Caller heartbeat timeout; closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        self.start_session_setup(ctx);
    }

    /// The single teardown funnel. Runs no matter which leg died first:
    /// caller close/error stops the actor directly; backend close/error
    /// arrives as `BackendSignal::Closed` and stops it too. Either way the
    /// backend sender is dropped (closing that socket) and the registry
    /// entry removed; never one leg left open.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.finish_teardown();

        self.state.decrement_active_connections();
        self.state.record_session_frames(
            self.session.frames_from_caller,
            self.session.frames_to_caller,
            self.session.frames_dropped,
        );

        info!(
            connection_id = %self.connection_id,
            session_id = self.session.session_id.as_deref().unwrap_or("-"),
            stream_sid = self.session.stream_sid.as_deref().unwrap_or("-"),
            frames_from_caller = self.session.frames_from_caller,
            frames_to_caller = self.session.frames_to_caller,
            frames_dropped = self.session.frames_dropped,
            "Call session closed"
        );
    }
}

impl Handler<Negotiated> for CallerLeg {
    type Result = ();

    fn handle(&mut self, msg: Negotiated, ctx: &mut Self::Context) {
        if let Err(e) = self.session.mark_negotiated(msg.session_id) {
            // The caller hung up while negotiation was in flight.
            debug!("Negotiation completed after close: {}", e);
            ctx.stop();
        }
    }
}

impl Handler<StreamOpened> for CallerLeg {
    type Result = ();

    fn handle(&mut self, msg: StreamOpened, ctx: &mut Self::Context) {
        if let Err(e) = self.session.mark_configuring() {
            debug!("Backend stream opened after close: {}", e);
            ctx.stop();
            return;
        }

        let session_id = match &self.session.session_id {
            Some(id) => id.clone(),
            None => {
                // mark_configuring only succeeds after mark_negotiated, so
                // this indicates a bug rather than a runtime condition.
                error!("Configuring without a session id; aborting call");
                ctx.stop();
                return;
            }
        };

        let handle = SessionHandle {
            stream_sid: self.session.stream_sid.clone(),
            backend_tx: msg.backend_tx.clone(),
            created_at: self.session.created_at,
        };
        if let Err(e) = self.state.registry.insert(&session_id, handle) {
            warn!(session_id = %session_id, "Session rejected: {}", e);
            self.state.record_setup_failure();
            ctx.stop();
            return;
        }

        self.backend_tx = Some(msg.backend_tx);
        self.state.record_session_started();
        info!(session_id = %session_id, "Translation session configuring");
    }
}

impl Handler<SetupFailed> for CallerLeg {
    type Result = ();

    fn handle(&mut self, msg: SetupFailed, ctx: &mut Self::Context) {
        warn!("Session setup failed: {}", msg.error);
        self.state.record_setup_failure();
        // No registry entry exists yet; stopping closes the caller leg.
        ctx.stop();
    }
}

impl Handler<BackendSignal> for CallerLeg {
    type Result = ();

    fn handle(&mut self, msg: BackendSignal, ctx: &mut Self::Context) {
        match msg {
            BackendSignal::Event(event) => {
                let actions = relay::on_backend_event(&mut self.session, event);
                self.execute_actions(actions, ctx);
            }
            BackendSignal::Closed { reason } => {
                if self.backend_loss_is_midcall() {
                    warn!("Backend leg lost mid-call: {}", reason);
                    self.state.record_midcall_failure();
                } else {
                    debug!("Backend leg closed: {}", reason);
                }
                self.session.begin_close();
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallerLeg {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                if let Some(event) = parse_provider_frame(&text) {
                    self.handle_provider_event(event, ctx);
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Unexpected binary frame on media stream; ignoring");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Caller socket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Unexpected continuation frame on media stream");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!("Caller socket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Parse one text frame from the caller socket. Malformed JSON never
/// terminates the connection; only well-formed stop/close/error events do.
/// A parse failure is logged and yields nothing.
fn parse_provider_frame(text: &str) -> Option<ProviderEvent> {
    match serde_json::from_str::<ProviderEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Malformed JSON from caller socket: {}", e);
            None
        }
    }
}

/// WebSocket endpoint handler for the fixed media-stream path.
///
/// Path gating happens in actix routing: this handler is mounted only at
/// the configured `/<provider>-media` path, and no default WebSocket route
/// exists, so connections to any other path are rejected at the HTTP layer.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New media-stream connection from {:?}",
        req.connection_info().peer_addr()
    );

    let actor = CallerLeg::new(app_state.get_ref().clone());
    ws::start(actor, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::session::ReadyState;
    use crate::config::AppConfig;
    use chrono::Utc;

    /// An actor mid-call: session ready, backend sender held, registry
    /// entry in place. Exactly the state `stopped()` tears down.
    fn live_leg(
        state: &AppState,
        session_id: &str,
    ) -> (CallerLeg, mpsc::Receiver<BackendOutbound>) {
        let mut leg = CallerLeg::new(state.clone());
        leg.session.mark_negotiated(session_id.to_string()).unwrap();
        leg.session.mark_configuring().unwrap();
        leg.session.mark_ready().unwrap();
        leg.session.stream_sid = Some("MZ1".to_string());

        let (tx, rx) = mpsc::channel(8);
        state
            .registry
            .insert(
                session_id,
                SessionHandle {
                    stream_sid: leg.session.stream_sid.clone(),
                    backend_tx: tx.clone(),
                    created_at: Utc::now(),
                },
            )
            .unwrap();
        leg.backend_tx = Some(tx);
        (leg, rx)
    }

    /// Caller closes first: the backend leg is released in the same
    /// teardown and the registry entry removed.
    #[tokio::test]
    async fn test_teardown_caller_closes_first() {
        let state = AppState::new(AppConfig::default());
        let (mut leg, mut rx) = live_leg(&state, "s1");

        leg.finish_teardown();

        assert_eq!(leg.session.ready_state(), ReadyState::Closed);
        assert!(leg.backend_tx.is_none());
        assert!(!state.registry.contains("s1"));
        // Both senders dropped; the writer task would see end-of-stream,
        // closing the backend socket.
        assert!(rx.recv().await.is_none());
    }

    /// Backend closes first: the same funnel runs (the closed signal stops
    /// the actor, which runs the teardown) and leaves nothing behind either.
    #[tokio::test]
    async fn test_teardown_backend_closes_first() {
        let state = AppState::new(AppConfig::default());
        let (mut leg, mut rx) = live_leg(&state, "s1");

        // Backend leg died: mark the close, then the stopped() funnel runs.
        leg.session.begin_close();
        assert!(!leg.session.can_forward_caller_audio());

        leg.finish_teardown();

        assert_eq!(leg.session.ready_state(), ReadyState::Closed);
        assert!(!state.registry.contains("s1"));
        assert!(rx.recv().await.is_none());
    }

    /// A backend socket lost after setup finished but before the
    /// configuration ack arrives still counts as a mid-call loss; before
    /// setup finished it does not.
    #[test]
    fn test_backend_loss_classification_covers_configuring_window() {
        let state = AppState::new(AppConfig::default());
        let mut leg = CallerLeg::new(state);

        // Setup still in flight: a backend close here is a setup-phase event.
        assert!(!leg.backend_loss_is_midcall());

        // Setup finished (sender held) but the gate has not opened yet.
        leg.session.mark_negotiated("s1".to_string()).unwrap();
        leg.session.mark_configuring().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        leg.backend_tx = Some(tx);
        assert!(!leg.session.can_forward_caller_audio());
        assert!(leg.backend_loss_is_midcall());

        // And of course once the call is live.
        leg.session.mark_ready().unwrap();
        assert!(leg.backend_loss_is_midcall());
    }

    /// Garbage on the wire is skipped; the very next well-formed frame
    /// still parses. The connection-level behavior (never closing on a
    /// parse failure) follows from the skip.
    #[test]
    fn test_malformed_frame_is_skipped_not_fatal() {
        assert!(parse_provider_frame("{not json at all").is_none());
        assert!(parse_provider_frame(r#"{"no_event_tag":true}"#).is_none());

        let event = parse_provider_frame(r#"{"event":"media","media":{"payload":"AAAA"}}"#);
        assert!(matches!(event, Some(ProviderEvent::Media { .. })));
    }

    /// Teardown of one session must not disturb another.
    #[tokio::test]
    async fn test_teardown_is_per_session() {
        let state = AppState::new(AppConfig::default());
        let (mut leg_a, _rx_a) = live_leg(&state, "s-a");
        let (leg_b, mut rx_b) = live_leg(&state, "s-b");

        leg_a.finish_teardown();

        assert!(!state.registry.contains("s-a"));
        assert!(state.registry.contains("s-b"));

        // Session B's backend leg is still alive.
        leg_b
            .backend_tx
            .as_ref()
            .unwrap()
            .send(BackendOutbound::InputAudioCommit)
            .await
            .unwrap();
        assert!(rx_b.recv().await.is_some());
    }
}
