//! # Bidirectional Relay Core
//!
//! Pure mapping from one inbound event (either leg) to the ordered list of
//! actions the I/O layer must execute. All gating decisions live here:
//!
//! - caller audio forwards to the backend only when the readiness gate is
//!   open (`Ready`), one append per frame, no batching;
//! - pre-`Ready` frames are **dropped** (not queued) and counted;
//! - backend audio deltas forward to the caller only once the stream SID is
//!   known, in strict receipt order; this is a pass-through, not a buffer;
//! - `media` before `start` is a protocol violation: logged, ignored, never
//!   fatal.
//!
//! Keeping this as plain functions over `&mut CallSession` means the actor
//! and the backend reader only ever *execute* actions; ordering follows from
//! call order and every property here is testable without a socket.

use tracing::{debug, error, info, warn};

use crate::bridge::protocol::{
    BackendEvent, BackendOutbound, CallerMediaEnvelope, ProviderEvent,
};
use crate::bridge::session::CallSession;

/// One side effect the I/O layer must perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Write an event to the backend socket.
    SendToBackend(BackendOutbound),
    /// Write a media envelope to the caller socket.
    SendToCaller(CallerMediaEnvelope),
    /// Tear down both legs (provider sent `stop`).
    BeginTeardown,
}

/// Handle one event from the provider (caller) leg.
pub fn on_provider_event(session: &mut CallSession, event: ProviderEvent) -> Vec<RelayAction> {
    match event {
        ProviderEvent::Start { start } => {
            info!(
                stream_sid = %start.stream_sid,
                session_id = session.session_id.as_deref().unwrap_or("-"),
                "Media stream started"
            );
            if session.stream_sid.is_some() {
                warn!("Duplicate start event; keeping original stream SID");
            } else {
                session.stream_sid = Some(start.stream_sid);
            }
            vec![]
        }

        ProviderEvent::Media { media } => {
            // A media event before start has no address to reply to:
            // protocol violation, ignore the frame rather than crash.
            if session.stream_sid.is_none() {
                warn!("Media event before start; ignoring frame");
                session.frames_dropped += 1;
                return vec![];
            }

            if !session.can_forward_caller_audio() {
                // Drop policy: the backend rejects appends before the
                // configuration is acknowledged, so frames arriving early
                // are counted and discarded.
                debug!(
                    state = session.ready_state().as_str(),
                    "Dropping caller frame before session is ready"
                );
                session.frames_dropped += 1;
                return vec![];
            }

            session.frames_from_caller += 1;
            vec![RelayAction::SendToBackend(BackendOutbound::InputAudioAppend {
                audio: media.payload,
            })]
        }

        ProviderEvent::Stop => {
            info!(
                session_id = session.session_id.as_deref().unwrap_or("-"),
                "Provider stop event; beginning teardown"
            );
            vec![RelayAction::BeginTeardown]
        }

        ProviderEvent::Other => {
            debug!("Ignoring advisory provider event");
            vec![]
        }
    }
}

/// Handle one event from the backend (translation) leg.
pub fn on_backend_event(session: &mut CallSession, event: BackendEvent) -> Vec<RelayAction> {
    match event {
        BackendEvent::SessionCreated => {
            info!(
                session_id = session.session_id.as_deref().unwrap_or("-"),
                "Backend session created"
            );
            vec![]
        }

        BackendEvent::SessionUpdated => {
            match session.mark_ready() {
                Ok(()) => info!(
                    session_id = session.session_id.as_deref().unwrap_or("-"),
                    "Configuration acknowledged; session ready"
                ),
                // A repeated session.updated after the gate is already open
                // is harmless; anything else is worth a warning.
                Err(e) => warn!("Unexpected configuration acknowledgment: {}", e),
            }
            vec![]
        }

        BackendEvent::SpeechStarted => {
            debug!("Backend VAD: caller speech started");
            vec![]
        }

        BackendEvent::SpeechStopped => {
            // Manual turn-taking: commit the input buffer and explicitly
            // request the translated response.
            debug!("Backend VAD: caller speech stopped; requesting response");
            vec![
                RelayAction::SendToBackend(BackendOutbound::InputAudioCommit),
                RelayAction::SendToBackend(BackendOutbound::ResponseCreate),
            ]
        }

        BackendEvent::AudioDelta { delta } => {
            match session.stream_sid.clone() {
                Some(stream_sid) if session.can_forward_backend_audio() => {
                    session.frames_to_caller += 1;
                    vec![RelayAction::SendToCaller(CallerMediaEnvelope::new(
                        &stream_sid,
                        &delta,
                    ))]
                }
                Some(_) => {
                    // Teardown already began; late deltas are expected while
                    // the backend drains its response.
                    debug!("Discarding translated audio after close began");
                    vec![]
                }
                None => {
                    // No stream SID yet means outbound frames cannot be
                    // addressed; the delta is unusable, not an error.
                    warn!("Translated audio arrived before stream SID; discarding");
                    vec![]
                }
            }
        }

        BackendEvent::ResponseDone => {
            debug!("Backend response complete");
            vec![]
        }

        BackendEvent::Error { error } => {
            // Backend-surfaced errors are logged but not fatal by
            // themselves; only socket close/error tears the session down.
            error!(
                code = error.code.as_deref().unwrap_or("-"),
                message = error.message.as_deref().unwrap_or("-"),
                "Backend error event"
            );
            vec![]
        }

        BackendEvent::Other => {
            debug!("Ignoring unrecognized backend event");
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{MediaPayload, StreamStart};

    fn start_event(sid: &str) -> ProviderEvent {
        ProviderEvent::Start {
            start: StreamStart {
                stream_sid: sid.to_string(),
            },
        }
    }

    fn media_event(payload: &str) -> ProviderEvent {
        ProviderEvent::Media {
            media: MediaPayload {
                payload: payload.to_string(),
            },
        }
    }

    /// Drive a session through the full readiness handshake.
    fn ready_session() -> CallSession {
        let mut session = CallSession::new();
        session.mark_negotiated("s1".to_string()).unwrap();
        session.mark_configuring().unwrap();
        let actions = on_backend_event(&mut session, BackendEvent::SessionUpdated);
        assert!(actions.is_empty());
        assert!(session.can_forward_caller_audio());
        session
    }

    /// Frames received before the gate opens are dropped, not queued: once
    /// the gate opens, nothing is flushed.
    #[test]
    fn test_media_before_ready_is_dropped_not_queued() {
        let mut session = CallSession::new();
        session.mark_negotiated("s1".to_string()).unwrap();
        let _ = on_provider_event(&mut session, start_event("MZ1"));

        for payload in ["early1", "early2"] {
            let actions = on_provider_event(&mut session, media_event(payload));
            assert!(actions.is_empty());
        }
        assert_eq!(session.frames_dropped, 2);

        // Gate opens; no buffered frames appear
        session.mark_configuring().unwrap();
        let actions = on_backend_event(&mut session, BackendEvent::SessionUpdated);
        assert!(actions.is_empty());

        // Only new frames flow
        let actions = on_provider_event(&mut session, media_event("live"));
        assert_eq!(
            actions,
            vec![RelayAction::SendToBackend(BackendOutbound::InputAudioAppend {
                audio: "live".to_string()
            })]
        );
        assert_eq!(session.frames_from_caller, 1);
    }

    /// `media` before `start` is a protocol violation: ignored, never fatal.
    #[test]
    fn test_media_before_start_is_ignored() {
        let mut session = ready_session();
        assert!(session.stream_sid.is_none());

        let actions = on_provider_event(&mut session, media_event("orphan"));
        assert!(actions.is_empty());
        assert_eq!(session.frames_dropped, 1);

        // The connection stays usable: start then media works normally
        let _ = on_provider_event(&mut session, start_event("MZ1"));
        let actions = on_provider_event(&mut session, media_event("ok"));
        assert_eq!(actions.len(), 1);
    }

    /// A translated delta arriving while the stream SID is unset must not
    /// produce a caller write.
    #[test]
    fn test_delta_without_stream_sid_is_discarded() {
        let mut session = ready_session();
        let actions = on_backend_event(
            &mut session,
            BackendEvent::AudioDelta {
                delta: "XXX".to_string(),
            },
        );
        assert!(actions.is_empty());
        assert_eq!(session.frames_to_caller, 0);
    }

    /// Translated audio flows to the caller as soon as the stream SID is
    /// known, even before the gate opens.
    #[test]
    fn test_delta_forwards_before_gate_opens() {
        let mut session = CallSession::new();
        session.mark_negotiated("s1".to_string()).unwrap();
        session.mark_configuring().unwrap();
        let _ = on_provider_event(&mut session, start_event("MZ1"));
        assert!(!session.can_forward_caller_audio());

        let actions = on_backend_event(
            &mut session,
            BackendEvent::AudioDelta {
                delta: "XXX".to_string(),
            },
        );
        assert_eq!(
            actions,
            vec![RelayAction::SendToCaller(CallerMediaEnvelope::new(
                "MZ1", "XXX"
            ))]
        );
    }

    /// Once teardown begins, deltas stop flowing even though the stream SID
    /// is still known.
    #[test]
    fn test_delta_after_close_began_is_discarded() {
        let mut session = ready_session();
        let _ = on_provider_event(&mut session, start_event("MZ1"));
        session.begin_close();

        let actions = on_backend_event(
            &mut session,
            BackendEvent::AudioDelta {
                delta: "late".to_string(),
            },
        );
        assert!(actions.is_empty());
        assert_eq!(session.frames_to_caller, 0);
    }

    #[test]
    fn test_speech_stopped_commits_then_requests_response() {
        let mut session = ready_session();
        let actions = on_backend_event(&mut session, BackendEvent::SpeechStopped);
        assert_eq!(
            actions,
            vec![
                RelayAction::SendToBackend(BackendOutbound::InputAudioCommit),
                RelayAction::SendToBackend(BackendOutbound::ResponseCreate),
            ]
        );
    }

    #[test]
    fn test_stop_begins_teardown() {
        let mut session = ready_session();
        let actions = on_provider_event(&mut session, ProviderEvent::Stop);
        assert_eq!(actions, vec![RelayAction::BeginTeardown]);
    }

    #[test]
    fn test_backend_error_event_is_not_fatal() {
        let mut session = ready_session();
        let actions = on_backend_event(
            &mut session,
            BackendEvent::Error {
                error: crate::bridge::protocol::BackendErrorDetail {
                    code: Some("rate_limited".to_string()),
                    message: Some("slow down".to_string()),
                },
            },
        );
        assert!(actions.is_empty());
        // Session state untouched; only socket close/error tears down
        assert!(session.can_forward_caller_audio());
    }

    /// End-to-end ordering scenario: negotiation `s1`, ack, `start{MZabc}`,
    /// three media frames in, two deltas out; everything in order.
    #[test]
    fn test_end_to_end_ordering() {
        let mut session = CallSession::new();
        session.mark_negotiated("s1".to_string()).unwrap();
        session.mark_configuring().unwrap();
        let _ = on_backend_event(&mut session, BackendEvent::SessionCreated);
        let _ = on_backend_event(&mut session, BackendEvent::SessionUpdated);
        let _ = on_provider_event(&mut session, start_event("abc"));

        let mut to_backend = Vec::new();
        for payload in ["AAA", "BBB", "CCC"] {
            for action in on_provider_event(&mut session, media_event(payload)) {
                to_backend.push(action);
            }
        }
        assert_eq!(
            to_backend,
            vec![
                RelayAction::SendToBackend(BackendOutbound::InputAudioAppend {
                    audio: "AAA".to_string()
                }),
                RelayAction::SendToBackend(BackendOutbound::InputAudioAppend {
                    audio: "BBB".to_string()
                }),
                RelayAction::SendToBackend(BackendOutbound::InputAudioAppend {
                    audio: "CCC".to_string()
                }),
            ]
        );

        let mut to_caller = Vec::new();
        for delta in ["XXX", "YYY"] {
            for action in on_backend_event(
                &mut session,
                BackendEvent::AudioDelta {
                    delta: delta.to_string(),
                },
            ) {
                to_caller.push(action);
            }
        }
        assert_eq!(
            to_caller,
            vec![
                RelayAction::SendToCaller(CallerMediaEnvelope::new("abc", "XXX")),
                RelayAction::SendToCaller(CallerMediaEnvelope::new("abc", "YYY")),
            ]
        );

        assert_eq!(session.frames_from_caller, 3);
        assert_eq!(session.frames_to_caller, 2);
        assert_eq!(session.frames_dropped, 0);
    }
}
