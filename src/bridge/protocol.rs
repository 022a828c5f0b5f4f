//! # Wire Protocol Types
//!
//! Serde types for both legs of the bridge:
//!
//! - **Provider leg** (telephony media stream): JSON envelopes tagged by an
//!   `event` field (`start`, `media`, `stop`). Audio payloads are opaque
//!   base64 strings and are relayed without decoding.
//! - **Backend leg** (realtime translation API): JSON events tagged by a
//!   `type` field (`session.created`, `response.audio.delta`, ...).
//!
//! Unknown event types on either leg deserialize into an `Other` variant so
//! that new vocabulary from either side is logged and ignored instead of
//! being treated as malformed input.

use crate::config::AppConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Provider leg (telephony media stream)
// ---------------------------------------------------------------------------

/// Inbound events on the provider media-stream WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ProviderEvent {
    /// Stream start: carries the stream identifier every outbound frame
    /// must be tagged with.
    Start { start: StreamStart },

    /// One frame of caller audio (base64, relayed opaquely).
    Media { media: MediaPayload },

    /// The provider is done with this stream; begin teardown.
    Stop,

    /// Anything else the provider sends (`connected`, `mark`, future
    /// additions); advisory only.
    #[serde(other)]
    Other,
}

/// Payload of the provider `start` event. The provider sends more fields
/// (account SID, call SID, media format); only the stream SID matters here.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

/// Base64 audio payload container, shared by inbound and outbound frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

/// Outbound media envelope written back to the caller socket. Every frame
/// is addressed by the stream SID from the `start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerMediaEnvelope {
    pub event: String,
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    pub media: MediaPayload,
}

impl CallerMediaEnvelope {
    pub fn new(stream_sid: &str, payload: &str) -> Self {
        Self {
            event: "media".to_string(),
            stream_sid: stream_sid.to_string(),
            media: MediaPayload {
                payload: payload.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Backend leg (realtime translation API)
// ---------------------------------------------------------------------------

/// Inbound events from the translation backend, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BackendEvent {
    /// Session exists on the backend side (informational; the gate opens on
    /// the configuration acknowledgment, not on this).
    #[serde(rename = "session.created")]
    SessionCreated,

    /// Configuration acknowledgment; opens the readiness gate.
    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// Server VAD detected the start of caller speech (advisory).
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Server VAD detected the end of caller speech; triggers the manual
    /// commit + response request turn-taking.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// One chunk of translated audio (base64) to relay to the caller.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// The backend finished generating a response (advisory).
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Backend-surfaced error. Logged; not fatal by itself.
    #[serde(rename = "error")]
    Error { error: BackendErrorDetail },

    /// Unrecognized event types are logged at debug level and skipped.
    #[serde(other)]
    Other,
}

/// Detail body of a backend `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outbound events sent to the translation backend, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum BackendOutbound {
    /// The single configuration event sent right after the socket opens.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdateConfig },

    /// Append one caller audio frame to the backend's input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// Commit the input buffer at end of turn.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Ask the backend to generate the translated response.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Body of the `session.update` configuration event.
///
/// Both modalities are declared explicitly: the backend rejects
/// configurations that omit the text modality alongside audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdateConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetectionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

/// Voice-activity-detection parameters for the backend's server-side VAD.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetectionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f64,
    pub prefix_padding_ms: u64,
    pub silence_duration_ms: u64,
}

impl SessionUpdateConfig {
    /// Build the configuration event from application config. Telephony
    /// audio stays in G.711 µ-law end to end, so no transcoding happens in
    /// the bridge.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: config.backend.instructions.clone(),
            voice: config.backend.voice.clone(),
            input_audio_format: "g711_ulaw".to_string(),
            output_audio_format: "g711_ulaw".to_string(),
            input_audio_transcription: TranscriptionConfig {
                model: config.backend.transcription_model.clone(),
            },
            turn_detection: TurnDetectionConfig {
                kind: "server_vad".to_string(),
                threshold: config.session.vad_threshold,
                prefix_padding_ms: config.session.vad_prefix_padding_ms,
                silence_duration_ms: config.session.vad_silence_duration_ms,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_start_event() {
        let json = r#"{"event":"start","start":{"streamSid":"MZabc123","accountSid":"AC1"},"sequenceNumber":"1"}"#;
        match serde_json::from_str::<ProviderEvent>(json).unwrap() {
            ProviderEvent::Start { start } => assert_eq!(start.stream_sid, "MZabc123"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_provider_media_and_stop() {
        let json = r#"{"event":"media","media":{"payload":"AAAA"}}"#;
        match serde_json::from_str::<ProviderEvent>(json).unwrap() {
            ProviderEvent::Media { media } => assert_eq!(media.payload, "AAAA"),
            other => panic!("wrong variant: {:?}", other),
        }

        let json = r#"{"event":"stop"}"#;
        assert!(matches!(
            serde_json::from_str::<ProviderEvent>(json).unwrap(),
            ProviderEvent::Stop
        ));
    }

    /// Twilio sends a `connected` event before `start`; it must parse as
    /// advisory rather than failing the whole message.
    #[test]
    fn test_unknown_provider_event_is_other() {
        let json = r#"{"event":"connected","protocol":"Call"}"#;
        assert!(matches!(
            serde_json::from_str::<ProviderEvent>(json).unwrap(),
            ProviderEvent::Other
        ));
    }

    #[test]
    fn test_caller_media_envelope_shape() {
        let envelope = CallerMediaEnvelope::new("MZabc", "XXX");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZabc");
        assert_eq!(json["media"]["payload"], "XXX");
    }

    #[test]
    fn test_parse_backend_audio_delta() {
        let json = r#"{"type":"response.audio.delta","response_id":"r1","delta":"YYY"}"#;
        match serde_json::from_str::<BackendEvent>(json).unwrap() {
            BackendEvent::AudioDelta { delta } => assert_eq!(delta, "YYY"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_backend_error_event() {
        let json = r#"{"type":"error","error":{"code":"invalid_request","message":"missing modality"}}"#;
        match serde_json::from_str::<BackendEvent>(json).unwrap() {
            BackendEvent::Error { error } => {
                assert_eq!(error.code.as_deref(), Some("invalid_request"));
                assert_eq!(error.message.as_deref(), Some("missing modality"));
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_backend_event_is_other() {
        let json = r#"{"type":"response.audio_transcript.delta","delta":"hola"}"#;
        assert!(matches!(
            serde_json::from_str::<BackendEvent>(json).unwrap(),
            BackendEvent::Other
        ));
    }

    #[test]
    fn test_backend_outbound_serialization() {
        let append = BackendOutbound::InputAudioAppend {
            audio: "AAA".to_string(),
        };
        let json = serde_json::to_value(&append).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAA");

        let commit = serde_json::to_value(&BackendOutbound::InputAudioCommit).unwrap();
        assert_eq!(commit["type"], "input_audio_buffer.commit");
    }

    /// The configuration event must declare both modalities; the backend
    /// rejects audio-only configurations.
    #[test]
    fn test_session_update_declares_both_modalities() {
        let config = AppConfig::default();
        let update = BackendOutbound::SessionUpdate {
            session: SessionUpdateConfig::from_config(&config),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["modalities"][0], "audio");
        assert_eq!(json["session"]["modalities"][1], "text");
        assert_eq!(json["session"]["input_audio_format"], "g711_ulaw");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["turn_detection"]["threshold"], 0.5);
    }
}
