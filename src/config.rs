//! # Configuration Management
//!
//! Loads and validates the bridge configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Secret environment variables (OPENAI_API_KEY, TWILIO_AUTH_TOKEN, ...)
//! 2. Environment variables (APP_SERVER_HOST, APP_BACKEND_MODEL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Credentials are deliberately *not* read from config.toml; they only ever
//! come from the environment, so a committed config file can never leak them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, telephony, backend,
/// session) keeps the HTTP surface, the provider-facing glue, and the
/// translation-backend parameters independently tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub telephony: TelephonyConfig,
    pub backend: BackendConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Telephony-provider configuration.
///
/// The provider name selects the markup dialect returned by the voice
/// webhook (Twilio TwiML vs SignalWire LaML; structurally identical) and
/// the media-stream WebSocket path (`/<provider>-media`).
///
/// `account_sid`/`auth_token` are loaded from the environment for operator
/// visibility but are not used to verify inbound requests; media-stream
/// connections are authenticated by URL path only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// "twilio" or "signalwire"
    pub provider: String,

    /// Account identifier (TWILIO_ACCOUNT_SID)
    #[serde(default)]
    pub account_sid: String,

    /// Auth token (TWILIO_AUTH_TOKEN); never serialized into API responses
    #[serde(default, skip_serializing)]
    pub auth_token: String,
}

/// Translation-backend (realtime API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL for the one-shot session negotiation call
    pub api_base: String,

    /// WebSocket URL for the realtime streaming connection
    pub realtime_url: String,

    /// Model identifier sent during negotiation and configuration
    pub model: String,

    /// Voice identity for synthesized translation audio
    pub voice: String,

    /// Interpreter instructions (fixed bidirectional language pair)
    pub instructions: String,

    /// Model used for input transcription of caller audio
    pub transcription_model: String,

    /// Timeout applied to both negotiation and the streaming connect
    pub connect_timeout_secs: u64,

    /// Bearer credential; environment only, never serialized
    #[serde(default, skip_serializing)]
    pub api_key: String,
}

/// Per-call session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of concurrent call sessions
    pub max_concurrent_sessions: usize,

    /// Bound on the queue of un-sent frames per backend socket; frames are
    /// dropped (and counted) on overflow rather than growing unboundedly
    pub outbound_queue_size: usize,

    /// Voice-activity-detection threshold (0.0 to 1.0)
    pub vad_threshold: f64,

    /// Audio included before detected speech (milliseconds)
    pub vad_prefix_padding_ms: u64,

    /// Silence required to consider a turn finished (milliseconds)
    pub vad_silence_duration_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            telephony: TelephonyConfig {
                provider: "twilio".to_string(),
                account_sid: String::new(),
                auth_token: String::new(),
            },
            backend: BackendConfig {
                api_base: "https://api.openai.com".to_string(),
                realtime_url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                voice: "alloy".to_string(),
                instructions: "You are a live phone interpreter between an \
                               English speaker and a Spanish speaker. When you \
                               hear English, say it again in Spanish; when you \
                               hear Spanish, say it again in English. Translate \
                               everything faithfully and add nothing of your own."
                    .to_string(),
                transcription_model: "whisper-1".to_string(),
                connect_timeout_secs: 10,
                api_key: String::new(),
            },
            session: SessionConfig {
                max_concurrent_sessions: 50,
                outbound_queue_size: 256,
                vad_threshold: 0.5,
                vad_prefix_padding_ms: 300,
                vad_silence_duration_ms: 500,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_BACKEND_MODEL=gpt-4o-realtime-preview`: Override backend model
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    /// - `OPENAI_API_KEY=sk-...`: Backend bearer credential (required)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Special environment variables used by deployment platforms
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Credentials come from the environment only
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("backend.api_key", key)?;
        }
        if let Ok(sid) = env::var("TWILIO_ACCOUNT_SID") {
            settings = settings.set_override("telephony.account_sid", sid)?;
        }
        if let Ok(token) = env::var("TWILIO_AUTH_TOKEN") {
            settings = settings.set_override("telephony.auth_token", token)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup prevents a half-working
    /// bridge that accepts calls it can never connect to a backend session.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        match self.telephony.provider.as_str() {
            "twilio" | "signalwire" => {}
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown telephony provider '{}' (expected 'twilio' or 'signalwire')",
                    other
                ));
            }
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        if self.session.outbound_queue_size == 0 {
            return Err(anyhow::anyhow!(
                "Outbound queue size must be greater than 0"
            ));
        }

        if !(0.0..=1.0).contains(&self.session.vad_threshold) {
            return Err(anyhow::anyhow!(
                "VAD threshold must be between 0.0 and 1.0"
            ));
        }

        if self.backend.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "Backend connect timeout must be greater than 0"
            ));
        }

        Ok(())
    }

    /// The fixed media-stream WebSocket path the provider must connect to.
    ///
    /// Inbound connections on any other path never reach the bridge actor;
    /// actix routing closes them with a 404 at the HTTP layer.
    pub fn media_stream_path(&self) -> String {
        format!("/{}-media", self.telephony.provider)
    }
}
