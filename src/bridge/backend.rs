//! # Translation-Session Manager
//!
//! Establishes the backend leg of a call in two steps:
//!
//! 1. **Negotiation**: a one-shot request/response HTTP call that
//!    provisions a backend session and returns its identifier. This happens
//!    over plain HTTP, not the streaming socket.
//! 2. **Streaming connect**: the long-lived realtime WebSocket,
//!    authenticated with the bearer credential and the protocol-version
//!    header. Exactly one `session.update` configuration event is sent as
//!    soon as the socket opens, before anything else.
//!
//! Both steps run under the configured timeout; expiry or a non-success
//! status is a *setup failure*: the caller leg is closed and no registry
//! entry is created. Nothing is retried.
//!
//! After configuration is sent the socket is split:
//! - a **writer task** drains a bounded mpsc queue of outbound events
//!   (dropping the sender closes the socket, which is how teardown releases
//!   this leg);
//! - a **reader task** parses each inbound event and forwards it into the
//!   call actor's mailbox, which is the single place session state mutates.

use actix::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bridge::protocol::{BackendEvent, BackendOutbound, SessionUpdateConfig};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

/// Signal from the backend leg into the call actor's mailbox.
#[derive(Message)]
#[rtype(result = "()")]
pub enum BackendSignal {
    /// A parsed backend event to run through the relay.
    Event(BackendEvent),
    /// The backend socket closed or errored; the caller leg must follow.
    Closed { reason: String },
}

/// Response body of the session negotiation call. The backend returns more
/// fields (client secret, expiry); only the session identifier matters.
#[derive(Debug, Deserialize)]
struct NegotiationResponse {
    id: String,
}

/// Perform the one-shot session negotiation.
///
/// ## Failure semantics:
/// Any failure here (transport error, timeout, non-success status, missing
/// session id) aborts session setup; the caller leg is closed and the
/// session is never registered.
pub async fn negotiate(client: &reqwest::Client, config: &AppConfig) -> AppResult<String> {
    let url = format!("{}/v1/realtime/sessions", config.backend.api_base);
    debug!(url = %url, model = %config.backend.model, "Negotiating backend session");

    let response = client
        .post(&url)
        .bearer_auth(&config.backend.api_key)
        .header("OpenAI-Beta", "realtime=v1")
        .json(&serde_json::json!({
            "model": config.backend.model,
            "voice": config.backend.voice,
            "instructions": config.backend.instructions,
        }))
        .timeout(Duration::from_secs(config.backend.connect_timeout_secs))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::Negotiation(format!(
            "backend returned {}",
            response.status()
        )));
    }

    let body: NegotiationResponse = response
        .json()
        .await
        .map_err(|e| AppError::Negotiation(format!("invalid negotiation response: {}", e)))?;

    info!(session_id = %body.id, "Backend session negotiated");
    Ok(body.id)
}

/// Open the realtime streaming connection, send the configuration event,
/// and spawn the writer/reader tasks.
///
/// Returns the bounded sender feeding the writer task. Dropping every clone
/// of the sender ends the writer, which closes the socket; that is the
/// whole teardown mechanism for this leg.
pub async fn open_stream(
    config: &AppConfig,
    recipient: Recipient<BackendSignal>,
) -> AppResult<mpsc::Sender<BackendOutbound>> {
    let url = format!(
        "{}?model={}",
        config.backend.realtime_url, config.backend.model
    );

    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|e| AppError::BackendConnect(format!("bad realtime URL {}: {}", url, e)))?;
    {
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", config.backend.api_key))
                .map_err(|e| AppError::BackendConnect(format!("bad credential header: {}", e)))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
    }

    let connect = tokio_tungstenite::connect_async(request);
    let timeout = Duration::from_secs(config.backend.connect_timeout_secs);
    let (mut ws, _response) = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => {
            return Err(AppError::BackendConnect(format!("connect {}: {}", url, e)));
        }
        Err(_) => {
            return Err(AppError::BackendConnect(format!(
                "connect {} timed out after {}s",
                url, config.backend.connect_timeout_secs
            )));
        }
    };
    debug!("Realtime socket open");

    // Exactly one configuration event, before anything else flows.
    let update = BackendOutbound::SessionUpdate {
        session: SessionUpdateConfig::from_config(config),
    };
    let text = serde_json::to_string(&update)
        .map_err(|e| AppError::Internal(format!("serialize session.update: {}", e)))?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| AppError::BackendConnect(format!("send session.update: {}", e)))?;

    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<BackendOutbound>(config.session.outbound_queue_size);

    // Writer: drains the bounded queue until every sender is dropped, then
    // closes the socket.
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize backend event: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!("Backend socket write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
        debug!("Backend writer task finished");
    });

    // Reader: every inbound event goes through the actor mailbox. Malformed
    // JSON is logged and skipped; only close/error terminates the leg.
    tokio::spawn(async move {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<BackendEvent>(&text) {
                        Ok(event) => recipient.do_send(BackendSignal::Event(event)),
                        Err(e) => warn!("Malformed JSON from backend: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break format!("backend sent close: {:?}", frame);
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by tungstenite; binary unexpected
                }
                Some(Err(e)) => break format!("backend socket error: {}", e),
                None => break "backend socket closed".to_string(),
            }
        };
        recipient.do_send(BackendSignal::Closed { reason });
        debug!("Backend reader task finished");
    });

    Ok(tx)
}
