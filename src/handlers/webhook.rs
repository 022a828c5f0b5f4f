//! # Voice Webhook
//!
//! The telephony provider POSTs here when a call comes in. The response is
//! call markup (TwiML for Twilio, LaML for SignalWire; the two dialects are
//! structurally identical) instructing the provider to open a media-stream
//! WebSocket back to this server.
//!
//! The stream URL is rebuilt from the request's own Host so the markup stays
//! correct behind tunnels and load balancers without extra configuration.

use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

/// Handle an incoming-call webhook.
///
/// The provider ignores unknown form fields, and nothing in the body changes
/// the response, so the form payload is not parsed at all.
pub async fn incoming_call(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let host = req.connection_info().host().to_string();
    let stream_url = format!("wss://{}{}", host, config.media_stream_path());

    info!(
        provider = %config.telephony.provider,
        stream_url = %stream_url,
        "Incoming call; answering with stream markup"
    );

    HttpResponse::Ok()
        .content_type("text/xml")
        .body(call_markup(&stream_url))
}

/// Markup telling the provider to bridge the call's audio into a WebSocket.
fn call_markup(stream_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <Stream url="{}" />
    </Connect>
</Response>"#,
        stream_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::body::MessageBody;
    use actix_web::test::TestRequest;

    #[test]
    fn test_markup_embeds_stream_url() {
        let markup = call_markup("wss://example.com/twilio-media");
        assert!(markup.starts_with("<?xml"));
        assert!(markup.contains(r#"<Stream url="wss://example.com/twilio-media" />"#));
        assert!(markup.contains("<Connect>"));
    }

    /// The webhook answers with text/xml and a stream URL built from the
    /// request's Host header and the configured provider path.
    #[actix_web::test]
    async fn test_incoming_call_response() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let req = TestRequest::post()
            .uri("/voice")
            .insert_header(("host", "bridge.example.com"))
            .to_http_request();

        let response = incoming_call(req, state).await;
        assert_eq!(response.status(), actix_web::http::StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/xml"
        );

        let body = response.into_body().try_into_bytes().unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("wss://bridge.example.com/twilio-media"));
    }
}
