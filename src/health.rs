//! # Health and Metrics Endpoints
//!
//! `GET /health` is the liveness/readiness surface: service identity, uptime,
//! the current connection count, and a coarse load assessment derived from
//! session usage. `GET /api/v1/metrics` adds per-endpoint latency stats and
//! the bridge's lifetime frame counters.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        // camelCase for compatibility with existing monitoring dashboards
        "activeConnections": metrics.active_connections,
        "service": {
            "name": "voice-bridge-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port,
            "provider": config.telephony.provider,
            "media_stream_path": config.media_stream_path()
        },
        "sessions": {
            "active": state.registry.active_session_count(),
            "max_concurrent": config.session.max_concurrent_sessions,
            "started_total": metrics.sessions_started,
            "setup_failures": metrics.setup_failures,
            "midcall_failures": metrics.midcall_failures
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            }
        },
        "system": system_status(
            state.registry.active_session_count(),
            config.session.max_concurrent_sessions
        )
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_connections": metrics.active_connections,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "bridge": {
            "sessions_started": metrics.sessions_started,
            "setup_failures": metrics.setup_failures,
            "midcall_failures": metrics.midcall_failures,
            "frames_from_caller": metrics.frames_from_caller,
            "frames_to_caller": metrics.frames_to_caller,
            "frames_dropped": metrics.frames_dropped,
            "active_session_ids": state.registry.active_session_ids()
        },
        "endpoints": endpoint_stats
    }))
}

fn system_status(active_sessions: usize, max_sessions: usize) -> serde_json::Value {
    let session_usage = if max_sessions > 0 {
        active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": active_sessions
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::body::MessageBody;

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let body = response.into_body().try_into_bytes().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[actix_web::test]
    async fn test_health_reports_active_connections() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        state.increment_active_connections();
        state.increment_active_connections();

        let response = health_check(state).await;
        let json = body_json(response).await;

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["activeConnections"], 2);
        assert_eq!(json["service"]["media_stream_path"], "/twilio-media");
    }

    #[actix_web::test]
    async fn test_detailed_metrics_includes_bridge_counters() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        state.record_session_started();
        state.record_setup_failure();
        state.record_session_frames(7, 3, 2);

        let response = detailed_metrics(state).await;
        let json = body_json(response).await;

        assert_eq!(json["bridge"]["sessions_started"], 1);
        assert_eq!(json["bridge"]["setup_failures"], 1);
        assert_eq!(json["bridge"]["frames_from_caller"], 7);
        assert_eq!(json["bridge"]["frames_to_caller"], 3);
        assert_eq!(json["bridge"]["frames_dropped"], 2);
    }

    #[test]
    fn test_system_status_thresholds() {
        assert_eq!(system_status(1, 50)["status"], "normal");
        assert_eq!(system_status(40, 50)["status"], "moderate_load");
        assert_eq!(system_status(48, 50)["status"], "high_load");
        assert_eq!(system_status(0, 0)["status"], "normal");
    }
}
