use crate::state::{AppState, MetricsSnapshot};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let config = &state.config;
    let credential_configured = state.upstream.has_credential();

    HttpResponse::Ok().json(json!({
        // Without a credential the process is up but every relay call fails.
        "status": if credential_configured { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "upstream": {
            "credential_configured": credential_configured,
            "default_model": state.models.default_model()
        },
        "metrics": {
            "batch_requests": metrics.batch.requests,
            "batch_error_rate": metrics.batch.error_rate(),
            "stream_sessions": metrics.stream.sessions,
            "active_sessions": metrics.stream.active_sessions
        },
        "memory": get_memory_info(),
        "system": get_system_status(&metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let uptime_seconds = state.uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "batch": {
            "requests": metrics.batch.requests,
            "succeeded": metrics.batch.succeeded,
            "client_errors": metrics.batch.client_errors,
            "misconfigured": metrics.batch.misconfigured,
            "upstream_failures": metrics.batch.upstream_failures,
            "aborted": metrics.batch.aborted,
            "error_rate": metrics.batch.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.batch.requests as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "stream": metrics.stream,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(metrics: &MetricsSnapshot) -> serde_json::Value {
    let error_rate = metrics.batch.error_rate();
    let mut warnings = Vec::new();

    if metrics.batch.misconfigured > 0 {
        warnings.push("Batch requests rejected for missing upstream credential");
    }
    if error_rate > 0.5 && metrics.batch.requests >= 10 {
        warnings.push("More than half of batch requests are failing");
    }
    if metrics.stream.frames_dropped > 0 {
        warnings.push("Stream frames were dropped outside an active session");
    }

    json!({
        "status": if warnings.is_empty() { "normal" } else { "attention" },
        "active_sessions": metrics.stream.active_sessions,
        "rejected_sessions": metrics.stream.rejected,
        "warnings": warnings
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::testing;
    use actix_web::test as actix_test;
    use actix_web::App;
    use serde_json::Value;

    async fn get_json(state: AppState, uri: &str) -> Value {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;
        let req = actix_test::TestRequest::get().uri(uri).to_request();
        actix_test::call_and_read_body_json(&app, req).await
    }

    fn state_with_key(api_key: Option<&str>) -> AppState {
        testing::state(testing::config(
            "http://127.0.0.1:1/v1/listen",
            "ws://127.0.0.1:1/v1/listen",
            api_key,
        ))
    }

    #[actix_web::test]
    async fn test_health_reports_credential_presence() {
        let body = get_json(state_with_key(Some("k")), "/health").await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["upstream"]["credential_configured"], true);
        assert_eq!(body["upstream"]["default_model"], "nova-2");

        let body = get_json(state_with_key(None), "/health").await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["upstream"]["credential_configured"], false);
    }

    #[actix_web::test]
    async fn test_metrics_reflect_counters() {
        let state = state_with_key(Some("k"));
        state.metrics.batch_started();
        state.metrics.batch_failed(&RelayError::MissingFields);
        state.metrics.session_opened();
        state.metrics.frame_to_upstream();

        let body = get_json(state, "/metrics").await;
        assert_eq!(body["batch"]["requests"], 1);
        assert_eq!(body["batch"]["client_errors"], 1);
        assert_eq!(body["stream"]["sessions"], 1);
        assert_eq!(body["stream"]["active_sessions"], 1);
        assert_eq!(body["stream"]["frames_to_upstream"], 1);
    }

    #[test]
    fn test_system_status_flags_misconfiguration() {
        let metrics = crate::state::RelayMetrics::default();
        assert_eq!(get_system_status(&metrics.snapshot())["status"], "normal");

        metrics.batch_started();
        metrics.batch_failed(&RelayError::ServerMisconfigured);
        assert_eq!(get_system_status(&metrics.snapshot())["status"], "attention");
    }
}
