use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Non-secret view of the running configuration. The credential is reported
/// only as present or absent.
pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "upstream": {
                "listen_url": config.upstream.listen_url,
                "stream_url": config.upstream.stream_url,
                "request_timeout_secs": config.upstream.request_timeout_secs,
                "credential_configured": state.upstream.has_credential()
            },
            "models": {
                "default_model": state.models.default_model(),
                "allowed": state.models.allowed_models()
            },
            "limits": {
                "max_audio_bytes": config.limits.max_audio_bytes,
                "max_body_bytes": config.limits.max_body_bytes(),
                "max_stream_frame_bytes": config.limits.max_stream_frame_bytes
            },
            "stream": {
                "encoding": config.stream.encoding,
                "sample_rate": config.stream.sample_rate,
                "channels": config.stream.channels,
                "heartbeat_interval_secs": config.stream.heartbeat_interval_secs,
                "client_timeout_secs": config.stream.client_timeout_secs
            }
        }
    }))
}
