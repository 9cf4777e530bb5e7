//! # HTTP Routing
//!
//! One listener serves both relay modes. Requests are dispatched by method,
//! path and upgrade intent:
//!
//! - `POST /transcribe` → batch relay
//! - upgrade on any path starting with `/transcribe-stream` → stream bridge
//! - health, metrics and config under `/api/v1` (health also at the root)
//! - everything else → plain 404; upgrade requests are refused and the
//!   connection is closed without a handshake

pub mod info;
pub mod transcribe;

use crate::health;
use crate::websocket;

use actix_web::guard::{self, GuardContext};
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::warn;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/transcribe")
            .guard(guard::Post())
            .to(transcribe::transcribe),
    )
    .service(
        web::resource("/transcribe-stream{tail:.*}")
            .guard(guard::Get())
            .guard(guard::fn_guard(is_websocket_upgrade))
            .to(websocket::transcribe_stream),
    )
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(info::get_config)),
    )
    .route("/health", web::get().to(health::health_check))
    .default_service(web::to(not_found));
}

/// True when the request asks for a WebSocket upgrade.
fn is_websocket_upgrade(ctx: &GuardContext<'_>) -> bool {
    ctx.head()
        .headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    if req.headers().contains_key(header::UPGRADE) {
        warn!(path = %req.path(), "Refusing upgrade on unknown path");
        return HttpResponse::NotFound().force_close().finish();
    }

    HttpResponse::NotFound()
        .content_type("text/plain; charset=utf-8")
        .body("Not found")
}
