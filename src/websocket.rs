//! # WebSocket Stream Bridge
//!
//! Relays live audio between a client and the upstream streaming endpoint.
//! Clients connect to `/transcribe-stream` (optionally `?model=<name>`); the
//! bridge opens one authenticated upstream socket for them and pipes frames
//! both ways until either side closes.
//!
//! ## Message Flow:
//! - **Client → Upstream**: Binary audio chunks (and any text control frames),
//!   forwarded unmodified through a writer task that owns the upstream sink
//! - **Upstream → Client**: The upstream's JSON transcript events, forwarded
//!   unmodified from the upstream reader stream attached to this actor
//!
//! ## Actor Model:
//! Each connection is one `StreamBridge` actor. The client socket is the
//! actor's context; the upstream reader is a second stream handled by the
//! same actor, so both directions are serialized through one mailbox and
//! the session state machine needs no locking.
//!
//! Frames arriving while the peer is not open are dropped, never queued.

use crate::state::{AppState, RelayMetrics};
use crate::stream::{CloseAction, Side, StreamSession};
use crate::upstream::{UpstreamClient, UpstreamSocket};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as UpstreamWsError, Message as UpstreamMessage};
use tracing::{debug, error, info, warn};

/// Close reason sent to clients when no upstream credential is configured.
pub const MISSING_CREDENTIAL_REASON: &str = "Server missing DEEPGRAM_API_KEY";

/// Close reason sent to clients when the upstream handshake fails.
pub const UPSTREAM_UNAVAILABLE_REASON: &str = "Upstream connection failed";

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub model: Option<String>,
}

/// One client/upstream socket pair.
pub struct StreamBridge {
    session: StreamSession,
    upstream_client: Arc<dyn UpstreamClient>,
    metrics: Arc<RelayMetrics>,

    /// Feeds the upstream writer task. Dropping it closes the upstream socket.
    upstream_tx: Option<mpsc::UnboundedSender<UpstreamMessage>>,

    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl StreamBridge {
    pub fn new(state: &AppState, model: String) -> Self {
        Self {
            session: StreamSession::new(model),
            upstream_client: state.upstream.clone(),
            metrics: state.metrics.clone(),
            upstream_tx: None,
            heartbeat_interval: Duration::from_secs(state.config.stream.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(state.config.stream.client_timeout_secs),
            last_heartbeat: Instant::now(),
        }
    }

    /// Start the upstream handshake without blocking the client stream.
    /// Client frames that arrive before it completes are dropped.
    fn connect_upstream(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let client = self.upstream_client.clone();
        let model = self.session.model().to_string();

        let connect = async move { client.open_stream(&model).await };

        ctx.spawn(connect.into_actor(self).map(|result, act, ctx| match result {
            Ok(socket) => act.attach_upstream(socket, ctx),
            Err(err) => {
                error!(
                    session_id = %act.session.id(),
                    model = %act.session.model(),
                    error = %err,
                    "Upstream stream connection failed"
                );
                act.metrics.session_rejected();
                act.shut_down(
                    Side::Upstream,
                    Some(ws::CloseReason {
                        code: ws::CloseCode::Error,
                        description: Some(UPSTREAM_UNAVAILABLE_REASON.to_string()),
                    }),
                    ctx,
                );
            }
        }));
    }

    /// Connecting → Active: split the upstream socket into a writer task and
    /// a reader stream handled by this actor.
    fn attach_upstream(&mut self, socket: UpstreamSocket, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(reason) = self.session.activate() {
            debug!(session_id = %self.session.id(), %reason, "Discarding late upstream socket");
            tokio::spawn(async move {
                let mut socket = socket;
                let _ = socket.close(None).await;
            });
            return;
        }

        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_to_upstream(sink, rx, self.session.id()));
        self.upstream_tx = Some(tx);
        ctx.add_stream(stream);

        info!(
            session_id = %self.session.id(),
            model = %self.session.model(),
            "Upstream connected, stream session active"
        );
    }

    fn forward_to_upstream(&mut self, message: UpstreamMessage) {
        if !self.session.can_forward() {
            self.metrics.frame_dropped();
            return;
        }

        let len = message.len();
        match &self.upstream_tx {
            Some(tx) if tx.send(message).is_ok() => {
                self.session.record_forwarded(Side::Upstream, len);
                self.metrics.frame_to_upstream();
            }
            _ => self.metrics.frame_dropped(),
        }
    }

    fn forward_to_client(&mut self, message: UpstreamMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.session.can_forward() {
            self.metrics.frame_dropped();
            return;
        }

        let len = message.len();
        match message {
            UpstreamMessage::Text(text) => ctx.text(text),
            UpstreamMessage::Binary(data) => ctx.binary(data),
            _ => return,
        }
        self.session.record_forwarded(Side::Client, len);
        self.metrics.frame_to_client();
    }

    /// Handle a close from `origin`. Only the first close of a session acts:
    /// it releases the upstream writer, closes the client with `reason`, and
    /// stops the actor.
    fn shut_down(
        &mut self,
        origin: Side,
        reason: Option<ws::CloseReason>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if let CloseAction::Nothing = self.session.on_close(origin) {
            return;
        }

        debug!(
            session_id = %self.session.id(),
            ?origin,
            state = self.session.state().as_str(),
            "Closing stream session"
        );
        self.upstream_tx.take();
        ctx.close(reason);
        ctx.stop();
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session.id(), "Client heartbeat timed out, closing session");
                act.shut_down(Side::Client, Some(ws::CloseCode::Away.into()), ctx);
            } else {
                ctx.ping(b"");
            }
        });
    }
}

/// Mirror the upstream's close code and reason to the client, or close
/// normally when the upstream sent none.
fn client_close_reason(frame: Option<CloseFrame<'static>>) -> ws::CloseReason {
    match frame {
        Some(frame) => ws::CloseReason {
            code: ws::CloseCode::from(u16::from(frame.code)),
            description: Some(frame.reason.into_owned()).filter(|reason| !reason.is_empty()),
        },
        None => ws::CloseCode::Normal.into(),
    }
}

/// Writer task for the upstream direction. Messages go out in the order they
/// were queued; when the sender is dropped the upstream socket is closed.
async fn pump_to_upstream(
    mut sink: SplitSink<UpstreamSocket, UpstreamMessage>,
    mut rx: mpsc::UnboundedReceiver<UpstreamMessage>,
    session_id: uuid::Uuid,
) {
    while let Some(message) = rx.recv().await {
        if let Err(err) = sink.send(message).await {
            debug!(%session_id, error = %err, "Upstream write failed");
            return;
        }
    }

    if let Err(err) = sink.close().await {
        debug!(%session_id, error = %err, "Upstream close failed");
    }
}

impl Actor for StreamBridge {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.metrics.session_opened();
        info!(
            session_id = %self.session.id(),
            model = %self.session.model(),
            "Stream session started"
        );

        if !self.upstream_client.has_credential() {
            warn!(session_id = %self.session.id(), "Rejecting stream session: no upstream credential");
            self.metrics.session_rejected();
            self.shut_down(
                Side::Upstream,
                Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some(MISSING_CREDENTIAL_REASON.to_string()),
                }),
                ctx,
            );
            return;
        }

        self.start_heartbeat(ctx);
        self.connect_upstream(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.upstream_tx.take();
        self.session.finish();
        self.metrics.session_closed();

        let summary = self.session.summary();
        info!(
            session_id = %self.session.id(),
            frames_to_upstream = summary.frames_to_upstream,
            frames_to_client = summary.frames_to_client,
            bytes_to_upstream = summary.bytes_to_upstream,
            bytes_to_client = summary.bytes_to_client,
            duration_seconds = summary.duration_seconds,
            "Stream session closed"
        );
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StreamBridge {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.forward_to_upstream(UpstreamMessage::Binary(data.to_vec()));
            }
            Ok(ws::Message::Text(text)) => {
                self.forward_to_upstream(UpstreamMessage::Text(text.to_string()));
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session.id(), ?reason, "Client closed stream");
                self.shut_down(Side::Client, reason, ctx);
            }
            Ok(ws::Message::Continuation(_)) => {
                // Fragmented messages are not reassembled.
                warn!(session_id = %self.session.id(), "Dropping fragmented client frame");
                self.metrics.frame_dropped();
            }
            Ok(ws::Message::Nop) => {}
            Err(ws::ProtocolError::Overflow) => {
                warn!(session_id = %self.session.id(), "Client frame exceeded size limit");
                self.shut_down(Side::Client, Some(ws::CloseCode::Size.into()), ctx);
            }
            Err(err) => {
                warn!(session_id = %self.session.id(), error = %err, "Client protocol error");
                self.shut_down(Side::Client, Some(ws::CloseCode::Protocol.into()), ctx);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        self.shut_down(Side::Client, None, ctx);
    }
}

/// Frames from the upstream service.
impl StreamHandler<Result<UpstreamMessage, UpstreamWsError>> for StreamBridge {
    fn handle(&mut self, msg: Result<UpstreamMessage, UpstreamWsError>, ctx: &mut Self::Context) {
        match msg {
            Ok(message @ (UpstreamMessage::Text(_) | UpstreamMessage::Binary(_))) => {
                self.forward_to_client(message, ctx);
            }
            Ok(UpstreamMessage::Close(frame)) => {
                debug!(session_id = %self.session.id(), ?frame, "Upstream closed stream");
                self.shut_down(Side::Upstream, Some(client_close_reason(frame)), ctx);
            }
            // Control frames are answered by the socket library.
            Ok(UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_)) => {}
            Err(err) => {
                warn!(session_id = %self.session.id(), error = %err, "Upstream stream error");
                self.shut_down(Side::Upstream, Some(ws::CloseCode::Normal.into()), ctx);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        self.shut_down(Side::Upstream, Some(ws::CloseCode::Normal.into()), ctx);
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Resolves the model from the query string (unknown or missing models fall
/// back to the default), then upgrades the connection and hands it to a new
/// `StreamBridge` actor. The client frame size is capped at the configured
/// per-frame limit.
pub async fn transcribe_stream(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let query = web::Query::<StreamQuery>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();

    let model = state.models.resolve(query.model.as_deref()).to_string();
    debug!(
        peer = ?req.connection_info().peer_addr(),
        requested = ?query.model,
        model = %model,
        "Stream upgrade requested"
    );

    let bridge = StreamBridge::new(&state, model);

    ws::WsResponseBuilder::new(bridge, &req, stream)
        .frame_size(state.config.limits.max_stream_frame_bytes)
        .start()
}
