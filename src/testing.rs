//! Test support: a scriptable fake upstream WebSocket server and a relay
//! bound to a loopback port.

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// First frame the fake upstream sends after its handshake.
pub const READY_FRAME: &str = r#"{"type":"Ready"}"#;

/// Configuration pointing both upstream endpoints at test servers.
pub fn config(listen_url: &str, stream_url: &str, api_key: Option<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    config.upstream.listen_url = listen_url.to_string();
    config.upstream.stream_url = stream_url.to_string();
    config.upstream.api_key = api_key.map(str::to_string);
    config
}

pub fn state(config: AppConfig) -> AppState {
    AppState::new(config).expect("test config builds a client")
}

/// A ws:// URL on a port nothing listens on.
pub async fn closed_port_ws_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/v1/listen")
}

#[derive(Debug)]
pub enum UpstreamEvent {
    Connected {
        uri: String,
        authorization: Option<String>,
    },
    Frame(Message),
    Closed,
}

/// Accepts one WebSocket connection, reports what it sees, and sends what
/// the test tells it to.
pub struct FakeUpstream {
    addr: SocketAddr,
    events: mpsc::UnboundedReceiver<UpstreamEvent>,
    commands: mpsc::UnboundedSender<Message>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };

            let handshake_events = events_tx.clone();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let authorization = req
                    .headers()
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let _ = handshake_events.send(UpstreamEvent::Connected {
                    uri: req.uri().to_string(),
                    authorization,
                });
                Ok(resp)
            };

            let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                return;
            };
            if ws.send(Message::Text(READY_FRAME.to_string())).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    incoming = ws.next() => match incoming {
                        Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                            let _ = events_tx.send(UpstreamEvent::Frame(message));
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            let _ = events_tx.send(UpstreamEvent::Closed);
                            let _ = ws.close(None).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                    command = commands_rx.recv() => match command {
                        Some(Message::Close(frame)) => {
                            let _ = ws.close(frame).await;
                        }
                        Some(message) => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            addr,
            events,
            commands,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/listen", self.addr)
    }

    /// Wait (bounded) for the next thing the fake observed.
    pub async fn next_event(&mut self) -> UpstreamEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for upstream event")
            .expect("fake upstream stopped")
    }

    pub fn try_next_event(&mut self) -> Option<UpstreamEvent> {
        self.events.try_recv().ok()
    }

    /// Queue a frame for the fake to send to whoever is connected.
    pub fn send(&self, message: Message) {
        let _ = self.commands.send(message);
    }
}

/// The full relay (same routes as production) on a loopback port.
pub struct TestRelay {
    addr: SocketAddr,
    handle: ServerHandle,
}

impl TestRelay {
    pub fn start(config: AppConfig) -> Self {
        let state = state(config);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure)
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self { addr, handle }
    }

    pub fn ws_url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        // Stop without waiting; the runtime is torn down with the test.
        let _ = self.handle.stop(false);
    }
}
