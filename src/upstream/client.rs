//! Deepgram implementation of the upstream client.
//!
//! ## Upstream protocol:
//! - Batch: `POST <listen_url>?model=<m>&smart_format=true`, body = raw audio,
//!   `Content-Type` = client mime type
//! - Stream: WebSocket to `<stream_url>?model=<m>&smart_format=true&interim_results=true&encoding=<e>&sample_rate=<r>&channels=<c>`
//! - Both authenticate with `Authorization: Token <api key>`

use crate::config::{AppConfig, StreamConfig};
use crate::error::UpstreamError;
use crate::upstream::{ListenResponse, TranscriptionRequest};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header as ws_header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

/// An open upstream streaming socket.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The seam between the relay and the transcription provider.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Whether a credential is configured. Without one, neither call is attempted.
    fn has_credential(&self) -> bool;

    /// Issue one batch transcription call. No retries.
    async fn transcribe(
        &self,
        request: TranscriptionRequest,
        model: &str,
    ) -> Result<ListenResponse, UpstreamError>;

    /// Open one streaming connection and complete its handshake.
    async fn open_stream(&self, model: &str) -> Result<UpstreamSocket, UpstreamError>;
}

pub struct DeepgramClient {
    http: reqwest::Client,
    api_key: Option<String>,
    listen_url: Url,
    stream_url: Url,
    stream: StreamConfig,
    max_frame_bytes: usize,
}

impl DeepgramClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key: config.upstream.api_key().map(str::to_string),
            listen_url: Url::parse(&config.upstream.listen_url)?,
            stream_url: Url::parse(&config.upstream.stream_url)?,
            stream: config.stream.clone(),
            max_frame_bytes: config.limits.max_stream_frame_bytes,
        })
    }

    pub fn batch_url(&self, model: &str) -> Url {
        let mut url = self.listen_url.clone();
        url.query_pairs_mut()
            .append_pair("model", model)
            .append_pair("smart_format", "true");
        url
    }

    pub fn streaming_url(&self, model: &str) -> Url {
        let mut url = self.stream_url.clone();
        url.query_pairs_mut()
            .append_pair("model", model)
            .append_pair("smart_format", "true")
            .append_pair("interim_results", "true")
            .append_pair("encoding", &self.stream.encoding)
            .append_pair("sample_rate", &self.stream.sample_rate.to_string())
            .append_pair("channels", &self.stream.channels.to_string());
        url
    }

    fn authorization(&self) -> Result<String, UpstreamError> {
        self.api_key
            .as_deref()
            .map(|key| format!("Token {key}"))
            .ok_or(UpstreamError::MissingCredential)
    }
}

#[async_trait]
impl UpstreamClient for DeepgramClient {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn transcribe(
        &self,
        request: TranscriptionRequest,
        model: &str,
    ) -> Result<ListenResponse, UpstreamError> {
        let authorization = self.authorization()?;
        let audio_len = request.audio.len();

        let response = self
            .http
            .post(self.batch_url(model))
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, request.mime.as_str())
            .body(request.audio)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(
            model,
            audio_len,
            status = status.as_u16(),
            response_len = bytes.len(),
            "Upstream batch call completed"
        );

        // The transcript comes from the body alone; a JSON error document
        // simply carries none. Only a body that isn't JSON is a failure.
        match serde_json::from_slice::<ListenResponse>(&bytes) {
            Ok(listen) => {
                if !status.is_success() {
                    warn!(model, status = status.as_u16(), "Upstream rejected batch call");
                }
                Ok(listen)
            }
            Err(_) if !status.is_success() => Err(UpstreamError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(err) => Err(UpstreamError::Decode(err)),
        }
    }

    async fn open_stream(&self, model: &str) -> Result<UpstreamSocket, UpstreamError> {
        let authorization = self.authorization()?;

        let mut request = self.streaming_url(model).as_str().into_client_request()?;
        let value =
            HeaderValue::from_str(&authorization).map_err(|_| UpstreamError::InvalidHeader)?;
        request.headers_mut().insert(ws_header::AUTHORIZATION, value);

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_frame_bytes);
        ws_config.max_frame_size = Some(self.max_frame_bytes);

        let (socket, response) = connect_async_with_config(request, Some(ws_config), false).await?;
        debug!(model, status = %response.status(), "Upstream stream handshake completed");
        Ok(socket)
    }
}
