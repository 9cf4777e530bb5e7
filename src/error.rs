//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`RelayError`]: what a batch client can observe. Each variant maps to one
//!   HTTP status and one fixed message, returned as `{"error": "<message>"}`.
//! - [`UpstreamError`]: everything that can go wrong while talking to the
//!   upstream transcription service. These never reach a client directly; the
//!   batch relay collapses them into [`RelayError::TranscribeFailed`] and the
//!   stream bridge turns them into a close frame.
//!
//! ## HTTP Status Code Mapping:
//! - MissingFields → 400
//! - PayloadTooLarge → 413
//! - ServerMisconfigured / TranscribeFailed → 500
//! - ConnectionAborted → no JSON body; the connection is closed

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Client-visible failures of the batch relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// `audio` or `mime` absent (or empty) in the request body
    #[error("Missing audio or mime")]
    MissingFields,

    /// Decoded audio exceeds the configured cap
    #[error("Audio too large")]
    PayloadTooLarge,

    /// The request body grew past the hard cap while still being received.
    /// This is resource protection, not a user-facing error.
    #[error("Request body exceeded the hard size cap")]
    ConnectionAborted,

    /// No upstream credential is configured
    #[error("Server missing DEEPGRAM_API_KEY")]
    ServerMisconfigured,

    /// Malformed payload, undecodable audio, or any upstream failure.
    /// Callers can't tell these apart; the logs can.
    #[error("Transcribe failed")]
    TranscribeFailed,
}

impl RelayError {
    /// Short machine-readable kind, used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::MissingFields => "missing_fields",
            RelayError::PayloadTooLarge => "payload_too_large",
            RelayError::ConnectionAborted => "connection_aborted",
            RelayError::ServerMisconfigured => "server_misconfigured",
            RelayError::TranscribeFailed => "transcribe_failed",
        }
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingFields => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge | RelayError::ConnectionAborted => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            RelayError::ServerMisconfigured | RelayError::TranscribeFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            // The rest of the body is never read, so the connection can't be
            // reused: close it and send nothing the client could parse. actix
            // gives handlers no way to drop the socket outright, so a bare
            // status line with `Connection: close` is as close as it gets.
            RelayError::ConnectionAborted => {
                HttpResponse::build(self.status_code()).force_close().finish()
            }
            _ => HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() })),
        }
    }
}

impl From<UpstreamError> for RelayError {
    fn from(_: UpstreamError) -> Self {
        RelayError::TranscribeFailed
    }
}

/// Failures while talking to the upstream transcription service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no upstream credential configured")]
    MissingCredential,

    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("upstream websocket failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid credential header value")]
    InvalidHeader,
}

pub type RelayResult<T> = Result<T, RelayError>;
