//! # Upstream Transcription Service
//!
//! Everything the relay knows about the speech-recognition provider lives in
//! this module. The rest of the crate only sees the [`UpstreamClient`] trait:
//!
//! - **Batch**: one POST carrying the decoded audio, answered with a JSON body
//!   decoded into [`ListenResponse`]
//! - **Stream**: one authenticated WebSocket handshake, returning the raw
//!   socket for the stream bridge to pipe frames through
//!
//! The credential is held by the client and only ever written into outbound
//! request headers.

pub mod client;
pub mod response;

pub use client::{DeepgramClient, UpstreamClient, UpstreamSocket};
pub use response::{ListenResponse, Transcript};

/// One validated batch transcription request.
///
/// Created once the request body is complete and has passed validation;
/// consumed by the single upstream call.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Decoded audio bytes (already checked against the size cap)
    pub audio: Vec<u8>,
    /// Client-supplied content type, forwarded as the upstream Content-Type
    pub mime: String,
    /// Model named by the client, before allow-list resolution
    pub requested_model: Option<String>,
}
