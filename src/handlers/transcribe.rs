//! # Batch Relay
//!
//! `POST /transcribe` with `{ "audio": "<base64>", "mime": "...", "model": "..." }`.
//!
//! ## Validation order (first failure wins):
//! 1. Raw body stays under 1.5× the audio cap while arriving → else the
//!    connection is aborted
//! 2. Body parses as JSON (empty body counts as `{}`) → else 500. A JSON
//!    value that isn't an object simply has no fields.
//! 3. `audio` and `mime` present and not blank/false/zero → else 400
//! 4. Decoded audio within the cap → else 413
//! 5. Upstream credential configured → else 500
//!
//! Only then is the single upstream call made.

use crate::error::{RelayError, RelayResult};
use crate::state::AppState;
use crate::upstream::{Transcript, TranscriptionRequest};

use actix_web::{web, HttpResponse};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Standard alphabet, padding optional, like most browser-side encoders produce.
const AUDIO_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Serialize)]
struct TranscribeResponse {
    text: String,
}

pub async fn transcribe(
    state: web::Data<AppState>,
    payload: web::Payload,
) -> RelayResult<HttpResponse> {
    state.metrics.batch_started();

    match relay(&state, payload).await {
        Ok(text) => {
            state.metrics.batch_succeeded();
            Ok(HttpResponse::Ok().json(TranscribeResponse { text }))
        }
        Err(err) => {
            debug!(kind = err.kind(), "Batch transcription rejected");
            state.metrics.batch_failed(&err);
            Err(err)
        }
    }
}

async fn relay(state: &AppState, payload: web::Payload) -> RelayResult<String> {
    let body = read_body(payload, state.config.limits.max_body_bytes()).await?;
    let request = parse_request(&body, state.config.limits.max_audio_bytes)?;

    if !state.upstream.has_credential() {
        error!("Rejecting transcription: no upstream credential configured");
        return Err(RelayError::ServerMisconfigured);
    }

    if let Some(requested) = request.requested_model.as_deref() {
        if !state.models.is_allowed(requested) {
            debug!(requested, "Requested model not allowed, using default");
        }
    }

    let model = state
        .models
        .resolve(request.requested_model.as_deref())
        .to_string();
    debug!(
        requested = ?request.requested_model,
        model = %model,
        mime = %request.mime,
        audio_bytes = request.audio.len(),
        "Relaying batch transcription"
    );

    let response = state
        .upstream
        .transcribe(request, &model)
        .await
        .map_err(|err| {
            error!(model = %model, error = %err, "Upstream transcription failed");
            RelayError::from(err)
        })?;

    let transcript = response.transcript();
    if transcript == Transcript::Missing {
        debug!(model = %model, "Upstream response carried no transcript");
    }
    Ok(transcript.into_text())
}

/// Accumulate the request body, giving up as soon as it passes `limit`.
async fn read_body(mut payload: web::Payload, limit: usize) -> RelayResult<web::BytesMut> {
    let mut body = web::BytesMut::new();

    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|err| {
            warn!(error = %err, "Request body interrupted");
            RelayError::ConnectionAborted
        })?;

        body.extend_from_slice(&chunk);
        if body.len() > limit {
            warn!(received = body.len(), limit, "Request body over hard cap, aborting");
            return Err(RelayError::ConnectionAborted);
        }
    }

    Ok(body)
}

/// Steps 2-4 of validation: parse, required fields, decoded size.
fn parse_request(body: &[u8], max_audio_bytes: usize) -> RelayResult<TranscriptionRequest> {
    let body: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(body).map_err(|err| {
            warn!(error = %err, "Malformed transcription payload");
            RelayError::TranscribeFailed
        })?
    };

    // `null` can't be destructured into fields at all.
    if body.is_null() {
        warn!("Transcription payload is null");
        return Err(RelayError::TranscribeFailed);
    }

    let (audio, mime) = match (present(&body, "audio"), present(&body, "mime")) {
        (Some(audio), Some(mime)) => (audio, mime),
        _ => {
            warn!("Transcription request missing audio or mime");
            return Err(RelayError::MissingFields);
        }
    };

    let (Some(audio), Some(mime)) = (audio.as_str(), mime.as_str()) else {
        warn!("Transcription audio or mime is not a string");
        return Err(RelayError::TranscribeFailed);
    };

    let audio = decode_audio(audio).map_err(|err| {
        warn!(error = %err, "Audio is not valid base64");
        RelayError::TranscribeFailed
    })?;

    if audio.len() > max_audio_bytes {
        warn!(audio_bytes = audio.len(), max_audio_bytes, "Audio too large");
        return Err(RelayError::PayloadTooLarge);
    }

    // A model of any other type is just an unknown model.
    let requested_model = body
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(TranscriptionRequest {
        audio,
        mime: mime.to_string(),
        requested_model,
    })
}

/// A field that is set to something other than null, false, 0 or "".
fn present<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
    body.get(field).filter(|value| match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map_or(true, |n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn decode_audio(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    // Line-wrapped base64 is common; strip whitespace only when present.
    if encoded.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: Vec<u8> = encoded
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        AUDIO_BASE64.decode(compact)
    } else {
        AUDIO_BASE64.decode(encoded)
    }
}
