//! Typed view of the upstream batch response.
//!
//! Only the path the relay cares about is read:
//! `results.channels[0].alternatives[0].transcript`. The body is kept as a
//! JSON value and walked level by level, so any JSON document decodes; a
//! missing level or a level of the wrong shape is reported as
//! [`Transcript::Missing`] rather than an error.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct ListenResponse {
    body: Value,
}

/// Outcome of transcript extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Text(String),
    /// The response had no first-channel, first-alternative string transcript.
    Missing,
}

impl Transcript {
    /// Text to return to the client; a missing transcript is an empty string.
    pub fn into_text(self) -> String {
        match self {
            Transcript::Text(text) => text,
            Transcript::Missing => String::new(),
        }
    }
}

impl ListenResponse {
    pub fn transcript(&self) -> Transcript {
        self.body
            .get("results")
            .and_then(|results| results.get("channels"))
            .and_then(Value::as_array)
            .and_then(|channels| channels.first())
            .and_then(|channel| channel.get("alternatives"))
            .and_then(Value::as_array)
            .and_then(|alternatives| alternatives.first())
            .and_then(|alternative| alternative.get("transcript"))
            .and_then(Value::as_str)
            .map_or(Transcript::Missing, |text| Transcript::Text(text.to_string()))
    }
}
