//! # Configuration Management
//!
//! This module loads the relay's configuration once at startup. The result is
//! immutable for the lifetime of the process and handed to every component
//! through `AppState` (see state.rs); nothing reads configuration from globals.
//!
//! ## Sources (lowest to highest priority):
//! 1. Default values (defined in the Default impls)
//! 2. Configuration file (config.toml, optional)
//! 3. Environment variables with the APP_ prefix and `__` between sections
//!    (e.g. `APP_LIMITS__MAX_AUDIO_BYTES=1048576`, `APP_MODELS__ALLOWED=nova-2,nova-3`)
//! 4. Deployment variables: `TRANSCRIBE_PORT`, `PORT`, `HOST`,
//!    `DEEPGRAM_API_KEY`, `DEEPGRAM_MODEL`
//!
//! ## Missing credential:
//! An absent API key is NOT a validation error. The relay still starts and
//! answers both modes with a well-defined failure (500 for batch requests,
//! close code 1011 for stream sessions).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// Largest decoded audio payload accepted by the batch relay (12 MiB).
pub const DEFAULT_MAX_AUDIO_BYTES: usize = 12 * 1024 * 1024;

/// Largest single WebSocket frame accepted in either direction (1 MiB).
pub const DEFAULT_MAX_STREAM_FRAME_BYTES: usize = 1024 * 1024;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// Each section maps to one concern of the relay (listener, upstream
/// service, model allow-list, size limits, streaming audio format), and each
/// can be overridden independently from config.toml or the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub models: ModelsConfig,
    pub limits: LimitsConfig,
    pub stream: StreamConfig,
}

/// Listener settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: Accept connections from any interface (default; mobile
///   clients reach the relay over the network)
/// - `host = "127.0.0.1"`: Only accept connections from localhost
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

/// Upstream transcription service settings.
///
/// ## Fields:
/// - `api_key`: Credential sent as `Authorization: Token <key>`; never exposed to clients
/// - `listen_url`: HTTP endpoint used for batch transcription
/// - `stream_url`: WebSocket endpoint used for streaming transcription
/// - `request_timeout_secs`: Upper bound on one batch call to the upstream service
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub api_key: Option<String>,
    pub listen_url: String,
    pub stream_url: String,
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            listen_url: "https://api.deepgram.com/v1/listen".to_string(),
            stream_url: "wss://api.deepgram.com/v1/listen".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl UpstreamConfig {
    /// The configured credential, treating an empty or blank value as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

// The credential must never end up in logs, so Debug is written by hand.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_key", &self.api_key().map(|_| "<redacted>"))
            .field("listen_url", &self.listen_url)
            .field("stream_url", &self.stream_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Model allow-list.
///
/// A requested model is only honoured when it appears in `allowed`;
/// anything else silently falls back to `default_model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub default_model: String,
    pub allowed: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: "nova-2".to_string(),
            allowed: vec!["nova-2".to_string(), "nova-3".to_string()],
        }
    }
}

/// Size limits.
///
/// ## Fields:
/// - `max_audio_bytes`: Decoded audio cap for batch requests. The raw request
///   body is additionally cut off at 1.5× this value while it is still arriving.
/// - `max_stream_frame_bytes`: Per-frame cap for both sockets of a stream session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_audio_bytes: usize,
    pub max_stream_frame_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_audio_bytes: DEFAULT_MAX_AUDIO_BYTES,
            max_stream_frame_bytes: DEFAULT_MAX_STREAM_FRAME_BYTES,
        }
    }
}

impl LimitsConfig {
    /// Hard cap on the raw batch body while it is being received (1.5× the audio cap).
    pub fn max_body_bytes(&self) -> usize {
        self.max_audio_bytes.saturating_add(self.max_audio_bytes / 2)
    }
}

/// Streaming session settings.
///
/// `encoding`, `sample_rate` and `channels` are passed to the upstream
/// handshake verbatim; clients are expected to send audio in this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            encoding: "linear16".to_string(),
            sample_rate: 16000,
            channels: 1,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 60,
        }
    }
}

/// Reasons a configuration is rejected at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Server port cannot be 0")]
    ZeroPort,

    #[error("{0} must be greater than 0")]
    ZeroLimit(&'static str),

    #[error("At least one model must be allowed")]
    EmptyAllowList,

    #[error("Default model '{0}' is not in the allowed model list")]
    DefaultModelNotAllowed(String),

    #[error("Client timeout ({timeout}s) must exceed the heartbeat interval ({interval}s)")]
    TimeoutNotAboveHeartbeat { timeout: u64, interval: u64 },
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=127.0.0.1`: Override server host
    /// - `APP_UPSTREAM__STREAM_URL=wss://example.test/v1/listen`: Override the streaming endpoint
    /// - `TRANSCRIBE_PORT=8787` / `PORT=8787`: Listen port (PORT wins when both are set)
    /// - `DEEPGRAM_API_KEY=...`: Upstream credential
    /// - `DEEPGRAM_MODEL=nova-3`: Default model
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("models.allowed"),
            );

        // Variables used by existing deployments; they don't follow the APP_ convention.
        let overrides = [
            ("TRANSCRIBE_PORT", "server.port"),
            ("PORT", "server.port"),
            ("HOST", "server.host"),
            ("DEEPGRAM_API_KEY", "upstream.api_key"),
            ("DEEPGRAM_MODEL", "models.default_model"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Size limits and audio format values are non-zero
    /// - The allow-list is non-empty and contains the default model, so model
    ///   resolution can never produce a model outside the allow-list
    /// - The client timeout is longer than the heartbeat interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ZeroPort);
        }

        if self.limits.max_audio_bytes == 0 {
            return Err(ConfigError::ZeroLimit("max_audio_bytes"));
        }

        if self.limits.max_stream_frame_bytes == 0 {
            return Err(ConfigError::ZeroLimit("max_stream_frame_bytes"));
        }

        if self.upstream.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroLimit("request_timeout_secs"));
        }

        if self.stream.sample_rate == 0 {
            return Err(ConfigError::ZeroLimit("sample_rate"));
        }

        if self.stream.channels == 0 {
            return Err(ConfigError::ZeroLimit("channels"));
        }

        if self.stream.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroLimit("heartbeat_interval_secs"));
        }

        if self.stream.client_timeout_secs <= self.stream.heartbeat_interval_secs {
            return Err(ConfigError::TimeoutNotAboveHeartbeat {
                timeout: self.stream.client_timeout_secs,
                interval: self.stream.heartbeat_interval_secs,
            });
        }

        if self.models.allowed.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }

        if !self.models.allowed.contains(&self.models.default_model) {
            return Err(ConfigError::DefaultModelNotAllowed(
                self.models.default_model.clone(),
            ));
        }

        Ok(())
    }
}
