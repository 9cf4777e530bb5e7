//! # Application State Management
//!
//! `AppState` is what every request handler and stream session receives
//! through `web::Data`. It bundles:
//!
//! - the configuration, loaded once and never mutated (`Arc<AppConfig>`)
//! - the model registry built from that configuration
//! - the upstream client (behind the `UpstreamClient` trait so tests can
//!   point it at local fakes)
//! - relay metrics, shared by all workers
//!
//! ## Sharing:
//! Configuration and the registry are read-only, and every metric is an
//! atomic counter. Sessions and requests never share mutable data.

use crate::config::AppConfig;
use crate::error::{RelayError, UpstreamError};
use crate::models::ModelRegistry;
use crate::upstream::{DeepgramClient, UpstreamClient};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub models: Arc<ModelRegistry>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub metrics: Arc<RelayMetrics>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the state with the Deepgram client described by `config`.
    pub fn new(config: AppConfig) -> Result<Self, UpstreamError> {
        let upstream = DeepgramClient::from_config(&config)?;
        Ok(Self::with_upstream(config, Arc::new(upstream)))
    }

    pub fn with_upstream(config: AppConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            models: Arc::new(ModelRegistry::from_config(&config.models)),
            config: Arc::new(config),
            upstream,
            metrics: Arc::new(RelayMetrics::default()),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Counters for both relay modes.
///
/// ## Batch outcomes:
/// Every request that reaches the batch relay increments `batch_requests` and
/// exactly one outcome counter.
///
/// ## Stream sessions:
/// `active_sessions` goes up when a bridge actor starts and down when it
/// stops; frames dropped by the liveness guard are counted separately.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    batch_requests: AtomicU64,
    batch_succeeded: AtomicU64,
    batch_client_errors: AtomicU64,
    batch_misconfigured: AtomicU64,
    batch_upstream_failures: AtomicU64,
    batch_aborted: AtomicU64,
    stream_sessions: AtomicU64,
    active_sessions: AtomicU64,
    stream_rejected: AtomicU64,
    frames_to_upstream: AtomicU64,
    frames_to_client: AtomicU64,
    frames_dropped: AtomicU64,
}

impl RelayMetrics {
    pub fn batch_started(&self) {
        self.batch_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_succeeded(&self) {
        self.batch_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_failed(&self, err: &RelayError) {
        let counter = match err {
            RelayError::MissingFields | RelayError::PayloadTooLarge => &self.batch_client_errors,
            RelayError::ServerMisconfigured => &self.batch_misconfigured,
            RelayError::TranscribeFailed => &self.batch_upstream_failures,
            RelayError::ConnectionAborted => &self.batch_aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.stream_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        // Never underflow, even if a close is reported twice.
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn session_rejected(&self) {
        self.stream_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_to_upstream(&self) {
        self.frames_to_upstream.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_to_client(&self) {
        self.frames_to_client.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            batch: BatchMetrics {
                requests: load(&self.batch_requests),
                succeeded: load(&self.batch_succeeded),
                client_errors: load(&self.batch_client_errors),
                misconfigured: load(&self.batch_misconfigured),
                upstream_failures: load(&self.batch_upstream_failures),
                aborted: load(&self.batch_aborted),
            },
            stream: StreamMetrics {
                sessions: load(&self.stream_sessions),
                active_sessions: load(&self.active_sessions),
                rejected: load(&self.stream_rejected),
                frames_to_upstream: load(&self.frames_to_upstream),
                frames_to_client: load(&self.frames_to_client),
                frames_dropped: load(&self.frames_dropped),
            },
        }
    }
}

/// Point-in-time copy of [`RelayMetrics`], ready to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batch: BatchMetrics,
    pub stream: StreamMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMetrics {
    pub requests: u64,
    pub succeeded: u64,
    pub client_errors: u64,
    pub misconfigured: u64,
    pub upstream_failures: u64,
    pub aborted: u64,
}

impl BatchMetrics {
    /// Share of batch requests that did not succeed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.requests > 0 {
            (self.requests - self.succeeded.min(self.requests)) as f64 / self.requests as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamMetrics {
    pub sessions: u64,
    pub active_sessions: u64,
    pub rejected: u64,
    pub frames_to_upstream: u64,
    pub frames_to_client: u64,
    pub frames_dropped: u64,
}
