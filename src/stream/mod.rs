//! # Stream Sessions
//!
//! Per-session state for the streaming bridge. The WebSocket actor that moves
//! frames lives in websocket.rs at the root level; this module only holds the
//! lifecycle rules it follows.

pub mod session;

pub use session::{CloseAction, Side, StreamSession};
