//! WebSocket support: the upgrade handshake, the frame codec, and a
//! connection type that sends and receives whole messages.
//!
//! ```rust,no_run
//! use picodot::Router;
//! use picodot::realtime::with_websocket;
//!
//! let mut router = Router::new();
//! router
//!     .get("/echo", with_websocket(|_req, ws| async move {
//!         loop {
//!             let message = ws.receive().await?;
//!             ws.send(message).await?;
//!         }
//!     }))
//!     .unwrap();
//! ```

use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::error::ErrorClass;

pub mod frame;
mod websocket;

pub use websocket::{Message, WebSocket, accept_key, websocket_upgrade, with_websocket};

/// Errors raised on an open WebSocket connection.
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("fragmented websocket frames are not supported")]
    Fragmented,

    #[error("unknown websocket opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("websocket message of {length} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { length: u64, limit: usize },

    #[error("websocket connection closed")]
    ConnectionClosed,

    #[error("websocket text message is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("websocket I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ErrorClass for WebSocketError {}
