//! Networking errors
//!
//! Seat precondition failures never show up here; they are silent no-ops
//! inside the controllers. `NetError` covers the plumbing around them.

use thiserror::Error;
use vehicle_core::SeatError;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Authority queue closed")]
    AuthorityClosed,

    #[error("Authority loop is already running")]
    AlreadyRunning,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Rejected by host: {0}")]
    Rejected(String),

    #[error("Session full ({max} players)")]
    SessionFull { max: usize },

    #[error("Unexpected handshake frame")]
    Handshake,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Seat(#[from] SeatError),
}

pub type Result<T> = std::result::Result<T, NetError>;
