//! Error types, one enum per concern.

use thiserror::Error;

use crate::protocol::ClientId;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("client id {0} is already connected")]
    IdTaken(ClientId),

    #[error("missing or invalid admission token")]
    Unauthorized,
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("relay connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("capture permission denied")]
    PermissionDenied,

    #[error("no capture device available")]
    DeviceUnavailable,

    #[error("constraints cannot be satisfied: {0}")]
    Unsatisfiable(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer session already destroyed")]
    Destroyed,

    #[error("negotiation already completed")]
    AlreadyNegotiated,

    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no local media stream available")]
    NoLocalMedia,

    #[error("a call is already in progress")]
    Busy,

    #[error("no incoming call to answer")]
    NoIncomingCall,

    #[error("call controller stopped")]
    Stopped,

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}
