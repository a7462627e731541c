//! Peer-to-peer call signaling: a rendezvous relay that forwards opaque
//! negotiation payloads, and the client-side call controller that drives one
//! peer session at a time through it.

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod signaling;

pub use controller::{CallAgent, CallController, CallHandle, CallState, CallView, EndReason, Ringing};
pub use protocol::{CallAnswer, CallInvite, ClientId, ClientMessage, RelayMessage, SignalPayload};
pub use relay::Relay;
