//! Rendezvous service: assigns client ids and forwards signaling payloads
//! between two connected clients. Holds nothing beyond the live id map.

pub mod ws;

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::protocol::{CallAnswer, CallInvite, ClientId, ClientMessage, RelayMessage};

pub type Outbox = mpsc::UnboundedSender<RelayMessage>;
pub type Inbox = mpsc::UnboundedReceiver<RelayMessage>;

type PeerMap = Arc<DashMap<ClientId, Outbox>>;

#[derive(Clone, Default)]
pub struct Relay {
    peers: PeerMap,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection under a fresh id and greets it with `me`.
    pub fn connect(&self) -> (ClientId, Inbox) {
        loop {
            if let Ok(conn) = self.connect_as(ClientId::fresh()) {
                return conn;
            }
        }
    }

    pub fn connect_as(&self, id: ClientId) -> Result<(ClientId, Inbox), RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.peers.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RelayError::IdTaken(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
            }
        }
        let _ = tx.send(RelayMessage::Me { id: id.clone() });
        info!(client = %id, "client connected");
        Ok((id, rx))
    }

    /// Drops the id and tells everyone else it left. Safe to call twice.
    pub fn disconnect(&self, id: &ClientId) {
        if self.peers.remove(id).is_none() {
            return;
        }
        info!(client = %id, "client disconnected");
        for peer in self.peers.iter() {
            let _ = peer.value().send(RelayMessage::PeerLeft { id: id.clone() });
        }
    }

    pub fn is_connected(&self, id: &ClientId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Routes one inbound client frame. `from` is the sender's real id.
    pub fn dispatch(&self, from: &ClientId, msg: ClientMessage) {
        match msg {
            ClientMessage::CallUser {
                user_to_call,
                signal_data,
                name,
                ..
            } => {
                let invite = CallInvite {
                    from: from.clone(),
                    display_name: name,
                    signal: signal_data,
                };
                self.relay_invite(&user_to_call, invite);
            }
            ClientMessage::AnswerCall { signal, to } => {
                self.relay_answer(from, CallAnswer { signal, to });
            }
            ClientMessage::EndCall { to } => {
                self.relay_end(from, &to);
            }
        }
    }

    pub fn relay_invite(&self, target: &ClientId, invite: CallInvite) -> bool {
        let from = invite.from.clone();
        let delivered = self.send_to(target, invite.into());
        debug!(%from, %target, delivered, "relayed invite");
        delivered
    }

    /// Hands the answer back to the original caller as `callAccepted`.
    pub fn relay_answer(&self, from: &ClientId, answer: CallAnswer) -> bool {
        let delivered = self.send_to(
            &answer.to,
            RelayMessage::CallAccepted {
                from: from.clone(),
                signal: answer.signal,
            },
        );
        debug!(%from, to = %answer.to, delivered, "relayed answer");
        delivered
    }

    pub fn relay_end(&self, from: &ClientId, to: &ClientId) -> bool {
        let delivered = self.send_to(to, RelayMessage::CallEnded { from: from.clone() });
        debug!(%from, %to, delivered, "relayed hangup");
        delivered
    }

    /// Unknown or closed targets are dropped without telling the sender.
    pub fn send_to(&self, target: &ClientId, msg: RelayMessage) -> bool {
        match self.peers.get(target) {
            Some(peer_tx) => peer_tx.send(msg).is_ok(),
            None => false,
        }
    }
}
