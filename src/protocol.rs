use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Relay-assigned identifier of a connected client. Only meaningful for routing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, random id for a new connection.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque negotiation blob (SDP offer/answer or ICE data). Forwarded untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct SignalPayload(serde_json::Value);

impl SignalPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallInvite {
    pub from: ClientId,
    pub display_name: String,
    pub signal: SignalPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallAnswer {
    pub signal: SignalPayload,
    pub to: ClientId,
}

/// Frames a client sends to the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CallUser {
        user_to_call: ClientId,
        signal_data: SignalPayload,
        // Ignored by the relay, which stamps the real sender
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
        #[serde(default)]
        name: String,
    },
    AnswerCall {
        signal: SignalPayload,
        to: ClientId,
    },
    EndCall {
        to: ClientId,
    },
}

impl ClientMessage {
    pub fn invite(target: ClientId, display_name: impl Into<String>, signal: SignalPayload) -> Self {
        ClientMessage::CallUser {
            user_to_call: target,
            signal_data: signal,
            from: None,
            name: display_name.into(),
        }
    }

    pub fn answer(answer: CallAnswer) -> Self {
        ClientMessage::AnswerCall {
            signal: answer.signal,
            to: answer.to,
        }
    }
}

/// Frames the relay sends to a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RelayMessage {
    Me { id: ClientId },
    CallUser {
        from: ClientId,
        name: String,
        signal: SignalPayload,
    },
    CallAccepted {
        from: ClientId,
        signal: SignalPayload,
    },
    CallEnded { from: ClientId },
    PeerLeft { id: ClientId },
    Error { message: String },
}

impl From<CallInvite> for RelayMessage {
    fn from(invite: CallInvite) -> Self {
        RelayMessage::CallUser {
            from: invite.from,
            name: invite.display_name,
            signal: invite.signal,
        }
    }
}
