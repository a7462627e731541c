//! Client side of the relay. The controller only sees [`SignalTransport`];
//! inbound frames arrive on the receiver handed out at connect time.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{RelayError, SignalError};
use crate::protocol::{ClientId, ClientMessage, RelayMessage};
use crate::relay::{Inbox, Relay};

pub trait SignalTransport: Send + Sync + 'static {
    /// Queues a frame for the relay. Never waits on the network.
    fn send(&self, msg: ClientMessage) -> Result<(), SignalError>;
}

/// Direct attachment to an in-process [`Relay`].
pub struct RelayLink {
    relay: Relay,
    id: ClientId,
    closed: AtomicBool,
}

impl RelayLink {
    pub fn attach(relay: &Relay) -> (Self, Inbox) {
        let (id, inbox) = relay.connect();
        (Self::new(relay, id), inbox)
    }

    pub fn attach_as(relay: &Relay, id: ClientId) -> Result<(Self, Inbox), RelayError> {
        let (id, inbox) = relay.connect_as(id)?;
        Ok((Self::new(relay, id), inbox))
    }

    fn new(relay: &Relay, id: ClientId) -> Self {
        Self {
            relay: relay.clone(),
            id,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.relay.disconnect(&self.id);
        }
    }
}

impl SignalTransport for RelayLink {
    fn send(&self, msg: ClientMessage) -> Result<(), SignalError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalError::Closed);
        }
        self.relay.dispatch(&self.id, msg);
        Ok(())
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Relay connection over a websocket.
pub struct WsSignalClient {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

impl WsSignalClient {
    pub async fn connect(url: &str, token: Option<&str>) -> Result<(Self, Inbox), SignalError> {
        let url = match token {
            Some(token) => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{url}{sep}token={token}")
            }
            None => url.to_string(),
        };
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = sink.send(frame).await {
                    debug!("relay write failed: {err}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (inbound, inbox) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        warn!("relay connection lost: {err}");
                        break;
                    }
                };
                match serde_json::from_str::<RelayMessage>(text.as_str()) {
                    Ok(msg) => {
                        if inbound.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!("ignoring unreadable relay frame: {err}"),
                }
            }
        });

        Ok((Self { outbound, reader }, inbox))
    }
}

impl SignalTransport for WsSignalClient {
    fn send(&self, msg: ClientMessage) -> Result<(), SignalError> {
        let text = serde_json::to_string(&msg)?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| SignalError::Closed)
    }
}

impl Drop for WsSignalClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
