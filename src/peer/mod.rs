//! One peer connection per session. The underlying stack is reached through
//! [`PeerConnector`]; each session runs a task that forwards the stack's
//! events to its owner until the session is destroyed.

pub mod loopback;

use std::future::Future;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::PeerError;
use crate::media::{LocalStream, RemoteStream};
use crate::protocol::SignalPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub role: Role,
    /// With trickle off every candidate is gathered before the single signal fires.
    pub trickle: bool,
    pub local_stream: LocalStream,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Signal(SignalPayload),
    Stream(RemoteStream),
    Error(PeerError),
    Closed,
}

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

pub trait PeerConnector: Send + Sync + 'static {
    fn open(
        &self,
        options: PeerOptions,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerTransport>, PeerError>;
}

pub trait PeerTransport: Send {
    /// Feeds remote negotiation data into the connection.
    fn signal(&mut self, payload: SignalPayload) -> Result<(), PeerError>;

    /// Releases the connection. No events may be emitted afterwards.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: PeerEvent,
}

pub struct PeerSession {
    id: SessionId,
    role: Role,
    transport: Box<dyn PeerTransport>,
    cancel: Option<oneshot::Sender<()>>,
    remote: watch::Receiver<Option<RemoteStream>>,
    task: JoinHandle<()>,
}

impl PeerSession {
    pub fn open(
        connector: &dyn PeerConnector,
        id: SessionId,
        options: PeerOptions,
        sink: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, PeerError> {
        let role = options.role;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = connector.open(options, events_tx)?;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let (remote_tx, remote_rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    event = events_rx.recv() => {
                        let Some(event) = event else { break };
                        if let PeerEvent::Stream(stream) = &event {
                            remote_tx.send_replace(Some(stream.clone()));
                        }
                        let last = matches!(event, PeerEvent::Closed);
                        if sink.send(SessionEvent { session: id, event }).is_err() || last {
                            break;
                        }
                    }
                }
            }
        });

        debug!(session = id.0, ?role, "peer session opened");
        Ok(Self {
            id,
            role,
            transport,
            cancel: Some(cancel_tx),
            remote: remote_rx,
            task,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn signal(&mut self, payload: SignalPayload) -> Result<(), PeerError> {
        if self.is_destroyed() {
            return Err(PeerError::Destroyed);
        }
        self.transport.signal(payload)
    }

    /// Resolves once the remote stream arrives, or with `None` if the
    /// session ends first.
    pub fn remote_stream(&self) -> impl Future<Output = Option<RemoteStream>> + Send + use<> {
        let mut remote = self.remote.clone();
        async move {
            match remote.wait_for(Option::is_some).await {
                Ok(stream) => Option::clone(&stream),
                Err(_) => None,
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.cancel.is_none()
    }

    pub fn destroy(&mut self) {
        let Some(cancel) = self.cancel.take() else {
            return;
        };
        let _ = cancel.send(());
        self.transport.close();
        debug!(session = self.id.0, "peer session destroyed");
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.destroy();
        self.task.abort();
    }
}
