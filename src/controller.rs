//! Call orchestration. [`CallController`] owns the relay transport and at
//! most one peer session, and maps their events onto [`CallState`].
//! [`CallAgent`] runs a controller as a task driven by relay frames, session
//! events, and commands from a [`CallHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CallError, SignalError};
use crate::media::{LocalStream, MediaConstraints, MediaSource, RemoteStream};
use crate::peer::{
    PeerConnector, PeerEvent, PeerOptions, PeerSession, Role, SessionEvent, SessionId,
};
use crate::protocol::{CallAnswer, CallInvite, ClientId, ClientMessage, RelayMessage, SignalPayload};
use crate::relay::Inbox;
use crate::signaling::SignalTransport;

#[derive(Debug, Clone, PartialEq)]
pub enum Ringing {
    Outbound { target: ClientId },
    Inbound { invite: CallInvite },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    PeerLeft,
    NegotiationFailed(String),
    SessionClosed,
    RelayLost,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Ringing(Ringing),
    InCall { peer: ClientId },
    Ended(EndReason),
}

impl CallState {
    /// Whether a new call may start from here.
    pub fn is_available(&self) -> bool {
        matches!(self, CallState::Idle | CallState::Ended(_))
    }

    /// The other party of the current call attempt, if any.
    pub fn peer(&self) -> Option<&ClientId> {
        match self {
            CallState::Ringing(Ringing::Outbound { target }) => Some(target),
            CallState::Ringing(Ringing::Inbound { invite }) => Some(&invite.from),
            CallState::InCall { peer } => Some(peer),
            CallState::Idle | CallState::Ended(_) => None,
        }
    }
}

/// What a UI renders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallView {
    pub me: Option<ClientId>,
    pub state: CallState,
    pub local: Option<LocalStream>,
    pub remote: Option<RemoteStream>,
}

pub struct CallController<T> {
    transport: T,
    connector: Arc<dyn PeerConnector>,
    display_name: String,
    session: Option<PeerSession>,
    next_session: u64,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    relay_open: bool,
    view: watch::Sender<CallView>,
}

impl<T: SignalTransport> CallController<T> {
    pub fn new(
        transport: T,
        connector: Arc<dyn PeerConnector>,
        local: Option<LocalStream>,
        display_name: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(CallView {
            local,
            ..CallView::default()
        });
        let controller = Self {
            transport,
            connector,
            display_name: display_name.into(),
            session: None,
            next_session: 0,
            session_tx,
            relay_open: true,
            view,
        };
        (controller, session_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.view.borrow().state.clone()
    }

    pub fn me(&self) -> Option<ClientId> {
        self.view.borrow().me.clone()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.view.borrow().remote.clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    pub fn call_user(&mut self, target: ClientId) -> Result<(), CallError> {
        let local = self.local_stream()?;
        if self.session.is_some() || !self.state().is_available() {
            return Err(CallError::Busy);
        }
        if !self.relay_open {
            return Err(SignalError::Closed.into());
        }
        self.open_session(Role::Initiator, local)?;
        info!(%target, "calling");
        self.set_state(CallState::Ringing(Ringing::Outbound { target }));
        Ok(())
    }

    pub fn answer_call(&mut self) -> Result<(), CallError> {
        let local = self.local_stream()?;
        let invite = match self.state() {
            CallState::Ringing(Ringing::Inbound { invite }) => invite,
            _ => return Err(CallError::NoIncomingCall),
        };
        if self.session.is_some() {
            return Err(CallError::Busy);
        }
        let session = self.open_session(Role::Responder, local)?;
        if let Err(err) = session.signal(invite.signal) {
            self.fail(EndReason::NegotiationFailed(err.to_string()));
            return Err(err.into());
        }
        info!(caller = %invite.from, "answered call");
        self.set_state(CallState::InCall { peer: invite.from });
        Ok(())
    }

    /// Hangs up. Repeated calls are harmless and send nothing.
    pub fn leave_call(&mut self) {
        match self.state() {
            CallState::Ringing(Ringing::Outbound { target: peer }) | CallState::InCall { peer } => {
                self.send(ClientMessage::EndCall { to: peer });
                self.teardown(EndReason::LocalHangup);
            }
            CallState::Ringing(Ringing::Inbound { invite }) => {
                info!(caller = %invite.from, "declined call");
                self.send(ClientMessage::EndCall { to: invite.from });
                self.set_state(CallState::Idle);
            }
            CallState::Idle | CallState::Ended(_) => {}
        }
    }

    pub fn handle_relay(&mut self, msg: RelayMessage) {
        match msg {
            RelayMessage::Me { id } => {
                info!(%id, "relay assigned id");
                self.view.send_modify(|view| view.me = Some(id));
            }
            RelayMessage::CallUser { from, name, signal } => {
                if self.session.is_some() || !self.state().is_available() {
                    debug!(%from, "busy, ignoring invite");
                    return;
                }
                info!(%from, %name, "incoming call");
                let invite = CallInvite {
                    from,
                    display_name: name,
                    signal,
                };
                self.set_state(CallState::Ringing(Ringing::Inbound { invite }));
            }
            RelayMessage::CallAccepted { from, signal } => self.on_accepted(from, signal),
            RelayMessage::CallEnded { from } => {
                if self.state().peer() == Some(&from) {
                    info!(peer = %from, "remote hung up");
                    self.teardown(EndReason::RemoteHangup);
                }
            }
            RelayMessage::PeerLeft { id } => {
                if self.state().peer() == Some(&id) {
                    info!(peer = %id, "peer left the relay");
                    self.teardown(EndReason::PeerLeft);
                }
            }
            RelayMessage::Error { message } => warn!(%message, "relay reported an error"),
        }
    }

    pub fn handle_session(&mut self, ev: SessionEvent) {
        let Some(session) = &self.session else {
            return;
        };
        if session.id() != ev.session {
            debug!(session = ev.session.0, "dropping event from stale session");
            return;
        }
        let role = session.role();
        match ev.event {
            PeerEvent::Signal(payload) => self.on_local_signal(role, payload),
            PeerEvent::Stream(stream) => {
                info!(stream = %stream.id, "remote stream received");
                self.view.send_modify(|view| view.remote = Some(stream));
            }
            PeerEvent::Error(err) => {
                warn!("peer negotiation failed: {err}");
                self.fail(EndReason::NegotiationFailed(err.to_string()));
            }
            PeerEvent::Closed => {
                info!("peer connection closed");
                self.fail(EndReason::SessionClosed);
            }
        }
    }

    pub fn relay_closed(&mut self) {
        if !self.relay_open {
            return;
        }
        self.relay_open = false;
        warn!("relay connection lost");
        if self.session.is_some() || self.state().peer().is_some() {
            self.teardown(EndReason::RelayLost);
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.destroy();
        }
    }

    fn local_stream(&self) -> Result<LocalStream, CallError> {
        self.view.borrow().local.clone().ok_or(CallError::NoLocalMedia)
    }

    fn open_session(&mut self, role: Role, local: LocalStream) -> Result<&mut PeerSession, CallError> {
        self.next_session += 1;
        let options = PeerOptions {
            role,
            trickle: false,
            local_stream: local,
        };
        let session = PeerSession::open(
            self.connector.as_ref(),
            SessionId(self.next_session),
            options,
            self.session_tx.clone(),
        )?;
        Ok(self.session.insert(session))
    }

    fn on_accepted(&mut self, from: ClientId, signal: SignalPayload) {
        let target = match self.state() {
            CallState::Ringing(Ringing::Outbound { target }) if target == from => target,
            _ => {
                debug!(%from, "ignoring unexpected callAccepted");
                return;
            }
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.signal(signal) {
            Ok(()) => {
                info!(peer = %target, "call accepted");
                self.set_state(CallState::InCall { peer: target });
            }
            Err(err) => self.fail(EndReason::NegotiationFailed(err.to_string())),
        }
    }

    // The session's own offer or answer, ready to go out through the relay.
    fn on_local_signal(&mut self, role: Role, signal: SignalPayload) {
        let Some(peer) = self.state().peer().cloned() else {
            return;
        };
        let msg = match role {
            Role::Initiator => ClientMessage::invite(peer, self.display_name.clone(), signal),
            Role::Responder => ClientMessage::answer(CallAnswer { signal, to: peer }),
        };
        if !self.send(msg) {
            self.teardown(EndReason::RelayLost);
        }
    }

    fn send(&mut self, msg: ClientMessage) -> bool {
        match self.transport.send(msg) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to reach relay: {err}");
                false
            }
        }
    }

    // A local failure: the other side is still waiting, so tell it once.
    fn fail(&mut self, reason: EndReason) {
        if let Some(peer) = self.state().peer().cloned() {
            if self.relay_open {
                self.send(ClientMessage::EndCall { to: peer });
            }
        }
        self.teardown(reason);
    }

    fn teardown(&mut self, reason: EndReason) {
        self.shutdown();
        self.view.send_modify(|view| view.remote = None);
        self.set_state(CallState::Ended(reason));
    }

    fn set_state(&mut self, state: CallState) {
        debug!(?state, "call state");
        self.view.send_modify(|view| view.state = state);
    }
}

enum Command {
    CallUser(ClientId, oneshot::Sender<Result<(), CallError>>),
    AnswerCall(oneshot::Sender<Result<(), CallError>>),
    LeaveCall(oneshot::Sender<()>),
    SetName(String),
}

/// Cloneable front end to a running controller. The controller stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<CallView>,
}

impl CallHandle {
    pub async fn call_user(&self, target: ClientId) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::CallUser(target, tx))?;
        rx.await.map_err(|_| CallError::Stopped)?
    }

    pub async fn answer_call(&self) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::AnswerCall(tx))?;
        rx.await.map_err(|_| CallError::Stopped)?
    }

    pub async fn leave_call(&self) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::LeaveCall(tx))?;
        rx.await.map_err(|_| CallError::Stopped)
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), CallError> {
        self.submit(Command::SetName(name.into()))
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.view.borrow().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    /// Waits until the view satisfies `pred` and returns that view.
    pub async fn wait_for(&self, mut pred: impl FnMut(&CallView) -> bool) -> Result<CallView, CallError> {
        let mut view = self.view.clone();
        let seen = view.wait_for(|v| pred(v)).await.map_err(|_| CallError::Stopped)?;
        Ok(CallView::clone(&seen))
    }

    /// Resolves once the call is over, including when it already is.
    pub async fn ended(&self) -> Result<EndReason, CallError> {
        let view = self.wait_for(|v| matches!(v.state, CallState::Ended(_))).await?;
        match view.state {
            CallState::Ended(reason) => Ok(reason),
            _ => Err(CallError::Stopped),
        }
    }

    fn submit(&self, cmd: Command) -> Result<(), CallError> {
        self.commands.send(cmd).map_err(|_| CallError::Stopped)
    }
}

pub struct CallAgent<T> {
    controller: CallController<T>,
    sessions: mpsc::UnboundedReceiver<SessionEvent>,
    inbox: Inbox,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<T: SignalTransport> CallAgent<T> {
    /// Acquires local media once, then builds the controller. A capture
    /// failure leaves the agent running without media; calls are refused.
    pub async fn new<M: MediaSource>(
        media: &M,
        transport: T,
        inbox: Inbox,
        connector: Arc<dyn PeerConnector>,
        display_name: impl Into<String>,
    ) -> (Self, CallHandle) {
        let local = match media.acquire(&MediaConstraints::default()).await {
            Ok(stream) => {
                info!(stream = %stream.id(), "local media ready");
                Some(stream)
            }
            Err(err) => {
                warn!("local media unavailable, calls disabled: {err}");
                None
            }
        };
        let (controller, sessions) = CallController::new(transport, connector, local, display_name);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let handle = CallHandle {
            commands: commands_tx,
            view: controller.subscribe(),
        };
        let agent = Self {
            controller,
            sessions,
            inbox,
            commands,
        };
        (agent, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            let relay_open = self.controller.relay_open;
            tokio::select! {
                msg = self.inbox.recv(), if relay_open => match msg {
                    Some(msg) => self.controller.handle_relay(msg),
                    None => self.controller.relay_closed(),
                },
                Some(ev) = self.sessions.recv() => self.controller.handle_session(ev),
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.execute(cmd),
                    None => break,
                },
            }
        }
        self.controller.shutdown();
        debug!("call agent stopped");
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::CallUser(target, reply) => {
                let _ = reply.send(self.controller.call_user(target));
            }
            Command::AnswerCall(reply) => {
                let _ = reply.send(self.controller.answer_call());
            }
            Command::LeaveCall(reply) => {
                self.controller.leave_call();
                let _ = reply.send(());
            }
            Command::SetName(name) => self.controller.set_name(name),
        }
    }
}
