//! A stand-in for a WebRTC stack. Offers and answers carry a synthetic SDP
//! plus a description of the sender's stream, so two endpoints that only
//! share a relay can still complete a full negotiation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PeerConnector, PeerEvent, PeerEvents, PeerOptions, PeerTransport, Role};
use crate::error::PeerError;
use crate::media::{LocalStream, StreamInfo, TrackKind};
use crate::protocol::SignalPayload;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Blob {
    Offer {
        sdp: String,
        stream: StreamInfo,
    },
    Answer {
        sdp: String,
        stream: StreamInfo,
    },
    Candidate {
        candidate: String,
    },
}

impl Blob {
    fn into_payload(self) -> SignalPayload {
        // Blob only holds strings and plain structs
        SignalPayload::new(serde_json::to_value(self).unwrap_or_default())
    }
}

fn synthetic_sdp(stream: &StreamInfo, trickle: bool) -> String {
    let mut sdp = format!("v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n", stream.id);
    for track in &stream.tracks {
        let media = match track.kind {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        };
        sdp.push_str(&format!("m={media} 9 UDP/TLS/RTP/SAVPF 96\r\n"));
        if !trickle {
            sdp.push_str("a=candidate:1 1 udp 2130706431 127.0.0.1 9 typ host\r\n");
            sdp.push_str("a=end-of-candidates\r\n");
        }
    }
    sdp
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackConnector;

impl PeerConnector for LoopbackConnector {
    fn open(
        &self,
        options: PeerOptions,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerTransport>, PeerError> {
        let transport = LoopbackTransport {
            role: options.role,
            trickle: options.trickle,
            local: options.local_stream,
            events,
            negotiated: false,
            closed: false,
        };
        if transport.role == Role::Initiator {
            transport.emit_local(|sdp, stream| Blob::Offer { sdp, stream });
        }
        Ok(Box::new(transport))
    }
}

struct LoopbackTransport {
    role: Role,
    trickle: bool,
    local: LocalStream,
    events: PeerEvents,
    negotiated: bool,
    closed: bool,
}

impl LoopbackTransport {
    fn emit(&self, event: PeerEvent) {
        if !self.closed {
            let _ = self.events.send(event);
        }
    }

    fn emit_local(&self, make: impl FnOnce(String, StreamInfo) -> Blob) {
        let info = self.local.info().clone();
        let sdp = synthetic_sdp(&info, self.trickle);
        self.emit(PeerEvent::Signal(make(sdp, info).into_payload()));
        if self.trickle {
            let candidate = Blob::Candidate {
                candidate: "candidate:1 1 udp 2130706431 127.0.0.1 9 typ host".into(),
            };
            self.emit(PeerEvent::Signal(candidate.into_payload()));
        }
    }

    fn fail(&self, reason: String) {
        debug!(%reason, "loopback negotiation failed");
        self.emit(PeerEvent::Error(PeerError::Negotiation(reason)));
    }
}

impl PeerTransport for LoopbackTransport {
    fn signal(&mut self, payload: SignalPayload) -> Result<(), PeerError> {
        if self.closed {
            return Err(PeerError::Destroyed);
        }
        let blob = match serde_json::from_value::<Blob>(payload.into_value()) {
            Ok(blob) => blob,
            Err(err) => {
                self.fail(format!("unreadable signal: {err}"));
                return Ok(());
            }
        };
        if matches!(blob, Blob::Candidate { .. }) {
            return Ok(());
        }
        if self.negotiated {
            return Err(PeerError::AlreadyNegotiated);
        }
        match (self.role, blob) {
            (Role::Responder, Blob::Offer { stream, .. }) => {
                self.negotiated = true;
                self.emit_local(|sdp, stream| Blob::Answer { sdp, stream });
                self.emit(PeerEvent::Stream(stream));
            }
            (Role::Initiator, Blob::Answer { stream, .. }) => {
                self.negotiated = true;
                self.emit(PeerEvent::Stream(stream));
            }
            (role, _) => self.fail(format!("unexpected signal for {role:?}")),
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackInfo;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn local(id: &str) -> LocalStream {
        LocalStream::new(StreamInfo {
            id: id.into(),
            tracks: vec![TrackInfo {
                kind: TrackKind::Audio,
                label: "mic".into(),
                resolution: None,
            }],
        })
    }

    fn open(role: Role, trickle: bool) -> (Box<dyn PeerTransport>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let options = PeerOptions {
            role,
            trickle,
            local_stream: local("me"),
        };
        (LoopbackConnector.open(options, tx).unwrap(), rx)
    }

    #[test]
    fn initiator_emits_a_single_complete_offer_without_trickle() {
        let (_t, mut rx) = open(Role::Initiator, false);
        let Ok(PeerEvent::Signal(offer)) = rx.try_recv() else {
            panic!("expected offer");
        };
        assert_eq!(offer.as_value()["type"], "offer");
        assert!(offer.as_value()["sdp"].as_str().unwrap().contains("end-of-candidates"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn trickle_sends_candidates_separately() {
        let (_t, mut rx) = open(Role::Initiator, true);
        assert!(matches!(rx.try_recv(), Ok(PeerEvent::Signal(_))));
        let Ok(PeerEvent::Signal(candidate)) = rx.try_recv() else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.as_value()["type"], "candidate");
    }

    #[test]
    fn responder_rejects_a_second_offer() {
        let (mut offerer, mut orx) = open(Role::Initiator, false);
        let Ok(PeerEvent::Signal(offer)) = orx.try_recv() else {
            panic!("expected offer");
        };
        let (mut answerer, _arx) = open(Role::Responder, false);
        answerer.signal(offer.clone()).unwrap();
        assert_eq!(answerer.signal(offer), Err(PeerError::AlreadyNegotiated));
        offerer.close();
    }

    #[test]
    fn garbage_is_reported_as_negotiation_error() {
        let (mut t, mut rx) = open(Role::Responder, false);
        t.signal(SignalPayload::new(json!({ "hello": 1 }))).unwrap();
        assert!(matches!(rx.try_recv(), Ok(PeerEvent::Error(PeerError::Negotiation(_)))));
    }

    #[test]
    fn closed_transport_stays_silent() {
        let (mut t, mut rx) = open(Role::Responder, false);
        t.close();
        assert_eq!(t.signal(SignalPayload::new(json!({}))), Err(PeerError::Destroyed));
        assert!(rx.try_recv().is_err());
    }
}
