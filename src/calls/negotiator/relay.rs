use super::{SessionEvent, SessionNegotiator, spawn_event_pump, transport_error};
use crate::calls::media::{LocalMedia, MediaTransport, MediaTransportEvent};
use crate::config::NegotiationStrategy;
use async_trait::async_trait;
use callcore::{
    IceCandidate, NegotiationError, SdpType, SessionDescription, SessionId, TrackKind,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Description exchanged by the relay strategy, carried as JSON in the `sdp`
/// field of an offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    /// Relay endpoint both sides join.
    pub relay: String,
    /// Room on the relay; always the session id.
    pub room: String,
    /// Per-participant join token.
    pub token: String,
    /// Tracks the author publishes.
    pub tracks: Vec<TrackKind>,
}

impl RelayDescriptor {
    fn parse(session_id: &SessionId, raw: &str) -> Result<Self, NegotiationError> {
        let descriptor: RelayDescriptor = serde_json::from_str(raw)
            .map_err(|e| NegotiationError::MalformedDescription(e.to_string()))?;
        if descriptor.room != session_id.as_str() {
            return Err(NegotiationError::MalformedDescription(format!(
                "relay room {} does not match session",
                descriptor.room
            )));
        }
        Ok(descriptor)
    }

    fn encode(&self) -> Result<String, NegotiationError> {
        serde_json::to_string(self).map_err(|e| NegotiationError::MalformedDescription(e.to_string()))
    }
}

#[derive(Default)]
struct RelayState {
    local: Option<RelayDescriptor>,
    remote: Option<RelayDescriptor>,
    closed: bool,
}

/// Negotiation through a hosted media relay.
pub struct RelayNegotiator {
    session_id: SessionId,
    relay_url: String,
    transport: Arc<dyn MediaTransport>,
    state: Mutex<RelayState>,
    pump: JoinHandle<()>,
}

impl RelayNegotiator {
    pub fn new(
        session_id: SessionId,
        relay_url: String,
        transport: Arc<dyn MediaTransport>,
        transport_events: mpsc::Receiver<MediaTransportEvent>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let pump = spawn_event_pump(session_id.clone(), transport_events, events, |c| {
            debug!("Relay session ignores local candidate {}", c.candidate);
            None
        });
        Self {
            session_id,
            relay_url,
            transport,
            state: Mutex::new(RelayState::default()),
            pump,
        }
    }

    /// Join token for one side of the session, stable for a given session
    /// id and role.
    fn join_token(&self, role: SdpType) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"relay:");
        hasher.update(self.session_id.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(role.as_str().as_bytes());
        hex::encode(&hasher.finalize()[0..8])
    }

    async fn set_remote(
        &self,
        state: &mut RelayState,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        if state.remote.is_some() {
            return Err(NegotiationError::RemoteDescriptionAlreadySet);
        }
        let descriptor = RelayDescriptor::parse(&self.session_id, &description.sdp)?;
        self.transport
            .set_remote_media(&descriptor.tracks)
            .await
            .map_err(transport_error)?;
        state.remote = Some(descriptor);
        Ok(())
    }

    async fn set_local(
        &self,
        state: &mut RelayState,
        descriptor: RelayDescriptor,
    ) -> Result<String, NegotiationError> {
        let encoded = descriptor.encode()?;
        self.transport
            .set_local_media(&descriptor.tracks)
            .await
            .map_err(transport_error)?;
        state.local = Some(descriptor);
        Ok(encoded)
    }
}

#[async_trait]
impl SessionNegotiator for RelayNegotiator {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn strategy(&self) -> NegotiationStrategy {
        NegotiationStrategy::Relay
    }

    async fn create_offer(
        &self,
        media: &LocalMedia,
    ) -> Result<SessionDescription, NegotiationError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(NegotiationError::Closed);
        }
        if state.local.is_some() {
            return Err(NegotiationError::AlreadyCreated("offer"));
        }

        let descriptor = RelayDescriptor {
            relay: self.relay_url.clone(),
            room: self.session_id.to_string(),
            token: self.join_token(SdpType::Offer),
            tracks: media.kinds(),
        };
        let sdp = self.set_local(&mut state, descriptor).await?;
        debug!("Created relay offer for {} via {}", self.session_id, self.relay_url);
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(
        &self,
        media: &LocalMedia,
        remote_offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        if remote_offer.sdp_type != SdpType::Offer {
            return Err(NegotiationError::UnexpectedType {
                expected: SdpType::Offer.as_str(),
                got: remote_offer.sdp_type.as_str(),
            });
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(NegotiationError::Closed);
        }
        if state.local.is_some() {
            return Err(NegotiationError::AlreadyCreated("answer"));
        }

        self.set_remote(&mut state, remote_offer).await?;
        // Join the relay the caller picked.
        let relay = state
            .remote
            .as_ref()
            .map(|d| d.relay.clone())
            .unwrap_or_else(|| self.relay_url.clone());
        let descriptor = RelayDescriptor {
            relay,
            room: self.session_id.to_string(),
            token: self.join_token(SdpType::Answer),
            tracks: media.kinds(),
        };
        let sdp = self.set_local(&mut state, descriptor).await?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn apply_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(NegotiationError::Closed);
        }
        let expected = if state.local.is_some() {
            SdpType::Answer
        } else {
            SdpType::Offer
        };
        if state.remote.is_some() {
            return Err(NegotiationError::RemoteDescriptionAlreadySet);
        }
        if description.sdp_type != expected {
            return Err(NegotiationError::UnexpectedType {
                expected: expected.as_str(),
                got: description.sdp_type.as_str(),
            });
        }
        self.set_remote(&mut state, description).await
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        debug!(
            "Relay session {} ignores remote candidate {}",
            self.session_id, candidate.candidate
        );
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        if let Err(e) = self.transport.set_track_enabled(kind, enabled).await {
            warn!("Failed to set {kind} sender enabled={enabled}: {e}");
        }
    }

    async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.transport.close().await;
        self.pump.abort();
    }
}

impl Drop for RelayNegotiator {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::media::{Connectivity, LoopbackNetwork, MediaTransportFactory};
    use crate::calls::negotiator::NegotiatorEvent;
    use crate::testing::FakeMediaDevices;
    use callcore::MediaConstraints;

    async fn negotiator(
        network: &LoopbackNetwork,
        sid: &SessionId,
    ) -> (RelayNegotiator, mpsc::UnboundedReceiver<SessionEvent>) {
        let (transport, rx) = network
            .create_transport(sid, Connectivity::Relay)
            .await
            .unwrap();
        let (tx, events) = mpsc::unbounded_channel();
        (
            RelayNegotiator::new(sid.clone(), "wss://relay.test/media".into(), transport, rx, tx),
            events,
        )
    }

    #[tokio::test]
    async fn test_relay_round_trip_connects() {
        let network = LoopbackNetwork::new();
        let sid = SessionId::new("R1");
        let devices = FakeMediaDevices::new();
        let media = LocalMedia::acquire(&devices, MediaConstraints::audio()).await.unwrap();

        let (caller, mut caller_events) = negotiator(&network, &sid).await;
        let (callee, mut callee_events) = negotiator(&network, &sid).await;

        let offer = caller.create_offer(&media).await.unwrap();
        let descriptor: RelayDescriptor = serde_json::from_str(&offer.sdp).unwrap();
        assert_eq!(descriptor.room, "R1");
        assert_eq!(descriptor.relay, "wss://relay.test/media");
        assert_eq!(descriptor.tracks, vec![TrackKind::Audio]);

        let answer = callee.create_answer(&media, &offer).await.unwrap();
        let answered: RelayDescriptor = serde_json::from_str(&answer.sdp).unwrap();
        assert_ne!(answered.token, descriptor.token);

        // Candidates are irrelevant to the relay strategy.
        caller
            .add_remote_candidate(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 1 typ host"))
            .await;
        caller.apply_remote_description(&answer).await.unwrap();

        for events in [&mut caller_events, &mut callee_events] {
            let event = events.recv().await.unwrap();
            assert_eq!(
                event.event,
                NegotiatorEvent::RemoteTrack {
                    kind: TrackKind::Audio,
                    active: true
                }
            );
        }
    }

    #[tokio::test]
    async fn test_relay_tokens_are_stable_per_session_and_role() {
        let network = LoopbackNetwork::new();
        let replay_network = LoopbackNetwork::new();
        let devices = FakeMediaDevices::new();
        let media = LocalMedia::acquire(&devices, MediaConstraints::audio()).await.unwrap();

        let sid = SessionId::new("R3");
        let (first, _first_events) = negotiator(&network, &sid).await;
        let (second, _second_events) = negotiator(&replay_network, &sid).await;
        let first_offer = first.create_offer(&media).await.unwrap();
        let second_offer = second.create_offer(&media).await.unwrap();
        let first_token = serde_json::from_str::<RelayDescriptor>(&first_offer.sdp)
            .unwrap()
            .token;
        let second_token = serde_json::from_str::<RelayDescriptor>(&second_offer.sdp)
            .unwrap()
            .token;
        assert_eq!(first_token, second_token);
        assert_eq!(first_token.len(), 16);

        let (callee, _callee_events) = negotiator(&network, &sid).await;
        let answer = callee.create_answer(&media, &first_offer).await.unwrap();
        let answer_token = serde_json::from_str::<RelayDescriptor>(&answer.sdp)
            .unwrap()
            .token;
        assert_ne!(answer_token, first_token);

        let other = SessionId::new("R4");
        let (elsewhere, _elsewhere_events) = negotiator(&network, &other).await;
        let other_offer = elsewhere.create_offer(&media).await.unwrap();
        let other_token = serde_json::from_str::<RelayDescriptor>(&other_offer.sdp)
            .unwrap()
            .token;
        assert_ne!(other_token, first_token);
    }

    #[tokio::test]
    async fn test_relay_rejects_foreign_room() {
        let network = LoopbackNetwork::new();
        let sid = SessionId::new("R2");
        let devices = FakeMediaDevices::new();
        let media = LocalMedia::acquire(&devices, MediaConstraints::audio()).await.unwrap();
        let (callee, _events) = negotiator(&network, &sid).await;

        let foreign = RelayDescriptor {
            relay: "wss://relay.test/media".into(),
            room: "OTHER".into(),
            token: "t".into(),
            tracks: vec![TrackKind::Audio],
        };
        let offer = SessionDescription::offer(serde_json::to_string(&foreign).unwrap());
        assert!(matches!(
            callee.create_answer(&media, &offer).await,
            Err(NegotiationError::MalformedDescription(_))
        ));
    }
}
