use super::{
    NegotiatorEvent, SessionEvent, SessionNegotiator, spawn_event_pump, transport_error,
};
use crate::calls::media::{LocalMedia, MediaTransport, MediaTransportEvent};
use crate::config::NegotiationStrategy;
use async_trait::async_trait;
use callcore::sdp::Sdp;
use callcore::{
    CandidateQueue, IceCandidate, NegotiationError, SdpType, SessionDescription, SessionId,
    TrackKind,
};
use log::{debug, warn};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

#[derive(Default)]
struct PeerConnectionState {
    local: Option<Sdp>,
    remote: Option<Sdp>,
    candidates: CandidateQueue,
    closed: bool,
}

/// SDP offer/answer negotiation with trickled ICE.
pub struct PeerConnectionNegotiator {
    session_id: SessionId,
    transport: Arc<dyn MediaTransport>,
    state: Mutex<PeerConnectionState>,
    /// ICE username fragment of our description, stamped on gathered candidates.
    local_ufrag: Arc<OnceLock<String>>,
    pump: JoinHandle<()>,
}

impl PeerConnectionNegotiator {
    pub fn new(
        session_id: SessionId,
        transport: Arc<dyn MediaTransport>,
        transport_events: mpsc::Receiver<MediaTransportEvent>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let local_ufrag: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let ufrag = local_ufrag.clone();
        let pump = spawn_event_pump(session_id.clone(), transport_events, events, move |c| {
            let c = c.with_sdp_mid("0").with_sdp_m_line_index(0);
            Some(match ufrag.get() {
                Some(ufrag) => c.with_username_fragment(ufrag.clone()),
                None => c,
            })
        });

        Self {
            session_id,
            transport,
            state: Mutex::new(PeerConnectionState::default()),
            local_ufrag,
            pump,
        }
    }

    async fn set_local(
        &self,
        state: &mut PeerConnectionState,
        sdp: Sdp,
    ) -> Result<(), NegotiationError> {
        let _ = self.local_ufrag.set(sdp.ice_ufrag.clone());
        self.transport
            .set_local_media(&sdp.sending_kinds())
            .await
            .map_err(transport_error)?;
        state.local = Some(sdp);
        Ok(())
    }

    /// Apply a remote description and flush queued candidates in receipt order.
    async fn set_remote(
        &self,
        state: &mut PeerConnectionState,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        if state.remote.is_some() {
            return Err(NegotiationError::RemoteDescriptionAlreadySet);
        }
        let sdp = Sdp::parse(&description.sdp)?;
        self.transport
            .set_remote_media(&sdp.sending_kinds())
            .await
            .map_err(transport_error)?;
        state.remote = Some(sdp);

        let queued = state.candidates.release();
        if !queued.is_empty() {
            debug!(
                "Applying {} queued candidate(s) for {}",
                queued.len(),
                self.session_id
            );
        }
        for candidate in queued {
            self.apply_candidate(&candidate).await;
        }
        Ok(())
    }

    async fn apply_candidate(&self, candidate: &IceCandidate) {
        match candidate.attribute() {
            Ok(attr) => {
                if let Err(e) = self.transport.add_remote_candidate(&attr).await {
                    warn!("Failed to apply candidate for {}: {e}", self.session_id);
                }
            }
            Err(e) => warn!("Dropping malformed candidate for {}: {e}", self.session_id),
        }
    }
}

fn expect_type(
    description: &SessionDescription,
    expected: SdpType,
) -> Result<(), NegotiationError> {
    if description.sdp_type == expected {
        Ok(())
    } else {
        Err(NegotiationError::UnexpectedType {
            expected: expected.as_str(),
            got: description.sdp_type.as_str(),
        })
    }
}

#[async_trait]
impl SessionNegotiator for PeerConnectionNegotiator {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn strategy(&self) -> NegotiationStrategy {
        NegotiationStrategy::PeerConnection
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

        let sdp = Sdp::offer(&self.session_id, &media.kinds());
        let description = SessionDescription::offer(sdp.to_string());
        self.set_local(&mut state, sdp).await?;
        debug!("Created offer for {}", self.session_id);
        Ok(description)
    }

    async fn create_answer(
        &self,
        media: &LocalMedia,
        remote_offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        expect_type(remote_offer, SdpType::Offer)?;

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(NegotiationError::Closed);
        }
        if state.local.is_some() {
            return Err(NegotiationError::AlreadyCreated("answer"));
        }

        self.set_remote(&mut state, remote_offer).await?;
        let Some(offer) = state.remote.as_ref() else {
            return Err(NegotiationError::Closed);
        };
        let sdp = Sdp::answer(&self.session_id, offer, &media.kinds());
        let description = SessionDescription::answer(sdp.to_string());
        self.set_local(&mut state, sdp).await?;
        debug!("Created answer for {}", self.session_id);
        Ok(description)
    }

    async fn apply_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(NegotiationError::Closed);
        }
        // The offerer expects an answer; otherwise we are waiting for an offer.
        let expected = if state.local.is_some() {
            SdpType::Answer
        } else {
            SdpType::Offer
        };
        if state.remote.is_some() {
            return Err(NegotiationError::RemoteDescriptionAlreadySet);
        }
        expect_type(description, expected)?;
        self.set_remote(&mut state, description).await
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = candidate.attribute() {
            warn!("Dropping malformed candidate for {}: {e}", self.session_id);
            return;
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        match state.candidates.push(candidate) {
            Some(candidate) => self.apply_candidate(&candidate).await,
            None => debug!(
                "Queued candidate for {} ({} waiting for remote description)",
                self.session_id,
                state.candidates.len()
            ),
        }
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
        debug!("Closed negotiator for {}", self.session_id);
    }
}

impl Drop for PeerConnectionNegotiator {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
