//! Session negotiation.
//!
//! A [`SessionNegotiator`] owns the media transport of one session. It turns
//! local media into an offer or answer, applies the peer's description and
//! candidates, and reports transport activity as [`NegotiatorEvent`]s tagged
//! with the session id.
//!
//! Two strategies implement the same trait:
//!
//! - [`PeerConnectionNegotiator`]: SDP offer/answer with trickled ICE candidates.
//! - [`RelayNegotiator`]: a hosted media relay; descriptions carry a relay room
//!   descriptor and candidates are not used.

mod peer_connection;
mod relay;

pub use peer_connection::PeerConnectionNegotiator;
pub use relay::{RelayDescriptor, RelayNegotiator};

use crate::calls::media::{
    Connectivity, LocalMedia, MediaTransportEvent, MediaTransportFactory, TransportError,
};
use crate::config::{CallControllerConfig, NegotiationStrategy};
use async_trait::async_trait;
use callcore::{IceCandidate, NegotiationError, SessionDescription, SessionId, TrackKind};
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Activity reported by a negotiator.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorEvent {
    /// A local candidate ready to be sent to the peer.
    LocalCandidate(IceCandidate),
    RemoteTrack { kind: TrackKind, active: bool },
    TransportFailed(String),
}

/// A [`NegotiatorEvent`] and the session it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub event: NegotiatorEvent,
}

#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    fn session_id(&self) -> &SessionId;

    fn strategy(&self) -> NegotiationStrategy;

    /// Create the offer for our captured tracks. Once per session.
    async fn create_offer(&self, media: &LocalMedia)
    -> Result<SessionDescription, NegotiationError>;

    /// Apply the peer's offer and create our answer. Once per session.
    async fn create_answer(
        &self,
        media: &LocalMedia,
        remote_offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError>;

    /// Apply the peer's answer (or offer). Fails if malformed, of the wrong
    /// type, or applied twice.
    async fn apply_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Apply a peer candidate, queuing it until the remote description is set.
    /// Malformed candidates are logged and dropped.
    async fn add_remote_candidate(&self, candidate: IceCandidate);

    /// Enable or disable our outbound track at the transport.
    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool);

    /// Close the media transport. Idempotent.
    async fn close(&self);
}

/// Create the negotiator for a session according to the configured strategy.
pub async fn open_negotiator(
    config: &CallControllerConfig,
    session_id: &SessionId,
    transports: &dyn MediaTransportFactory,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<Arc<dyn SessionNegotiator>, TransportError> {
    let negotiator: Arc<dyn SessionNegotiator> = match config.strategy {
        NegotiationStrategy::PeerConnection => {
            let (transport, rx) = transports
                .create_transport(session_id, Connectivity::Ice)
                .await?;
            Arc::new(PeerConnectionNegotiator::new(
                session_id.clone(),
                transport,
                rx,
                events,
            ))
        }
        NegotiationStrategy::Relay => {
            let (transport, rx) = transports
                .create_transport(session_id, Connectivity::Relay)
                .await?;
            Arc::new(RelayNegotiator::new(
                session_id.clone(),
                config.relay_url.clone(),
                transport,
                rx,
                events,
            ))
        }
    };
    debug!(
        "Opened {} negotiator for {}",
        negotiator.strategy(),
        session_id
    );
    Ok(negotiator)
}

/// Forward transport events as negotiator events until the transport closes.
///
/// `on_candidate` decides what happens to locally gathered candidates.
fn spawn_event_pump<F>(
    session_id: SessionId,
    mut rx: mpsc::Receiver<MediaTransportEvent>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    on_candidate: F,
) -> JoinHandle<()>
where
    F: Fn(IceCandidate) -> Option<IceCandidate> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let event = match event {
                MediaTransportEvent::LocalCandidate(candidate) => match on_candidate(candidate) {
                    Some(candidate) => NegotiatorEvent::LocalCandidate(candidate),
                    None => continue,
                },
                MediaTransportEvent::RemoteTrack { kind, active } => {
                    NegotiatorEvent::RemoteTrack { kind, active }
                }
                MediaTransportEvent::Failed(reason) => NegotiatorEvent::TransportFailed(reason),
                MediaTransportEvent::Closed => break,
            };
            let tagged = SessionEvent {
                session_id: session_id.clone(),
                event,
            };
            if tx.send(tagged).is_err() {
                break;
            }
        }
        debug!("Negotiator event pump for {session_id} finished");
    })
}

fn transport_error(e: TransportError) -> NegotiationError {
    match e {
        TransportError::Closed => NegotiationError::Closed,
        other => NegotiationError::Transport(other.to_string()),
    }
}
