//! In-process media transport.
//!
//! [`LoopbackNetwork`] pairs the two transports created for the same session
//! id. Each endpoint is *ready* once it knows both track sets and, for ICE
//! connectivity, has seen a remote candidate. When both endpoints are ready the
//! session connects and each side reports the peer's tracks as remote tracks.
//! Disabling a sender afterwards is observed by the peer as the remote track
//! going inactive.

use async_trait::async_trait;
use callcore::candidate::CandidateAttribute;
use callcore::{IceCandidate, SessionId, TrackKind};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

use super::transport::{
    Connectivity, MediaTransport, MediaTransportEvent, MediaTransportFactory, TransportError,
    TransportState,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const FIRST_HOST_PORT: u16 = 40000;

#[derive(Debug, Default)]
struct EndpointState {
    local: Option<Vec<TrackKind>>,
    remote: Option<Vec<TrackKind>>,
    disabled: HashSet<TrackKind>,
    gathered: bool,
    remote_candidate_seen: bool,
    connected: bool,
    failed: bool,
    closed: bool,
}

impl EndpointState {
    fn ready(&self, connectivity: Connectivity) -> bool {
        !self.closed
            && !self.failed
            && self.local.is_some()
            && self.remote.is_some()
            && (connectivity == Connectivity::Relay || self.remote_candidate_seen)
    }
}

struct Endpoint {
    id: u64,
    session_id: SessionId,
    connectivity: Connectivity,
    state: Mutex<EndpointState>,
    events: mpsc::Sender<MediaTransportEvent>,
}

impl Endpoint {
    async fn emit(&self, event: MediaTransportEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Loopback endpoint {} for {}: event receiver dropped", self.id, self.session_id);
        }
    }

    async fn is_ready(&self) -> bool {
        self.state.lock().await.ready(self.connectivity)
    }

    /// Mark connected and report the peer's tracks. No-op if already connected.
    async fn connect_to(&self, peer: &Endpoint) {
        let remote = {
            let mut state = self.state.lock().await;
            if state.connected || !state.ready(self.connectivity) {
                return;
            }
            state.connected = true;
            state.remote.clone().unwrap_or_default()
        };
        let peer_disabled = peer.state.lock().await.disabled.clone();

        info!(
            "Loopback media for {} connected (endpoint {})",
            self.session_id, self.id
        );
        for kind in remote {
            self.emit(MediaTransportEvent::RemoteTrack {
                kind,
                active: !peer_disabled.contains(&kind),
            })
            .await;
        }
    }
}

#[derive(Default)]
struct NetworkInner {
    rooms: DashMap<SessionId, Vec<Arc<Endpoint>>>,
    next_endpoint: AtomicU64,
    next_port: AtomicU16,
}

impl NetworkInner {
    fn peer_of(&self, endpoint: &Endpoint) -> Option<Arc<Endpoint>> {
        self.rooms
            .get(&endpoint.session_id)
            .and_then(|room| room.iter().find(|e| e.id != endpoint.id).cloned())
    }

    fn leave(&self, endpoint: &Endpoint) {
        if let Some(mut room) = self.rooms.get_mut(&endpoint.session_id) {
            room.retain(|e| e.id != endpoint.id);
        }
        self.rooms
            .remove_if(&endpoint.session_id, |_, room| room.is_empty());
    }
}

/// Shared in-process "network" handing out paired transports.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live endpoints for a session.
    pub fn endpoint_count(&self, session_id: &SessionId) -> usize {
        self.inner
            .rooms
            .get(session_id)
            .map(|room| room.len())
            .unwrap_or(0)
    }

    /// Number of sessions with at least one live endpoint.
    pub fn session_count(&self) -> usize {
        self.inner.rooms.len()
    }

    /// Break the media path of a session; both endpoints report failure.
    pub async fn fail_session(&self, session_id: &SessionId) {
        let endpoints: Vec<Arc<Endpoint>> = self
            .inner
            .rooms
            .get(session_id)
            .map(|room| room.clone())
            .unwrap_or_default();

        for endpoint in endpoints {
            {
                let mut state = endpoint.state.lock().await;
                state.failed = true;
                state.connected = false;
            }
            warn!("Loopback media path for {session_id} failed");
            endpoint
                .emit(MediaTransportEvent::Failed("loopback path lost".into()))
                .await;
        }
    }
}

#[async_trait]
impl MediaTransportFactory for LoopbackNetwork {
    async fn create_transport(
        &self,
        session_id: &SessionId,
        connectivity: Connectivity,
    ) -> Result<(Arc<dyn MediaTransport>, mpsc::Receiver<MediaTransportEvent>), TransportError>
    {
        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let endpoint = Arc::new(Endpoint {
            id: self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed),
            session_id: session_id.clone(),
            connectivity,
            state: Mutex::new(EndpointState::default()),
            events,
        });

        {
            let mut room = self.inner.rooms.entry(session_id.clone()).or_default();
            if room.len() >= 2 {
                return Err(TransportError::SessionFull(session_id.clone()));
            }
            room.push(endpoint.clone());
        }

        debug!(
            "Created loopback endpoint {} for {} ({:?})",
            endpoint.id, session_id, connectivity
        );
        let transport = LoopbackTransport {
            endpoint,
            network: self.inner.clone(),
        };
        Ok((Arc::new(transport), event_rx))
    }
}

/// One endpoint of a loopback session.
pub struct LoopbackTransport {
    endpoint: Arc<Endpoint>,
    network: Arc<NetworkInner>,
}

impl LoopbackTransport {
    async fn progress(&self) {
        if !self.endpoint.is_ready().await {
            return;
        }
        let Some(peer) = self.network.peer_of(&self.endpoint) else {
            return;
        };
        if !peer.is_ready().await {
            return;
        }
        self.endpoint.connect_to(&peer).await;
        peer.connect_to(&self.endpoint).await;
    }

    fn host_candidate(&self) -> IceCandidate {
        let offset = self.network.next_port.fetch_add(1, Ordering::Relaxed);
        let port = FIRST_HOST_PORT.wrapping_add(offset);
        IceCandidate::new(format!(
            "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
            self.endpoint.id + 1,
            port
        ))
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn set_local_media(&self, kinds: &[TrackKind]) -> Result<(), TransportError> {
        let gather = {
            let mut state = self.endpoint.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.local = Some(kinds.to_vec());
            let gather = self.endpoint.connectivity == Connectivity::Ice && !state.gathered;
            state.gathered = true;
            gather
        };

        if gather {
            let candidate = self.host_candidate();
            debug!("Gathered {}", candidate.candidate);
            self.endpoint
                .emit(MediaTransportEvent::LocalCandidate(candidate))
                .await;
        }
        self.progress().await;
        Ok(())
    }

    async fn set_remote_media(&self, kinds: &[TrackKind]) -> Result<(), TransportError> {
        {
            let mut state = self.endpoint.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.remote = Some(kinds.to_vec());
        }
        self.progress().await;
        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        candidate: &CandidateAttribute,
    ) -> Result<(), TransportError> {
        {
            let mut state = self.endpoint.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            debug!(
                "Remote candidate {}:{} ({})",
                candidate.address,
                candidate.port,
                candidate.typ.as_str()
            );
            state.remote_candidate_seen = true;
        }
        self.progress().await;
        Ok(())
    }

    async fn set_track_enabled(
        &self,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), TransportError> {
        {
            let mut state = self.endpoint.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            if enabled {
                state.disabled.remove(&kind);
            } else {
                state.disabled.insert(kind);
            }
        }

        let Some(peer) = self.network.peer_of(&self.endpoint) else {
            return Ok(());
        };
        let receives = {
            let state = peer.state.lock().await;
            state.connected
                && state
                    .remote
                    .as_ref()
                    .is_some_and(|remote| remote.contains(&kind))
        };
        if receives {
            peer.emit(MediaTransportEvent::RemoteTrack {
                kind,
                active: enabled,
            })
            .await;
        }
        Ok(())
    }

    async fn state(&self) -> TransportState {
        let state = self.endpoint.state.lock().await;
        if state.closed {
            TransportState::Closed
        } else if state.failed {
            TransportState::Failed
        } else if state.connected {
            TransportState::Connected
        } else if state.local.is_some() || state.remote.is_some() {
            TransportState::Checking
        } else {
            TransportState::New
        }
    }

    async fn close(&self) {
        {
            let mut state = self.endpoint.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.connected = false;
        }
        self.network.leave(&self.endpoint);
        debug!(
            "Closed loopback endpoint {} for {}",
            self.endpoint.id, self.endpoint.session_id
        );
        self.endpoint.emit(MediaTransportEvent::Closed).await;
    }
}
