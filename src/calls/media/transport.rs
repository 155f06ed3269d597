//! Media transport abstraction.
//!
//! A media transport is the object that actually moves media between the two
//! endpoints of a session. It is created per session by a
//! [`MediaTransportFactory`] and exclusively owned by that session's negotiator.

use async_trait::async_trait;
use callcore::candidate::CandidateAttribute;
use callcore::{IceCandidate, SessionId, TrackKind};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// How the endpoints of a session find each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Trickled ICE candidates; a path exists once a remote candidate is known.
    Ice,
    /// Both endpoints join a hosted relay room; no candidates are exchanged.
    Relay,
}

/// Media transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Descriptions not yet exchanged.
    New,
    /// Waiting for a usable path to the peer.
    Checking,
    /// Media can flow.
    Connected,
    Failed,
    Closed,
}

/// An event produced by a media transport.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaTransportEvent {
    /// A local connectivity candidate was gathered.
    LocalCandidate(IceCandidate),
    /// A track from the peer started or stopped flowing.
    RemoteTrack { kind: TrackKind, active: bool },
    /// The transport lost its path and cannot recover.
    Failed(String),
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("media transport is closed")]
    Closed,
    #[error("session {0} already has two endpoints")]
    SessionFull(SessionId),
    #[error("{0}")]
    Other(String),
}

/// Represents the media path of one session.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Declare the tracks we send. Starts candidate gathering.
    async fn set_local_media(&self, kinds: &[TrackKind]) -> Result<(), TransportError>;

    /// Declare the tracks the peer sends.
    async fn set_remote_media(&self, kinds: &[TrackKind]) -> Result<(), TransportError>;

    async fn add_remote_candidate(
        &self,
        candidate: &CandidateAttribute,
    ) -> Result<(), TransportError>;

    /// Enable or disable an outbound track at the sender.
    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool)
    -> Result<(), TransportError>;

    async fn state(&self) -> TransportState;

    /// Close the transport. Idempotent.
    async fn close(&self);
}

/// A factory responsible for creating new media transports.
#[async_trait]
pub trait MediaTransportFactory: Send + Sync {
    /// Creates a transport for `session_id`, along with its stream of events.
    async fn create_transport(
        &self,
        session_id: &SessionId,
        connectivity: Connectivity,
    ) -> Result<(Arc<dyn MediaTransport>, mpsc::Receiver<MediaTransportEvent>), TransportError>;
}
