//! Identifiers and value types shared by every layer of the call core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a single call attempt.
///
/// Rendered as 32 uppercase hex characters, e.g. `AC90CFD09DF712D981142B172706F9F2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a remote participant.
///
/// Owned by the contact collaborator; the call core only compares and forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub const ALL: [TrackKind; 2] = [TrackKind::Audio, TrackKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            _ => Err(()),
        }
    }
}

/// Which media a call requests from the local devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    pub fn wants(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio,
            TrackKind::Video => self.video,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }

    /// Kinds requested, in a stable order.
    pub fn kinds(&self) -> impl Iterator<Item = TrackKind> + '_ {
        TrackKind::ALL.into_iter().filter(|k| self.wants(*k))
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::audio()
    }
}

/// A track captured locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalTrack {
    pub kind: TrackKind,
    pub enabled: bool,
}

/// A track the peer sends to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    pub kind: TrackKind,
    pub active: bool,
}

/// Observable lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStateKind {
    Idle,
    OutgoingRinging,
    IncomingRinging,
    Connecting,
    Connected,
    Ended,
}

impl CallStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OutgoingRinging => "outgoing-ringing",
            Self::IncomingRinging => "incoming-ringing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for CallStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended. Carried by every `ended` snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    RejectedLocal,
    RejectedRemote,
    LocalHangup,
    RemoteHangup,
    SignalingLost,
    DeviceError,
    NegotiationFailed,
    TransportFailed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RejectedLocal => "rejected-local",
            Self::RejectedRemote => "rejected-remote",
            Self::LocalHangup => "local-hangup",
            Self::RemoteHangup => "remote-hangup",
            Self::SignalingLost => "signaling-lost",
            Self::DeviceError => "device-error",
            Self::NegotiationFailed => "negotiation-failed",
            Self::TransportFailed => "transport-failed",
        }
    }

    /// Terminal status line shown by the UI.
    pub fn status_line(&self) -> &'static str {
        match self {
            Self::RejectedLocal => "Call declined",
            Self::RejectedRemote => "Rejected",
            Self::LocalHangup | Self::RemoteHangup => "Call ended",
            Self::SignalingLost => "Connection lost",
            Self::DeviceError => "Camera or microphone unavailable",
            Self::NegotiationFailed => "Call failed",
            Self::TransportFailed => "Connection lost",
        }
    }

    /// Failures that originate on our side and must be announced to the peer.
    pub fn notifies_peer(&self) -> bool {
        matches!(
            self,
            Self::LocalHangup | Self::DeviceError | Self::NegotiationFailed | Self::TransportFailed
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generation() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_constraints_kinds() {
        assert_eq!(MediaConstraints::audio().kinds().collect::<Vec<_>>(), vec![TrackKind::Audio]);
        assert_eq!(
            MediaConstraints::video().kinds().collect::<Vec<_>>(),
            vec![TrackKind::Audio, TrackKind::Video]
        );
        assert!(
            MediaConstraints {
                audio: false,
                video: false
            }
            .is_empty()
        );
    }

    #[test]
    fn test_end_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&EndReason::SignalingLost).unwrap(),
            "\"signaling-lost\""
        );
        assert_eq!(EndReason::RejectedRemote.status_line(), "Rejected");
        assert!(!EndReason::RemoteHangup.notifies_peer());
    }
}
