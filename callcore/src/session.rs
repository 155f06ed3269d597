//! The single call instance and the snapshot observers receive.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::candidate::IceCandidate;
use crate::sdp::SessionDescription;
use crate::types::{
    CallDirection, CallStateKind, EndReason, LocalTrack, MediaConstraints, PeerId, RemoteTrack,
    SessionId, TrackKind,
};

/// Full call session information.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub session_id: SessionId,
    pub direction: CallDirection,
    pub peer: PeerId,
    pub constraints: MediaConstraints,
    pub local_tracks: Vec<LocalTrack>,
    pub remote_tracks: Vec<RemoteTrack>,
    pub created_at: DateTime<Utc>,
    /// Set when media first flows; drives the duration display.
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    /// Offer received from the caller (incoming calls).
    pub remote_offer: Option<SessionDescription>,
    /// Answer that overtook `call-accept` (outgoing calls).
    pub early_answer: Option<SessionDescription>,
    /// Whether our offer/answer has been put on the wire.
    pub local_description_sent: bool,
    /// Local candidates gathered before our description was sent.
    pub held_candidates: Vec<IceCandidate>,
}

impl CallSession {
    pub fn new_outgoing(session_id: SessionId, peer: PeerId, constraints: MediaConstraints) -> Self {
        Self::new(session_id, CallDirection::Outgoing, peer, constraints)
    }

    pub fn new_incoming(session_id: SessionId, peer: PeerId, constraints: MediaConstraints) -> Self {
        Self::new(session_id, CallDirection::Incoming, peer, constraints)
    }

    fn new(
        session_id: SessionId,
        direction: CallDirection,
        peer: PeerId,
        constraints: MediaConstraints,
    ) -> Self {
        Self {
            session_id,
            direction,
            peer,
            constraints,
            local_tracks: Vec::new(),
            remote_tracks: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            end_reason: None,
            remote_offer: None,
            early_answer: None,
            local_description_sent: false,
            held_candidates: Vec::new(),
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    /// Record the tracks that capture actually produced.
    pub fn set_local_tracks(&mut self, kinds: &[TrackKind]) {
        self.local_tracks = kinds
            .iter()
            .map(|&kind| LocalTrack {
                kind,
                enabled: true,
            })
            .collect();
    }

    pub fn local_track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.local_tracks.iter().find(|t| t.kind == kind)
    }

    /// Flip a local track. Returns the new enabled flag, or `None` if the call
    /// has no track of that kind.
    pub fn toggle_local_track(&mut self, kind: TrackKind) -> Option<bool> {
        let track = self.local_tracks.iter_mut().find(|t| t.kind == kind)?;
        track.enabled = !track.enabled;
        Some(track.enabled)
    }

    /// Update remote track activity. Returns true when something changed.
    pub fn set_remote_track(&mut self, kind: TrackKind, active: bool) -> bool {
        match self.remote_tracks.iter_mut().find(|t| t.kind == kind) {
            Some(track) if track.active == active => false,
            Some(track) => {
                track.active = active;
                true
            }
            None => {
                self.remote_tracks.push(RemoteTrack { kind, active });
                self.remote_tracks.sort_by_key(|t| t.kind);
                true
            }
        }
    }

    pub fn has_active_remote_track(&self) -> bool {
        self.remote_tracks.iter().any(|t| t.active)
    }

    pub fn mark_ended(&mut self, reason: EndReason) {
        self.ended_at = Some(Utc::now());
        self.end_reason = Some(reason);
    }

    /// Seconds of connected time, if the call ever connected.
    pub fn duration_secs(&self) -> Option<i64> {
        let started = self.started_at?;
        let until = self.ended_at.unwrap_or_else(Utc::now);
        Some(until.signed_duration_since(started).num_seconds())
    }

    pub fn snapshot(&self, state: CallStateKind) -> CallSnapshot {
        CallSnapshot {
            session_id: Some(self.session_id.clone()),
            state,
            direction: Some(self.direction),
            peer: Some(self.peer.clone()),
            video_requested: self.constraints.video,
            local_tracks: self.local_tracks.clone(),
            remote_tracks: self.remote_tracks.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            end_reason: self.end_reason,
        }
    }
}

/// What the UI renders. One is emitted per transition or track change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub session_id: Option<SessionId>,
    pub state: CallStateKind,
    pub direction: Option<CallDirection>,
    pub peer: Option<PeerId>,
    /// Whether the call was placed as a video call.
    pub video_requested: bool,
    pub local_tracks: Vec<LocalTrack>,
    pub remote_tracks: Vec<RemoteTrack>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

impl CallSnapshot {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            state: CallStateKind::Idle,
            direction: None,
            peer: None,
            video_requested: false,
            local_tracks: Vec::new(),
            remote_tracks: Vec::new(),
            started_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn local_enabled(&self, kind: TrackKind) -> bool {
        self.local_tracks.iter().any(|t| t.kind == kind && t.enabled)
    }

    pub fn remote_active(&self, kind: TrackKind) -> bool {
        self.remote_tracks.iter().any(|t| t.kind == kind && t.active)
    }

    /// Connected time in seconds, counted up to the end of the call or now.
    pub fn duration_secs(&self) -> Option<i64> {
        let started = self.started_at?;
        let until = self.ended_at.unwrap_or_else(Utc::now);
        Some(until.signed_duration_since(started).num_seconds())
    }

    /// Status line for the call dialog.
    pub fn status_line(&self) -> &'static str {
        match self.state {
            CallStateKind::Idle => "",
            CallStateKind::OutgoingRinging => "Calling...",
            CallStateKind::IncomingRinging => "Incoming Call...",
            CallStateKind::Connecting => "Ringing...",
            CallStateKind::Connected => "Ongoing Call",
            CallStateKind::Ended => self
                .end_reason
                .map(|r| r.status_line())
                .unwrap_or("Call ended"),
        }
    }
}
