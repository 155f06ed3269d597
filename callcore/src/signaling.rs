//! Call signaling envelope.
//!
//! Every message exchanged over the signaling channel is a JSON object
//! `{type, sessionId, payload}`. The payload shape depends on the type:
//!
//! | type          | payload                              |
//! |---------------|--------------------------------------|
//! | `call-invite` | [`InvitePayload`]                    |
//! | `offer`       | [`SessionDescription`] (type=offer)  |
//! | `answer`      | [`SessionDescription`] (type=answer) |
//! | `candidate`   | [`IceCandidate`]                     |
//! | others        | `null`                               |
//!
//! Payloads are kept as raw JSON in the envelope and decoded on use, so one
//! bad payload only affects the handler that reads it.

use crate::candidate::IceCandidate;
use crate::error::SignalingError;
use crate::sdp::{SdpType, SessionDescription};
use crate::types::{MediaConstraints, PeerId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Signaling message types for call control and negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingType {
    /// Call request sent to the callee.
    CallInvite,
    /// Callee answered.
    CallAccept,
    /// Callee declined, or the invite was refused because the callee is busy.
    CallReject,
    /// Either side hung up.
    CallEnd,
    /// Caller's session description.
    Offer,
    /// Callee's session description.
    Answer,
    /// One trickled connectivity candidate.
    Candidate,
}

impl SignalingType {
    pub const ALL: [SignalingType; 7] = [
        Self::CallInvite,
        Self::CallAccept,
        Self::CallReject,
        Self::CallEnd,
        Self::Offer,
        Self::Answer,
        Self::Candidate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallInvite => "call-invite",
            Self::CallAccept => "call-accept",
            Self::CallReject => "call-reject",
            Self::CallEnd => "call-end",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }

    /// Call-control messages, as opposed to negotiation payload carriers.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::CallInvite | Self::CallAccept | Self::CallReject | Self::CallEnd
        )
    }
}

impl fmt::Display for SignalingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `call-invite`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitePayload {
    pub caller: PeerId,
    pub callee: PeerId,
    pub audio: bool,
    pub video: bool,
}

impl InvitePayload {
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.audio,
            video: self.video,
        }
    }
}

/// Envelope exchanged over the signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalingType,
    pub session_id: SessionId,
    #[serde(default)]
    pub payload: Value,
}

impl SignalingMessage {
    fn bare(kind: SignalingType, session_id: SessionId) -> Self {
        Self {
            kind,
            session_id,
            payload: Value::Null,
        }
    }

    fn with_payload<T: Serialize>(
        kind: SignalingType,
        session_id: SessionId,
        payload: &T,
    ) -> Self {
        // Payload types are plain structs of strings, bools and integers.
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self {
            kind,
            session_id,
            payload,
        }
    }

    pub fn invite(
        session_id: SessionId,
        caller: PeerId,
        callee: PeerId,
        media: MediaConstraints,
    ) -> Self {
        Self::with_payload(
            SignalingType::CallInvite,
            session_id,
            &InvitePayload {
                caller,
                callee,
                audio: media.audio,
                video: media.video,
            },
        )
    }

    pub fn accept(session_id: SessionId) -> Self {
        Self::bare(SignalingType::CallAccept, session_id)
    }

    pub fn reject(session_id: SessionId) -> Self {
        Self::bare(SignalingType::CallReject, session_id)
    }

    pub fn end(session_id: SessionId) -> Self {
        Self::bare(SignalingType::CallEnd, session_id)
    }

    /// `offer` or `answer` depending on the description type.
    pub fn description(session_id: SessionId, description: &SessionDescription) -> Self {
        let kind = match description.sdp_type {
            SdpType::Offer => SignalingType::Offer,
            SdpType::Answer => SignalingType::Answer,
        };
        Self::with_payload(kind, session_id, description)
    }

    pub fn candidate(session_id: SessionId, candidate: &IceCandidate) -> Self {
        Self::with_payload(SignalingType::Candidate, session_id, candidate)
    }

    pub fn invite_payload(&self) -> Result<InvitePayload, SignalingError> {
        self.decode_payload(SignalingType::CallInvite)
    }

    /// Decode an `offer`/`answer` payload, checking the embedded type agrees.
    pub fn session_description(&self) -> Result<SessionDescription, SignalingError> {
        let expected = match self.kind {
            SignalingType::Offer => SdpType::Offer,
            SignalingType::Answer => SdpType::Answer,
            other => {
                return Err(SignalingError::Payload {
                    kind: other.as_str(),
                    reason: "not a description message".into(),
                });
            }
        };
        let description: SessionDescription = self.decode_payload(self.kind)?;
        if description.sdp_type != expected {
            return Err(SignalingError::Payload {
                kind: self.kind.as_str(),
                reason: format!("embedded type is {}", description.sdp_type.as_str()),
            });
        }
        Ok(description)
    }

    pub fn ice_candidate(&self) -> Result<IceCandidate, SignalingError> {
        self.decode_payload(SignalingType::Candidate)
    }

    fn decode_payload<T: serde::de::DeserializeOwned>(
        &self,
        expected: SignalingType,
    ) -> Result<T, SignalingError> {
        if self.kind != expected {
            return Err(SignalingError::Payload {
                kind: self.kind.as_str(),
                reason: format!("expected {expected}"),
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(raw)?)
    }
}
