//! ICE connectivity candidates.
//!
//! Candidates are exchanged one per `candidate` signaling message and travel in
//! the same shape a browser produces for `RTCIceCandidateInit`.

use crate::error::CandidateError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// An ICE candidate received from or to be sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The candidate attribute (e.g. "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host")
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }

    pub fn with_username_fragment(mut self, ufrag: impl Into<String>) -> Self {
        self.username_fragment = Some(ufrag.into());
        self
    }

    /// Parse the candidate attribute.
    pub fn attribute(&self) -> Result<CandidateAttribute, CandidateError> {
        CandidateAttribute::parse(&self.candidate)
    }
}

/// ICE candidate type (RFC 5245).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relay => "relay",
        }
    }
}

impl std::str::FromStr for CandidateType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "srflx" => Ok(Self::ServerReflexive),
            "prflx" => Ok(Self::PeerReflexive),
            "relay" => Ok(Self::Relay),
            _ => Err(()),
        }
    }
}

/// Parsed form of a `candidate:` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateAttribute {
    pub foundation: String,
    pub component: u16,
    pub protocol: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub typ: CandidateType,
}

impl CandidateAttribute {
    pub fn parse(raw: &str) -> Result<Self, CandidateError> {
        let body = raw
            .trim()
            .strip_prefix("candidate:")
            .ok_or(CandidateError::MissingPrefix)?;

        let split: Vec<&str> = body.split_whitespace().collect();
        if split.len() < 8 {
            return Err(CandidateError::TooShort(split.len()));
        }

        let component = split[1].parse().map_err(|_| invalid("component", split[1]))?;

        let protocol = split[2].to_lowercase();
        if protocol != "udp" && protocol != "tcp" {
            return Err(invalid("transport", split[2]));
        }

        let priority = split[3].parse().map_err(|_| invalid("priority", split[3]))?;
        let port = split[5].parse().map_err(|_| invalid("port", split[5]))?;

        if split[6] != "typ" {
            return Err(invalid("typ marker", split[6]));
        }
        let typ = split[7].parse().map_err(|_| invalid("type", split[7]))?;

        Ok(Self {
            foundation: split[0].to_owned(),
            component,
            protocol,
            priority,
            address: split[4].to_owned(),
            port,
            typ,
        })
    }

    pub fn to_attribute_string(&self) -> String {
        format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.address,
            self.port,
            self.typ.as_str()
        )
    }
}

fn invalid(field: &'static str, value: &str) -> CandidateError {
    CandidateError::InvalidField {
        field,
        value: value.to_owned(),
    }
}

/// Holds remote candidates until the remote description is applied.
///
/// Candidates are released in receipt order exactly once.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    remote_description_set: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate. Returns it back when it can be applied immediately,
    /// otherwise queues it.
    pub fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    /// Mark the remote description as applied and drain everything queued so far.
    pub fn release(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        self.pending.drain(..).collect()
    }

    pub fn is_released(&self) -> bool {
        self.remote_description_set
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
