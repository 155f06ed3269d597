//! Error types of the call core.

use crate::types::TrackKind;
use thiserror::Error;

/// Local capture failure. Fatal to call setup, never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("no {0} device available")]
    NotFound(TrackKind),

    #[error("permission to use the {0} device was denied")]
    PermissionDenied(TrackKind),

    #[error("{0} device is busy")]
    Busy(TrackKind),

    #[error("no media requested")]
    NothingRequested,
}

/// Session description negotiation failure. Fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    #[error("remote description already applied")]
    RemoteDescriptionAlreadySet,

    #[error("{0} already created for this session")]
    AlreadyCreated(&'static str),

    #[error("unexpected description type: expected {expected}, got {got}")]
    UnexpectedType {
        expected: &'static str,
        got: &'static str,
    },

    #[error("media transport error: {0}")]
    Transport(String),

    #[error("negotiator closed")]
    Closed,
}

/// Candidate attribute could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateError {
    #[error("candidate attribute too short ({0} fields)")]
    TooShort(usize),

    #[error("missing `candidate:` prefix")]
    MissingPrefix,

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Wire envelope could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected payload for {kind}: {reason}")]
    Payload { kind: &'static str, reason: String },
}
