pub mod candidate;
pub mod error;
pub mod events;
pub mod machine;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod types;

pub use candidate::{CandidateQueue, IceCandidate};
pub use error::{CandidateError, DeviceError, NegotiationError, SignalingError};
pub use events::{CallEvent, CallEventBus, EventHandler};
pub use machine::{
    CallInput, CallState, CallStateMachine, Effect, Intent, OpId, Operation, OperationFailure,
    OperationResult,
};
pub use sdp::{SdpType, SessionDescription};
pub use session::{CallSession, CallSnapshot};
pub use signaling::{SignalingMessage, SignalingType};
pub use types::{
    CallDirection, CallStateKind, EndReason, LocalTrack, MediaConstraints, PeerId, RemoteTrack,
    SessionId, TrackKind,
};
