//! Local capture and the media path of a call.
//!
//! - [`LocalMedia`] / [`MediaDevices`]: scoped acquisition of microphone and camera
//! - [`MediaTransport`] / [`MediaTransportFactory`]: the per-session media path
//! - [`LoopbackNetwork`]: in-process transport pairing both ends of a session

mod capture;
mod loopback;
mod transport;

pub use capture::{CaptureDevice, LocalMedia, MediaDevices};
pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use transport::{
    Connectivity, MediaTransport, MediaTransportEvent, MediaTransportFactory, TransportError,
    TransportState,
};
