pub use callcore;

pub mod calls;
pub mod config;
pub mod signaling;
pub mod testing;

pub use calls::{CallController, CallControllerBuilder, CallError};
pub use config::{CallControllerConfig, NegotiationStrategy, SignalingConfig};
