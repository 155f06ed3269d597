//! One-to-one audio/video calls.
//!
//! # Architecture
//!
//! - [`CallController`]: actor that owns the call state machine and executes its effects
//! - [`media`]: local capture and the media transport of a session
//! - [`negotiator`]: offer/answer and candidate exchange over a media transport
//!
//! Signaling travels over a [`crate::signaling::SignalingChannel`]. The state
//! machine itself lives in `callcore` and performs no I/O.

mod controller;
mod error;
pub mod media;
pub mod negotiator;

pub use controller::{CallController, CallControllerBuilder};
pub use error::CallError;
