//! Controller setup errors.
//!
//! Call outcomes never surface as errors; they arrive as snapshots. These only
//! cover wiring a controller together.

use crate::signaling::ChannelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("missing required component: {0}")]
    MissingComponent(&'static str),

    #[error("signaling channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("call controller has stopped")]
    Stopped,
}
