//! Signaling channel.
//!
//! An ordered, bidirectional message pipe to the rendezvous endpoint. The
//! channel itself is stateless: it moves [`SignalingMessage`]s and reports
//! connection changes as [`ChannelEvent`]s. Loss of the channel is final; there
//! is no reconnection.

mod memory;
mod websocket;

pub use memory::{MemorySignalingChannel, memory_pair};
pub use websocket::{WebSocketConnector, WebSocketSignalingChannel};

use async_trait::async_trait;
use callcore::{SignalingError, SignalingMessage};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// An event produced by a signaling channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Message(SignalingMessage),
    /// The channel is gone. No further events follow.
    Closed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("signaling channel is closed")]
    Closed,
    #[error("failed to encode signaling message: {0}")]
    Encode(#[from] SignalingError),
    #[error("websocket error: {0}")]
    WebSocket(String),
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send one message. Messages are delivered in send order.
    async fn send(&self, message: &SignalingMessage) -> Result<(), ChannelError>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}

/// Opens signaling channels.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>), ChannelError>;
}
