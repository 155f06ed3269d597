//! In-process signaling: two linked channel ends.

use super::{ChannelError, ChannelEvent, SignalingChannel};
use async_trait::async_trait;
use callcore::SignalingMessage;
use log::{debug, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 256;

struct Link {
    closed: AtomicBool,
    ends: [mpsc::Sender<ChannelEvent>; 2],
}

/// One end of an in-memory signaling link.
///
/// Messages pass through the JSON codec on their way to the other end, as
/// they would over the wire.
pub struct MemorySignalingChannel {
    link: Arc<Link>,
    side: usize,
}

impl MemorySignalingChannel {
    fn peer(&self) -> &mpsc::Sender<ChannelEvent> {
        &self.link.ends[1 - self.side]
    }

    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::SeqCst)
    }
}

/// Create two linked channel ends. Closing either end closes both.
pub fn memory_pair() -> (
    (Arc<MemorySignalingChannel>, mpsc::Receiver<ChannelEvent>),
    (Arc<MemorySignalingChannel>, mpsc::Receiver<ChannelEvent>),
) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let _ = a_tx.try_send(ChannelEvent::Connected);
    let _ = b_tx.try_send(ChannelEvent::Connected);

    let link = Arc::new(Link {
        closed: AtomicBool::new(false),
        ends: [a_tx, b_tx],
    });
    let a = Arc::new(MemorySignalingChannel {
        link: link.clone(),
        side: 0,
    });
    let b = Arc::new(MemorySignalingChannel { link, side: 1 });
    ((a, a_rx), (b, b_rx))
}

#[async_trait]
impl SignalingChannel for MemorySignalingChannel {
    async fn send(&self, message: &SignalingMessage) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let wire = message.to_json()?;
        trace!("--> [memory:{}] {wire}", self.side);
        let delivered = SignalingMessage::from_json(&wire)?;
        self.peer()
            .send(ChannelEvent::Message(delivered))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn close(&self) {
        if self.link.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Memory signaling link closed by side {}", self.side);
        for end in &self.link.ends {
            let _ = end.send(ChannelEvent::Closed).await;
        }
    }
}
