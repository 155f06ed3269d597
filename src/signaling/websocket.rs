//! WebSocket signaling channel.
//!
//! Each signaling message travels as one JSON text frame. Frames that do not
//! decode as a signaling envelope are logged and skipped.

use super::{ChannelError, ChannelEvent, SignalingChannel, SignalingConnector};
use crate::config::SignalingConfig;
use async_trait::async_trait;
use callcore::SignalingMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

pub struct WebSocketSignalingChannel {
    ws_sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl SignalingChannel for WebSocketSignalingChannel {
    async fn send(&self, message: &SignalingMessage) -> Result<(), ChannelError> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(ChannelError::Closed)?;

        let text = message.to_json()?;
        debug!("--> {} for {}", message.kind, message.session_id);
        trace!("--> {text}");
        sink.send(Message::text(text))
            .await
            .map_err(|e| ChannelError::WebSocket(e.to_string()))
    }

    async fn close(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("Error closing signaling websocket: {e}");
            }
        }
    }
}

/// Connects to the signaling server over WebSocket.
pub struct WebSocketConnector {
    config: SignalingConfig,
}

impl WebSocketConnector {
    pub fn new(config: SignalingConfig) -> Self {
        Self { config }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(SignalingConfig::default())
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>), ChannelError> {
        info!("Dialing signaling server {}", self.config.url);
        let (ws, _response) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| ChannelError::WebSocket(format!("connect failed: {e}")))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let _ = event_tx.send(ChannelEvent::Connected).await;
        tokio::spawn(read_pump(stream, event_tx));

        let channel = Arc::new(WebSocketSignalingChannel {
            ws_sink: Mutex::new(Some(sink)),
        });
        Ok((channel, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<ChannelEvent>) {
    // Whatever ends the pump, the owner learns the channel is gone.
    let closed_tx = event_tx.clone();
    let _guard = scopeguard::guard(closed_tx, |tx| {
        if tx.try_send(ChannelEvent::Closed).is_err() {
            debug!("Could not deliver signaling close event");
        }
    });

    loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    warn!("Skipping non-UTF-8 binary signaling frame ({} bytes)", data.len());
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) => {
                trace!("Received close frame");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("Error reading from signaling websocket: {e}");
                break;
            }
            None => {
                trace!("Signaling websocket stream ended");
                break;
            }
        };

        match SignalingMessage::from_json(&text) {
            Ok(message) => {
                debug!("<-- {} for {}", message.kind, message.session_id);
                if event_tx.send(ChannelEvent::Message(message)).await.is_err() {
                    warn!("Event receiver dropped, closing read pump");
                    break;
                }
            }
            Err(e) => warn!("Skipping undecodable signaling frame: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcore::SessionId;
    use tokio::net::TcpListener;

    /// Accept one connection, forward what it receives back with a twist, then
    /// close.
    async fn serve_once(listener: TcpListener) {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        ws.send(Message::text("not json")).await.unwrap();
        let echoed = ws.next().await.unwrap().unwrap();
        ws.send(echoed).await.unwrap();
        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_skips_garbage_and_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener));

        let connector = WebSocketConnector::new(SignalingConfig {
            url: format!("ws://{addr}"),
        });
        let (channel, mut events) = connector.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(ChannelEvent::Connected));

        let message = SignalingMessage::end(SessionId::new("S1"));
        channel.send(&message).await.unwrap();

        assert_eq!(events.recv().await, Some(ChannelEvent::Message(message)));
        assert_eq!(events.recv().await, Some(ChannelEvent::Closed));
        channel.close().await;
    }
}
