use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChannelConnector, ChannelLink, ClientFrame, ServerFrame};

/// Buffer size for each direction of the frame link.
/// Notifications arrive a few at a time; 32 leaves headroom for bursts.
const FRAME_BUFFER_SIZE: usize = 32;

/// Connects to the notification server over a WebSocket carrying JSON text frames.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<ChannelLink> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to realtime channel at {}", self.url))?;
        info!(url = %self.url, "Realtime channel connected");

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(FRAME_BUFFER_SIZE);
        let (in_tx, in_rx) = mpsc::channel::<ServerFrame>(FRAME_BUFFER_SIZE);

        // Forward outbound frames to the socket
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let json = match frame.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize channel frame");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(json)).await {
                    warn!(error = %e, "Realtime channel write failed");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Decode inbound text frames
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => match ServerFrame::parse(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "Ignoring unrecognized channel frame"),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Realtime channel closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Realtime channel read failed");
                        break;
                    }
                }
            }
        });

        Ok(ChannelLink {
            outbound: out_tx,
            inbound: in_rx,
            tasks: vec![writer, reader],
        })
    }
}

impl ChannelConnector for WebSocketConnector {
    fn connect(&self) -> BoxFuture<'_, Result<ChannelLink>> {
        self.open().boxed()
    }
}
