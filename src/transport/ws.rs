//! WebSocket connector (tokio-tungstenite). One JSON [`Frame`] per text message.

use super::realtime::{Connection, Connector, FrameSink};
use super::wire::Frame;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let (write, mut read) = stream.split();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let item = match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => Ok(frame),
                        Err(e) => {
                            warn!(error = %e, "dropping unparsable frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => Err(Error::Transport(e.to_string())),
                };
                let fatal = item.is_err();
                if tx.send(item).await.is_err() || fatal {
                    break;
                }
            }
            debug!("websocket reader finished");
        });

        Ok(Connection {
            sink: Arc::new(WsSink {
                write: Mutex::new(write),
            }),
            inbound: rx,
        })
    }
}

struct WsSink {
    write: Mutex<WsWrite>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&self, frame: Frame) -> Result<()> {
        let text = serde_json::to_string(&frame)?;
        self.write
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.write.lock().await.close().await;
    }
}
