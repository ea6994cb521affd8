use async_trait::async_trait;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::{Connector, LinkError, Session};

/// Opens WebSocket connections to the robot controller.
#[derive(Debug, Clone)]
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
    async fn connect(&mut self) -> Result<Box<dyn Session>, LinkError> {
        let (stream, resp) = connect_async(self.url.as_str())
            .await
            .map_err(|e| LinkError::Connect(format!("{}: {}", self.url, e)))?;
        debug!("link: websocket handshake with {} -> HTTP {}", self.url, resp.status());
        Ok(Box::new(WsSession { stream, open: true }))
    }
}

struct WsSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    open: bool,
}

#[async_trait]
impl Session for WsSession {
    async fn send_text(&mut self, text: &str) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| LinkError::Send(e.to_string()))
    }

    fn poll_open(&mut self) -> bool {
        // Drain whatever is already buffered without waiting; the robot's
        // replies are not used, only the close is.
        while self.open {
            match self.stream.next().now_or_never() {
                None => break,
                Some(Some(Ok(Message::Close(frame)))) => {
                    debug!("link: peer closed ({:?})", frame);
                    self.open = false;
                }
                Some(Some(Ok(_))) => {}
                Some(Some(Err(e))) => {
                    debug!("link: read error: {}", e);
                    self.open = false;
                }
                Some(None) => self.open = false,
            }
        }
        self.open
    }
}
