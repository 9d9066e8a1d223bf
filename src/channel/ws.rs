//! WebSocket implementation of the agent channel.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::channel::protocol::{AgentEvent, ClientMessage, SetupMessage, parse_server_message};
use crate::channel::{AgentChannel, AgentConnector};
use crate::error::{Result, SessionError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to the agent service over WebSocket.
pub struct WsConnector {
    endpoint: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn build_request(&self) -> Result<tungstenite::http::Request<()>> {
        let uri: tungstenite::http::Uri =
            self.endpoint
                .parse()
                .map_err(|e| SessionError::Transport {
                    reason: format!("invalid endpoint: {}", e),
                })?;
        let host = uri.host().unwrap_or_default().to_string();

        tungstenite::http::Request::builder()
            .uri(uri)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("x-api-key", self.api_key.as_str())
            .body(())
            .map_err(|e| SessionError::Transport {
                reason: format!("failed to build handshake request: {}", e),
            })
    }
}

#[async_trait]
impl AgentConnector for WsConnector {
    async fn connect(&self, setup: SetupMessage) -> Result<Box<dyn AgentChannel>> {
        let request = self.build_request()?;
        let (stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| SessionError::Transport {
                    reason: format!("handshake failed: {}", e),
                })?;

        let mut channel = WsChannel {
            stream,
            pending: VecDeque::new(),
            closed: false,
        };
        channel.send(ClientMessage::Setup(setup)).await?;
        Ok(Box::new(channel))
    }
}

/// An open WebSocket channel.
///
/// One inbound text message may carry several events; extras are buffered
/// and handed out one at a time.
struct WsChannel {
    stream: WsStream,
    pending: VecDeque<AgentEvent>,
    closed: bool,
}

#[async_trait]
impl AgentChannel for WsChannel {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&message).map_err(|e| SessionError::Transport {
            reason: format!("failed to encode message: {}", e),
        })?;
        self.stream
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::Transport {
                reason: e.to_string(),
            })
    }

    async fn next_event(&mut self) -> Option<Result<AgentEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.closed {
                return None;
            }

            match self.stream.next().await? {
                Ok(Message::Text(text)) => match parse_server_message(&text) {
                    Ok(events) => self.pending.extend(events),
                    Err(e) => return Some(Err(e)),
                },
                Ok(Message::Close(frame)) => {
                    self.closed = true;
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by remote".to_string());
                    return Some(Ok(AgentEvent::Closed { reason }));
                }
                // tungstenite answers pings internally; binary frames are
                // not part of this protocol
                Ok(_) => continue,
                Err(e) => {
                    self.closed = true;
                    return Some(Ok(AgentEvent::Closed {
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stream.close(None).await;
    }
}
