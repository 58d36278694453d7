//! WebSocket transport (tokio-tungstenite).
//!
//! Two framings share one client: [`Framing::Raw`] moves opaque text frames,
//! [`Framing::Relay`] speaks the relay hub protocol (registers on connect,
//! wraps outbound envelopes, unwraps `receive_message` events).

use crate::error::{ChannelError, TransportError};
use crate::transport::{Transport, TransportEvent, TransportStream};
use crate::types::frame_kind;
use agentrelay_types::relay::{RawEnvelope, RelayEvent, RelayRequest};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const INBOUND_BUFFER: usize = 256;

/// How payloads map onto WebSocket text frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// One payload per text frame, untouched.
    Raw,
    /// Relay hub frames on behalf of `agent_id`.
    Relay { agent_id: String, role: String },
}

/// WebSocket client transport.
pub struct WebSocketTransport {
    name: String,
    url: url::Url,
    framing: Framing,
    writer: Arc<Mutex<Option<WsSink>>>,
    pong_waiter: Arc<std::sync::Mutex<Option<oneshot::Sender<()>>>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Create a transport for `url`. Only `ws://` and `wss://` are accepted.
    pub fn new(name: &str, url: &str, framing: Framing) -> Result<Self, ChannelError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ChannelError::Configuration(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ChannelError::Configuration(format!(
                "url '{url}' must use ws:// or wss://"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            url: parsed,
            framing,
            writer: Arc::new(Mutex::new(None)),
            pong_waiter: Arc::new(std::sync::Mutex::new(None)),
            reader: std::sync::Mutex::new(None),
        })
    }

    async fn write(&self, frame: Message) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::Closed)?;
        sink.send(frame)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    /// Translate an outbound payload into the text frame for this framing.
    fn outbound_frame(&self, raw: &str) -> Result<String, TransportError> {
        match &self.framing {
            Framing::Raw => Ok(raw.to_string()),
            Framing::Relay { .. } => {
                if let Some(envelope) = RawEnvelope::from_json(raw)
                    .ok()
                    .filter(RawEnvelope::is_envelope)
                {
                    let request = match envelope.recipient_id().map(String::from) {
                        Some(recipient_agent_id) => RelayRequest::SendMessageToAgent {
                            recipient_agent_id,
                            envelope,
                        },
                        None => RelayRequest::SendMessage { envelope },
                    };
                    return request
                        .to_json()
                        .map_err(|e| TransportError::Protocol(e.to_string()));
                }
                if RelayRequest::from_json(raw).is_ok() {
                    return Ok(raw.to_string());
                }
                Err(TransportError::Protocol(
                    "relay framing accepts envelopes or relay requests only".to_string(),
                ))
            }
        }
    }

    fn stop_reader(&self) {
        if let Some(handle) = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Map an inbound text frame to the payload handed to the adapter.
fn inbound_event(framing: &Framing, text: String) -> TransportEvent {
    if let Framing::Relay { .. } = framing {
        if let Ok(RelayEvent::ReceiveMessage { envelope }) =
            serde_json::from_str::<RelayEvent>(&text)
        {
            let user_id = envelope.sender_id().map(String::from);
            if let Ok(unwrapped) = envelope.to_json() {
                return TransportEvent::Message {
                    text: unwrapped,
                    user_id,
                };
            }
        }
    }
    TransportEvent::Message {
        text,
        user_id: None,
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        match self.framing {
            Framing::Raw => "websocket",
            Framing::Relay { .. } => "relay",
        }
    }

    async fn connect(&self, token: &str) -> Result<TransportStream, TransportError> {
        self.stop_reader();

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::ConnectFailed(format!("bad token header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!(transport = %self.name, url = %self.url, "Connecting WebSocket");
        let (ws_stream, _) = match tokio_tungstenite::connect_async(request).await {
            Ok(ok) => ok,
            Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                return Err(TransportError::AuthRejected(format!(
                    "{} rejected the token",
                    self.url
                )));
            }
            Err(e) => return Err(TransportError::ConnectFailed(e.to_string())),
        };

        let (ws_tx, mut ws_rx) = ws_stream.split();
        *self.writer.lock().await = Some(ws_tx);

        if let Framing::Relay { agent_id, role } = &self.framing {
            let register = RelayRequest::RegisterAgent {
                agent_id: agent_id.clone(),
                role: role.clone(),
                metadata: HashMap::new(),
            }
            .to_json()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
            self.write(Message::Text(register)).await?;
            debug!(transport = %self.name, agent_id = %agent_id, "Registered with relay");
        }

        let (tx, rx) = mpsc::channel::<TransportEvent>(INBOUND_BUFFER);
        let framing = self.framing.clone();
        let pong_waiter = self.pong_waiter.clone();
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        debug!(
                            transport = %name,
                            frame = frame_kind(&text).as_deref().unwrap_or("text"),
                            "WebSocket frame received"
                        );
                        inbound_event(&framing, text)
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(waiter) = pong_waiter
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .take()
                        {
                            let _ = waiter.send(());
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by remote".to_string());
                        info!(transport = %name, %reason, "WebSocket closed by remote");
                        let _ = tx.send(TransportEvent::Closed { reason }).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(transport = %name, error = %e, "WebSocket error");
                        let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = tx
                            .send(TransportEvent::Closed {
                                reason: "stream ended".to_string(),
                            })
                            .await;
                        return;
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stop_reader();
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        Ok(())
    }

    async fn send(&self, raw: &str) -> Result<(), TransportError> {
        let frame = self.outbound_frame(raw)?;
        debug!(
            transport = %self.name,
            frame = frame_kind(&frame).as_deref().unwrap_or("text"),
            "WebSocket frame sent"
        );
        self.write(Message::Text(frame)).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        *self.pong_waiter.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.write(Message::Ping(Vec::new())).await?;
        rx.await.map_err(|_| TransportError::Closed)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
