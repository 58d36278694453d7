//! In-process loopback transport.
//!
//! Records everything sent through it and lets the owner inject inbound
//! frames, simulate handshake or ping failures, and close the connection from
//! the "remote" side. Used for embedding and in tests.

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent, TransportStream};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

const INBOUND_BUFFER: usize = 256;

#[derive(Default)]
struct MemoryState {
    inbound_tx: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<String>,
    connect_attempts: u32,
    fail_connects: u32,
    fail_pings: u32,
    last_token: Option<String>,
}

/// Loopback transport.
pub struct MemoryTransport {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Make the next `n` pings fail.
    pub fn fail_next_pings(&self, n: u32) {
        self.lock().fail_pings = n;
    }

    /// Push an inbound payload. Returns `false` when not connected or the
    /// inbound buffer is full.
    pub fn inject(&self, text: &str, user_id: Option<&str>) -> bool {
        let state = self.lock();
        match &state.inbound_tx {
            Some(tx) => tx
                .try_send(TransportEvent::Message {
                    text: text.to_string(),
                    user_id: user_id.map(String::from),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Close the connection as if the remote side hung up.
    pub fn close_remote(&self, reason: &str) {
        let tx = self.lock().inbound_tx.take();
        if let Some(tx) = tx {
            let _ = tx.try_send(TransportEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.lock().inbound_tx.is_some()
    }

    /// Token presented on the most recent connect.
    pub fn last_token(&self) -> Option<String> {
        self.lock().last_token.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, token: &str) -> Result<TransportStream, TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        state.last_token = Some(token.to_string());

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::ConnectFailed(format!(
                "{}: simulated handshake failure",
                self.name
            )));
        }

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        state.inbound_tx = Some(tx);
        debug!(transport = %self.name, "Memory transport connected");
        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.lock().inbound_tx = None;
        Ok(())
    }

    async fn send(&self, raw: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.inbound_tx.is_none() {
            return Err(TransportError::Closed);
        }
        state.sent.push(raw.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.inbound_tx.is_none() {
            return Err(TransportError::Closed);
        }
        if state.fail_pings > 0 {
            state.fail_pings -= 1;
            return Err(TransportError::Protocol("simulated ping failure".to_string()));
        }
        Ok(())
    }
}
