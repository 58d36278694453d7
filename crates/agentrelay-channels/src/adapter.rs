//! Transport-agnostic channel adapter.
//!
//! Owns the connection lifecycle (connect, self-check, reconnect with
//! exponential backoff), routes every inbound payload through the envelope
//! validator, and fans events out to subscribers. Transports plug in through
//! the [`Transport`] trait.

use crate::error::{ChannelError, TransportError};
use crate::subscriptions::{HandlerSet, Subscription};
use crate::transport::{build_transport, Transport, TransportEvent, TransportStream};
use crate::types::{ChannelConnectionState, TextMessage};
use agentrelay_types::auth::{validate_format, FormatOptions};
use agentrelay_types::config::AdapterConfig;
use agentrelay_types::{validate_full, MessageEnvelope};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// A channel adapter bound to one transport.
pub struct ChannelAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    config: AdapterConfig,
    token: Zeroizing<String>,
    transport: Arc<dyn Transport>,
    state: Mutex<ChannelConnectionState>,
    message_handlers: HandlerSet<MessageEnvelope>,
    text_handlers: HandlerSet<TextMessage>,
    error_handlers: HandlerSet<ChannelError>,
    state_handlers: HandlerSet<ChannelConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelAdapter {
    /// Create an adapter over `transport`.
    ///
    /// The token is checked with `validate_format` (honouring
    /// `token_prefix`) before anything touches the network.
    pub fn new(
        mut config: AdapterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ChannelError> {
        let token = Zeroizing::new(std::mem::take(&mut config.token));
        let options = FormatOptions::with_prefix(config.token_prefix.as_deref());
        if !validate_format(Some(token.as_str()), &options) {
            return Err(ChannelError::Configuration(format!(
                "adapter '{}': token is missing or malformed",
                config.name
            )));
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(AdapterInner {
                config,
                token,
                transport,
                state: Mutex::new(ChannelConnectionState::Disconnected),
                message_handlers: HandlerSet::new("message"),
                text_handlers: HandlerSet::new("text_message"),
                error_handlers: HandlerSet::new("error"),
                state_handlers: HandlerSet::new("connection_state"),
                shutdown_tx,
                reader: Mutex::new(None),
            }),
        })
    }

    /// Build the transport named by `config.transport`, then [`Self::new`].
    pub fn from_config(config: AdapterConfig) -> Result<Self, ChannelError> {
        let transport = build_transport(&config.name, &config.transport)?;
        Self::new(config, transport)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelConnectionState {
        self.inner.state()
    }

    /// Connect, run the ping self-check, and start receiving.
    ///
    /// Makes up to `1 + connect_retries` attempts with exponential backoff.
    /// Every failed attempt moves to `Failed` and is reported to error
    /// subscribers; the last one is also returned.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let state = inner.state();
        if !matches!(
            state,
            ChannelConnectionState::Disconnected | ChannelConnectionState::Failed
        ) {
            return Err(ChannelError::InvalidState {
                state,
                operation: "connect",
            });
        }

        inner.shutdown_tx.send_replace(false);
        let mut shutdown = inner.shutdown_tx.subscribe();
        let attempts = inner.config.connect_retries.saturating_add(1);
        let mut backoff = inner.config.initial_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            inner.transition(ChannelConnectionState::Connecting);

            match inner.handshake().await {
                Ok(stream) => {
                    if *shutdown.borrow() {
                        let _ = inner.transport.disconnect().await;
                        return Err(ChannelError::InvalidState {
                            state: inner.state(),
                            operation: "connect",
                        });
                    }
                    inner.transition(ChannelConnectionState::Connected);
                    info!(adapter = %inner.config.name, transport = inner.transport.kind(), "Channel connected");
                    AdapterInner::spawn_reader(inner, stream);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        adapter = %inner.config.name,
                        attempt,
                        attempts,
                        error = %e,
                        "Connect attempt failed"
                    );
                    inner.transition(ChannelConnectionState::Failed);
                    inner.error_handlers.emit(&e);
                    if attempt >= attempts || sleep_or_shutdown(backoff, &mut shutdown).await {
                        return Err(e);
                    }
                    backoff = (backoff * 2).min(inner.config.max_backoff());
                }
            }
        }
    }

    /// Stop receiving, tear the transport down and move to `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), ChannelError> {
        let inner = &self.inner;
        inner.shutdown_tx.send_replace(true);
        inner.abort_reader();

        if inner.state() == ChannelConnectionState::Disconnected {
            return Ok(());
        }
        let result = inner.transport.disconnect().await;
        inner.transition(ChannelConnectionState::Disconnected);
        info!(adapter = %inner.config.name, "Channel disconnected");
        result.map_err(ChannelError::from)
    }

    /// Send one raw payload. Payloads over `max_message_chars` are rejected,
    /// never truncated.
    pub async fn send(&self, raw: &str) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let state = inner.state();
        if state != ChannelConnectionState::Connected {
            return Err(ChannelError::NotConnected { state });
        }

        let len = raw.chars().count();
        let max = inner.config.max_message_chars;
        if len > max {
            return Err(ChannelError::MessageTooLarge { len, max });
        }

        let after = inner.config.send_timeout();
        tokio::time::timeout(after, inner.transport.send(raw))
            .await
            .map_err(|_| ChannelError::Timeout {
                operation: "send",
                after,
            })??;
        Ok(())
    }

    /// Serialize `envelope` and [`send`](Self::send) it.
    pub async fn send_envelope(&self, envelope: &MessageEnvelope) -> Result<(), ChannelError> {
        let raw = envelope.to_json()?;
        self.send(&raw).await
    }

    /// Transport-native liveness probe, bounded by the connect timeout.
    pub async fn ping(&self) -> Result<(), ChannelError> {
        let state = self.inner.state();
        if state != ChannelConnectionState::Connected {
            return Err(ChannelError::NotConnected { state });
        }
        self.inner.ping().await
    }

    /// Dispatch one inbound payload: valid envelopes go to message
    /// subscribers, anything else to text subscribers.
    pub fn handle_inbound(&self, raw: &str, user_id: Option<&str>) {
        self.inner.handle_inbound(raw, user_id);
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&MessageEnvelope) + Send + Sync + 'static,
    {
        self.inner.message_handlers.subscribe(handler)
    }

    /// Payloads that failed validation, with the platform user id when known.
    pub fn on_text_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str, Option<&str>) + Send + Sync + 'static,
    {
        self.inner
            .text_handlers
            .subscribe(move |msg: &TextMessage| handler(&msg.text, msg.user_id.as_deref()))
    }

    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChannelError) + Send + Sync + 'static,
    {
        self.inner.error_handlers.subscribe(handler)
    }

    pub fn on_connection_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ChannelConnectionState) + Send + Sync + 'static,
    {
        self.inner
            .state_handlers
            .subscribe(move |state: &ChannelConnectionState| handler(*state))
    }
}

impl Drop for ChannelAdapter {
    fn drop(&mut self) {
        self.inner.shutdown_tx.send_replace(true);
        self.inner.abort_reader();
    }
}

impl AdapterInner {
    fn state(&self) -> ChannelConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a lifecycle transition and notify subscribers. Illegal
    /// transitions are logged and ignored.
    fn transition(&self, next: ChannelConnectionState) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == next {
                return false;
            }
            if !state.can_transition_to(next) {
                warn!(
                    adapter = %self.config.name,
                    from = %*state,
                    to = %next,
                    "Rejected connection state transition"
                );
                return false;
            }
            *state = next;
        }
        debug!(adapter = %self.config.name, state = %next, "Connection state changed");
        self.state_handlers.emit(&next);
        true
    }

    async fn ping(&self) -> Result<(), ChannelError> {
        let after = self.config.connect_timeout();
        tokio::time::timeout(after, self.transport.ping())
            .await
            .map_err(|_| ChannelError::Timeout {
                operation: "ping",
                after,
            })??;
        Ok(())
    }

    /// Transport connect plus ping self-check.
    async fn handshake(&self) -> Result<TransportStream, ChannelError> {
        let after = self.config.connect_timeout();
        let stream = tokio::time::timeout(after, self.transport.connect(&self.token))
            .await
            .map_err(|_| ChannelError::Timeout {
                operation: "connect",
                after,
            })??;

        if let Err(e) = self.ping().await {
            let _ = self.transport.disconnect().await;
            return Err(e);
        }
        Ok(stream)
    }

    fn handle_inbound(&self, raw: &str, user_id: Option<&str>) {
        let result = validate_full(raw);
        match result.envelope {
            Some(envelope) if result.valid => {
                debug!(
                    adapter = %self.config.name,
                    message_type = %envelope.message_type,
                    sender = %envelope.sender_id,
                    "Envelope received"
                );
                self.message_handlers.emit(&envelope);
            }
            _ => {
                debug!(
                    adapter = %self.config.name,
                    errors = ?result.errors,
                    "Inbound payload is not an envelope"
                );
                self.text_handlers.emit(&TextMessage {
                    text: raw.to_string(),
                    user_id: user_id.map(String::from),
                });
            }
        }
    }

    fn abort_reader(&self) {
        if let Some(handle) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    fn spawn_reader(inner: &Arc<AdapterInner>, stream: TransportStream) {
        let shutdown = inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(Self::run_reader(inner.clone(), stream, shutdown));
        if let Some(old) = inner
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            old.abort();
        }
    }

    async fn run_reader(
        inner: Arc<AdapterInner>,
        mut stream: TransportStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = shutdown.changed() => return,
            };

            let lost = match event {
                Some(TransportEvent::Message { text, user_id }) => {
                    inner.handle_inbound(&text, user_id.as_deref());
                    continue;
                }
                Some(TransportEvent::Closed { reason }) => TransportError::Lost(reason),
                Some(TransportEvent::Error(e)) => TransportError::Lost(e),
                None => TransportError::Lost("inbound stream ended".to_string()),
            };

            match inner.recover(lost, &mut shutdown).await {
                Some(next) => stream = next,
                None => return,
            }
        }
    }

    /// Handle a dropped connection. Returns the new inbound stream when a
    /// reconnect succeeds.
    async fn recover(
        &self,
        lost: TransportError,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<TransportStream> {
        if *shutdown.borrow() {
            return None;
        }
        warn!(adapter = %self.config.name, error = %lost, "Transport connection lost");

        if !self.config.auto_reconnect {
            self.transition(ChannelConnectionState::Disconnected);
            self.error_handlers.emit(&ChannelError::Transport(lost));
            return None;
        }

        self.transition(ChannelConnectionState::Reconnecting);
        self.error_handlers.emit(&ChannelError::Transport(lost));

        let attempts = self.config.max_reconnect_attempts;
        let mut backoff = self.config.initial_backoff();
        for attempt in 1..=attempts {
            if sleep_or_shutdown(backoff, shutdown).await {
                return None;
            }
            info!(adapter = %self.config.name, attempt, attempts, "Reconnecting");
            match self.handshake().await {
                Ok(stream) => {
                    self.transition(ChannelConnectionState::Connected);
                    info!(adapter = %self.config.name, "Channel reconnected");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(adapter = %self.config.name, attempt, error = %e, "Reconnect attempt failed");
                    self.error_handlers.emit(&e);
                    backoff = (backoff * 2).min(self.config.max_backoff());
                }
            }
        }

        self.transition(ChannelConnectionState::Failed);
        self.error_handlers
            .emit(&ChannelError::ReconnectExhausted { attempts });
        None
    }
}

/// Sleep for `delay`. Returns `true` if shutdown was signalled first.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let signalled = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    };
    signalled || *shutdown.borrow()
}
