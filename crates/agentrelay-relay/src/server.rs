//! Relay hub endpoint — axum WebSocket server in front of the router.
//!
//! `GET /relay` upgrades to a WebSocket speaking JSON relay frames;
//! `GET /health` reports liveness and connection counts.

use crate::router::RelayRouter;
use agentrelay_types::auth::verify_hashed;
use agentrelay_types::config::RelayConfig;
use agentrelay_types::{AgentRelayResult, RelayRequest};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared state for the hub handlers.
pub struct HubState {
    pub router: Arc<RelayRouter>,
    /// SHA-256 hex digest of the access token, if access is restricted.
    pub access_token_hash: Option<String>,
}

/// Build the axum application.
pub fn app(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/relay", get(relay_ws))
        .route("/health", get(health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// A bound relay hub, ready to serve.
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<HubState>,
}

impl RelayServer {
    /// Bind to `config.listen_addr`. Port 0 picks a free port.
    pub async fn bind(config: &RelayConfig) -> AgentRelayResult<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let state = Arc::new(HubState {
            router: Arc::new(RelayRouter::new(config.outbound_buffer)),
            access_token_hash: config.access_token_hash.clone(),
        });
        Ok(Self { listener, state })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> AgentRelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> Arc<RelayRouter> {
        self.state.router.clone()
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> AgentRelayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;
        info!(
            %addr,
            restricted = self.state.access_token_hash.is_some(),
            "Relay hub listening"
        );
        axum::serve(self.listener, app(self.state))
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Relay hub stopped");
        Ok(())
    }
}

async fn health(State(state): State<Arc<HubState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "attached": state.router.attached_count(),
        "registered": state.router.registry().connection_count(),
    }))
}

async fn relay_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !is_authorized(state.access_token_hash.as_deref(), &headers, &params) {
        warn!("Rejected relay connection: missing or invalid access token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Check the bearer header, falling back to `?access_token=`.
fn is_authorized(
    expected_hash: Option<&str>,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> bool {
    let Some(expected_hash) = expected_hash else {
        return true;
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| params.get("access_token").map(String::as_str));
    match presented {
        Some(token) => verify_hashed(token, expected_hash),
        None => false,
    }
}

async fn handle_socket(state: Arc<HubState>, socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    let router = state.router.clone();
    let mut events = router.attach(&connection_id);
    let (mut sink, mut stream) = socket.split();
    info!(connection_id = %connection_id, "Relay client connected");

    let writer_id = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match event.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(connection_id = %writer_id, error = %e, "Failed to encode relay event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut failure: Option<String> = None;
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match RelayRequest::from_json(text.as_str()) {
                    Ok(request) => router.handle_request(&connection_id, request),
                    Err(e) => {
                        debug!(connection_id = %connection_id, error = %e, "Undecodable relay frame");
                        router.reject_frame(&connection_id, &e.to_string());
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    failure = Some(e.to_string());
                    break;
                }
            },
            _ = &mut writer => {
                failure = Some("outbound socket closed".to_string());
                break;
            }
        }
    }

    router.disconnect(&connection_id, failure.as_deref());
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrelay_types::auth::hash;
    use axum::http::HeaderValue;

    #[test]
    fn test_open_hub_accepts_anyone() {
        assert!(is_authorized(None, &HeaderMap::new(), &HashMap::new()));
    }

    #[test]
    fn test_bearer_and_query_tokens() {
        let expected = hash("ar_0123456789abcdef");

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("Bearer ar_0123456789abcdef"),
        );
        assert!(is_authorized(Some(&expected), &headers, &HashMap::new()));

        let mut params = HashMap::new();
        params.insert("access_token".to_string(), "ar_0123456789abcdef".to_string());
        assert!(is_authorized(Some(&expected), &HeaderMap::new(), &params));

        params.insert("access_token".to_string(), "ar_wrong_token_value".to_string());
        assert!(!is_authorized(Some(&expected), &HeaderMap::new(), &params));
        assert!(!is_authorized(Some(&expected), &HeaderMap::new(), &HashMap::new()));
    }

    #[tokio::test]
    async fn test_bind_port_zero() {
        let config = RelayConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let server = RelayServer::bind(&config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.router().attached_count(), 0);
    }
}
