//! Connection handlers for Murmur server.
//!
//! This module handles the connection lifecycle: upgrade, frame decoding,
//! outbound delivery, and the liveness sweep.

use crate::api;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use murmur_core::{ConnectionHandle, MemoryStore, Outgoing, Relay, Session, StoreError};
use murmur_protocol::{codec, Encoded, InboundEvent, OutboundEvent, ProtocolError, WireFormat};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay hub.
    pub relay: Arc<Relay>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over an empty in-memory store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let relay = Arc::new(Relay::new(store, config.router_config()));

        Self { relay, config }
    }

    /// Create the configured seed accounts. Existing usernames are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects an account for any other reason.
    pub async fn seed_users(&self) -> Result<()> {
        for seed in &self.config.users {
            match self
                .relay
                .store()
                .create_user(&seed.name, seed.avatar.clone())
                .await
            {
                Ok(user) => info!(user = user.id, username = %user.username, "Seeded user"),
                Err(StoreError::DuplicateUser(name)) => {
                    warn!(username = %name, "Skipping duplicate seed user")
                }
                Err(e) => return Err(e).context("Failed to seed users"),
            }
        }
        Ok(())
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));
    state.seed_users().await?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Murmur server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the accept loop fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let sweeper = spawn_liveness_sweep(state.relay.clone(), state.config.heartbeat_interval());

    let result = axum::serve(listener, build_app(state)).await;
    sweeper.abort();

    result.context("Server error")
}

/// Build the application router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .merge(api::routes())
        .with_state(state)
}

/// Periodically ping every connection and terminate the silent ones.
fn spawn_liveness_sweep(relay: Arc<Relay>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = relay.liveness().sweep();
            if !report.terminated.is_empty() {
                metrics::record_liveness_terminations(report.terminated.len());
            }
        }
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "onlineUsers": stats.online_users,
        "connections": stats.connections,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.relay.liveness().len() >= state.config.limits.max_connections {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_rejected_connection();
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outgoing) = ConnectionHandle::channel();
    let mut session = state.relay.open_session(handle);
    let connection_id = session.id();

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies follow the format of the client's most recent frame
    let mut format = WireFormat::default();

    loop {
        tokio::select! {
            biased;

            item = outgoing.recv() => {
                match item {
                    Some(Outgoing::Event(event)) => {
                        if let Err(e) = send_event(&mut sender, &event, format).await {
                            debug!(connection = %connection_id, error = %e, "Send failed");
                            break;
                        }
                    }
                    Some(Outgoing::Ping) => {
                        if sender.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outgoing::Close) => {
                        debug!(connection = %connection_id, "Terminating unresponsive connection");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        format = WireFormat::Json;
                        metrics::record_frame(text.len(), "inbound");
                        dispatch(&mut session, codec::decode_text(&text)).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        format = WireFormat::MessagePack;
                        metrics::record_frame(data.len(), "inbound");
                        dispatch(&mut session, codec::decode_binary(&data)).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.acknowledge_liveness();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.acknowledge_liveness();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }

        metrics::set_online_users(state.relay.presence().len());
    }

    session.close().await;
    metrics::set_online_users(state.relay.presence().len());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Feed a decoded frame to the session.
async fn dispatch(session: &mut Session, decoded: Result<Option<InboundEvent>, ProtocolError>) {
    match decoded {
        Ok(Some(event)) => {
            let start = Instant::now();
            session.handle_event(event).await;
            metrics::record_route_latency(start.elapsed().as_secs_f64());
        }
        Ok(None) => {
            debug!(connection = %session.id(), "Ignoring unknown event type");
        }
        Err(e) => {
            warn!(connection = %session.id(), error = %e, "Dropping malformed frame");
            metrics::record_error("decode");
        }
    }
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &OutboundEvent,
    format: WireFormat,
) -> Result<()> {
    let message = match codec::encode(event, format)? {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };

    metrics::record_frame(len, "outbound");
    let result = sender.send(message).await;
    if let OutboundEvent::Message(_) = event {
        metrics::record_delivery(if result.is_ok() { "delivered" } else { "failed" });
    }
    result?;
    Ok(())
}
