//! HTTP and WebSocket handlers for the printlink server.
//!
//! The REST routes are a thin layer over the [`Registry`]. `/ws` is the UI
//! bridge: clients subscribe to hub topics and receive every event published
//! on them as a JSON text message.

use crate::config::Config;
use crate::metrics::{self, ClientMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use printlink_core::topic::validate_topic;
use printlink_core::{ConnectionDraft, ConnectionId, Event, EventHub, Subscription};
use printlink_session::{JsonFileStore, Registry, RegistryError, SessionError};
use printlink_transport::WebSocketTransport;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Connection registry.
    pub registry: Arc<Registry>,
    /// Event hub the registry's sessions publish on.
    pub hub: Arc<EventHub>,
    /// Server configuration.
    pub config: Config,
}

/// Run the HTTP/WebSocket server until ctrl-c, then close every session.
///
/// # Errors
///
/// Returns an error if the registry cannot be opened or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    let hub = Arc::new(EventHub::new());

    // Keep the observer registered for the life of the server
    let _observer = if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        Some(metrics::observe_hub(&hub))
    } else {
        None
    };

    let store_path = config.store_path();
    info!(path = %store_path.display(), "Using connection store");

    let registry = Arc::new(Registry::open(
        Arc::clone(&hub),
        Arc::new(WebSocketTransport::new(config.websocket())),
        Arc::new(JsonFileStore::new(store_path)),
        config.session_config(),
    )?);

    if config.reconnect.autoconnect {
        autoconnect(&registry, &config);
    }

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        hub,
        config: config.clone(),
    });

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("printlink listening on {}", addr);
    info!("UI bridge endpoint: ws://{}/ws", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    info!("printlink stopped");
    Ok(())
}

/// Connect every stored connection in the background.
fn autoconnect(registry: &Arc<Registry>, config: &Config) {
    for summary in registry.list() {
        let registry = Arc::clone(registry);
        let backoff = config.backoff();
        let id = summary.config.id;
        tokio::spawn(async move {
            if let Err(e) = registry.connect_with_retry(&id, &backoff).await {
                warn!(connection = %id, error = %e, "Autoconnect gave up");
            }
        });
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/connections",
            get(list_connections).post(create_connection),
        )
        .route(
            "/connections/:id",
            get(get_connection)
                .put(update_connection)
                .delete(delete_connection),
        )
        .route("/connections/:id/connect", post(connect_connection))
        .route("/connections/:id/close", post(close_connection))
        .route("/connections/:id/send", post(send_payload))
        .route("/connections/:id/state", get(connection_state))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Registry errors as HTTP responses.
#[derive(Debug)]
pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RegistryError::UnknownConnection(_) => StatusCode::NOT_FOUND,
            RegistryError::Config(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotConnected(_) => StatusCode::CONFLICT,
            RegistryError::ConnectFailed(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::Session(SessionError::InvalidState { .. }) => StatusCode::CONFLICT,
            RegistryError::Session(SessionError::Protocol(_)) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.len(),
    }))
}

async fn list_connections(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.list())
}

async fn create_connection(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<ConnectionDraft>,
) -> ApiResult<Response> {
    let id = state.registry.add(draft)?;
    let summary = state.registry.summary(&id);
    Ok((StatusCode::CREATED, Json(summary)).into_response())
}

async fn get_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = ConnectionId::new(id);
    match state.registry.summary(&id) {
        Some(summary) => Ok(Json(summary).into_response()),
        None => Err(RegistryError::UnknownConnection(id).into()),
    }
}

async fn update_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(draft): Json<ConnectionDraft>,
) -> ApiResult<Response> {
    let id = ConnectionId::new(id);
    state.registry.update(&id, draft)?;
    Ok(Json(state.registry.summary(&id)).into_response())
}

async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.remove(&ConnectionId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    /// Retry with the configured backoff instead of failing fast.
    #[serde(default)]
    retry: bool,
}

async fn connect_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ConnectParams>,
) -> ApiResult<Json<Value>> {
    let id = ConnectionId::new(id);
    if params.retry {
        let backoff = state.config.backoff();
        state.registry.connect_with_retry(&id, &backoff).await?;
    } else {
        state.registry.connect(&id).await?;
    }
    Ok(Json(json!({ "id": id, "state": state.registry.state(&id) })))
}

async fn close_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let id = ConnectionId::new(id);
    state.registry.close(&id);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "state": state.registry.state(&id) })),
    )
}

async fn send_payload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<StatusCode> {
    state.registry.send(&ConnectionId::new(id), &payload)?;
    Ok(StatusCode::ACCEPTED)
}

async fn connection_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let id = ConnectionId::new(id);
    Json(json!({ "id": id, "state": state.registry.state(&id) }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ui_socket(socket, state))
}

/// Requests a UI client can send over the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ClientOp {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// Handle a UI bridge connection.
async fn handle_ui_socket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ClientMetricsGuard::new();
    debug!("UI client connected");

    let (mut sender, mut receiver) = socket.split();

    // Hub listeners run synchronously on the publisher; they only enqueue
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

    loop {
        tokio::select! {
            biased;

            Some(event) = event_rx.recv() => {
                let message = json!({
                    "topic": event.topic,
                    "payload": event.payload,
                    "timestamp": event.timestamp,
                });
                if sender.send(Message::Text(message.to_string())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_op(&text, &state.hub, &event_tx, &mut subscriptions);
                        if let Some(reply) = reply {
                            if sender.send(Message::Text(reply.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        warn!("UI client sent a binary message, ignoring");
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("UI client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "UI client WebSocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    for subscription in subscriptions.values() {
        state.hub.unsubscribe(subscription);
    }
    debug!(topics = subscriptions.len(), "UI client disconnected");
}

/// Apply one client request. Returns an error reply for bad requests.
fn handle_client_op(
    text: &str,
    hub: &EventHub,
    events: &mpsc::UnboundedSender<Event>,
    subscriptions: &mut HashMap<String, Subscription>,
) -> Option<Value> {
    let op: ClientOp = match serde_json::from_str(text) {
        Ok(op) => op,
        Err(e) => return Some(json!({ "error": format!("invalid request: {}", e) })),
    };

    match op {
        ClientOp::Subscribe { topic } => {
            if let Err(reason) = validate_topic(&topic) {
                return Some(json!({ "error": reason, "topic": topic }));
            }
            if subscriptions.contains_key(&topic) {
                return None;
            }

            let tx = events.clone();
            let subscription = hub.subscribe(topic.clone(), move |event: &Event| {
                let _ = tx.send(event.clone());
            });
            debug!(topic = %topic, "UI client subscribed");
            subscriptions.insert(topic, subscription);
        }
        ClientOp::Unsubscribe { topic } => {
            if let Some(subscription) = subscriptions.remove(&topic) {
                hub.unsubscribe(&subscription);
                debug!(topic = %topic, "UI client unsubscribed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use printlink_session::{MemoryStore, SessionConfig};
    use printlink_transport::mock::MockTransport;
    use printlink_transport::Transport;
    use tower::ServiceExt;

    fn app_with(transport: Arc<dyn Transport>) -> (Arc<AppState>, Router) {
        let hub = Arc::new(EventHub::new());
        let registry = Registry::open(
            Arc::clone(&hub),
            transport,
            Arc::new(MemoryStore::new()),
            SessionConfig {
                keepalive_interval: None,
                ..SessionConfig::default()
            },
        )
        .unwrap();

        let state = Arc::new(AppState {
            registry: Arc::new(registry),
            hub,
            config: Config::default(),
        });
        (Arc::clone(&state), router(state))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (_state, app) = app_with(Arc::new(MockTransport::echo()));
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let (state, app) = app_with(Arc::new(MockTransport::echo()));
        let (_sub, mut telemetry) = state.hub.subscribe_stream("device:c1:telemetry");

        let (status, body) = call(
            &app,
            "POST",
            "/connections",
            Some(json!({"host": "127.0.0.1", "controlPort": 9999})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "c1");
        assert_eq!(body["state"], "closed");

        let (status, body) = call(&app, "POST", "/connections/c1/connect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "open");

        let (status, _) = call(&app, "POST", "/connections/c1/send", Some(json!({"ping": 1}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(telemetry.recv().await.unwrap().payload, json!({"ping": 1}));

        let (_, body) = call(&app, "GET", "/connections", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["state"], "open");

        let (status, _) = call(&app, "POST", "/connections/c1/close", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = call(&app, "DELETE", "/connections/c1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, "GET", "/connections/c1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_connection() {
        let (_state, app) = app_with(Arc::new(MockTransport::echo()));
        call(
            &app,
            "POST",
            "/connections",
            Some(json!({"host": "10.0.0.5", "controlPort": 9999})),
        )
        .await;

        let (status, body) = call(
            &app,
            "PUT",
            "/connections/c1",
            Some(json!({"host": "10.0.0.6", "controlPort": 9998, "auxPort": 8080})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["host"], "10.0.0.6");
        assert_eq!(body["auxPort"], 8080);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (_state, app) = app_with(Arc::new(MockTransport::refusing("connection refused")));

        let (status, body) = call(
            &app,
            "POST",
            "/connections",
            Some(json!({"host": "10.0.0.5", "controlPort": 70000})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("controlPort"));

        let (status, _) = call(&app, "POST", "/connections/c9/connect", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(
            &app,
            "POST",
            "/connections",
            Some(json!({"host": "10.0.0.5", "controlPort": 9999})),
        )
        .await;

        let (status, _) = call(&app, "POST", "/connections/c1/send", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, "POST", "/connections/c1/connect", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, body) = call(&app, "GET", "/connections/c9/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "closed");

        let (status, _) = call(&app, "DELETE", "/connections/c9", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_client_ops() {
        let hub = EventHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subscriptions = HashMap::new();

        let reply = handle_client_op(
            r#"{"op":"subscribe","topic":"device:c1:status"}"#,
            &hub,
            &tx,
            &mut subscriptions,
        );
        assert!(reply.is_none());
        assert_eq!(hub.listener_count("device:c1:status"), 1);

        // Subscribing twice keeps a single listener
        handle_client_op(
            r#"{"op":"subscribe","topic":"device:c1:status"}"#,
            &hub,
            &tx,
            &mut subscriptions,
        );
        assert_eq!(hub.listener_count("device:c1:status"), 1);

        hub.publish("device:c1:status", json!({"state": "open"}));
        assert_eq!(rx.try_recv().unwrap().payload["state"], "open");

        handle_client_op(
            r#"{"op":"unsubscribe","topic":"device:c1:status"}"#,
            &hub,
            &tx,
            &mut subscriptions,
        );
        assert_eq!(hub.listener_count("device:c1:status"), 0);

        let reply = handle_client_op(r#"{"op":"dance"}"#, &hub, &tx, &mut subscriptions);
        assert!(reply.unwrap()["error"].is_string());

        let reply = handle_client_op(r#"{"op":"subscribe","topic":""}"#, &hub, &tx, &mut subscriptions);
        assert!(reply.unwrap()["error"].is_string());
    }

    #[tokio::test]
    async fn test_ui_bridge_streams_events() {
        use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

        let (state, app) = app_with(Arc::new(MockTransport::echo()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        ws.send(WsMessage::Text(
            r#"{"op":"subscribe","topic":"connection:added"}"#.to_string(),
        ))
        .await
        .unwrap();

        while state.hub.listener_count("connection:added") == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        state
            .registry
            .add(ConnectionDraft::new("10.0.0.5", 9999))
            .unwrap();

        let message = loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => break serde_json::from_str::<Value>(&text).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(message["topic"], "connection:added");
        assert_eq!(message["payload"]["id"], "c1");
        assert!(message["timestamp"].is_u64());
    }
}
