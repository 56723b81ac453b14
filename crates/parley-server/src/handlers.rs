//! HTTP and WebSocket handlers for the Parley server.
//!
//! Each upgraded socket is handed to a [`ConnectionAgent`]; everything after
//! the upgrade happens in `parley-core`.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_core::{ConnectionAgent, ConversationDirectory, Hub, HubHandle, StaticDirectory};
use parley_protocol::codec;
use parley_transport::WebSocketSession;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// How often registry gauges are refreshed.
const GAUGE_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Handle to the hub task.
    pub hub: HubHandle,
    /// Source of conversation snapshots.
    pub directory: Arc<dyn ConversationDirectory>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(hub: HubHandle, directory: Arc<dyn ConversationDirectory>, config: Config) -> Self {
        Self {
            hub,
            directory,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let hub = Hub::spawn(config.hub_config());
    tokio::spawn(refresh_gauges(hub.clone()));

    let state = Arc::new(AppState::new(
        hub,
        Arc::new(StaticDirectory::demo()),
        config,
    ));

    serve(listener, state).await
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/presence/:conversation_id", get(presence_handler))
        .with_state(state)
}

/// Periodically query the hub so its gauges stay current.
async fn refresh_gauges(hub: HubHandle) {
    let mut interval = tokio::time::interval(GAUGE_INTERVAL);
    loop {
        interval.tick().await;
        if hub.stats().await.is_err() {
            debug!("Hub stopped, no longer refreshing gauges");
            return;
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hub statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => unavailable(&e),
    }
}

/// Identities present in a conversation.
async fn presence_handler(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.hub.members(conversation_id.clone()).await {
        Ok(members) => Json(serde_json::json!({
            "conversation_id": conversation_id,
            "members": members,
        }))
        .into_response(),
        Err(e) => unavailable(&e),
    }
}

fn unavailable(error: &dyn std::error::Error) -> Response {
    metrics::record_error("hub");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Identity of the connecting user.
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let identity = params
        .user_id
        .filter(|user_id| !user_id.is_empty())
        .unwrap_or_else(|| state.config.transport.default_user_id.clone());

    // The session skips frames over the configured limit; only frames past
    // the codec ceiling fail the socket.
    ws.max_message_size(codec::MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_websocket(socket, addr, identity, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    identity: String,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let session = WebSocketSession::new(socket)
        .with_remote_addr(addr)
        .with_max_message_size(state.config.limits.max_message_size);
    let agent = ConnectionAgent::new(state.hub.clone(), identity);
    debug!(connection = %agent.id(), user = %agent.identity(), "WebSocket connected");

    if let Err(e) = agent.run(session, state.directory.as_ref()).await {
        error!(error = %e, "Connection agent failed");
        metrics::record_error("hub");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use parley_core::HubConfig;
    use parley_protocol::{codec, kinds, Envelope};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_tungstenite::{
        connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.host = "127.0.0.1".into();
        config.port = 0;
        config.metrics.enabled = false;

        Arc::new(AppState::new(
            Hub::spawn(HubConfig::default()),
            Arc::new(StaticDirectory::demo()),
            config,
        ))
    }

    async fn start() -> (SocketAddr, Arc<AppState>) {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state.clone()));
        (addr, state)
    }

    async fn connect(addr: SocketAddr, query: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws{}", addr, query))
            .await
            .unwrap();
        client
    }

    async fn next(client: &mut Client) -> Envelope {
        loop {
            let message = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .unwrap();
            match message {
                Message::Text(text) => return codec::decode(text.as_bytes()).unwrap(),
                Message::Binary(data) => return codec::decode(&data).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send(client: &mut Client, envelope: &Envelope) {
        let frame = codec::encode(envelope).unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        client.send(Message::Text(text)).await.unwrap();
    }

    async fn wait_for_members(hub: &HubHandle, conversation_id: &str, expected: &[&str]) {
        for _ in 0..400 {
            if hub.members(conversation_id).await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("members of {conversation_id} never became {expected:?}");
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_conversation() {
        let (addr, state) = start().await;

        let mut alice = connect(addr, "?user_id=alice").await;
        let snapshot = next(&mut alice).await;
        assert_eq!(snapshot.kind, kinds::CONVERSATION_LIST);
        assert_eq!(snapshot.data["general"]["name"], "General Chat");

        let mut bob = connect(addr, "?user_id=bob").await;
        next(&mut bob).await;
        let mut carol = connect(addr, "?user_id=carol").await;
        next(&mut carol).await;

        send(&mut alice, &Envelope::new(kinds::JOIN_CONVERSATION, "general")).await;
        wait_for_members(&state.hub, "general", &["alice"]).await;
        send(&mut bob, &Envelope::new(kinds::JOIN_CONVERSATION, "general")).await;
        wait_for_members(&state.hub, "general", &["alice", "bob"]).await;
        assert_eq!(next(&mut alice).await, Envelope::user_joined("bob", "general"));

        send(
            &mut alice,
            &Envelope::new(kinds::MESSAGE, "hi").with_conversation("general"),
        )
        .await;

        let received = next(&mut bob).await;
        assert_eq!(
            serde_json::to_value(&received).unwrap(),
            json!({
                "type": "message",
                "user_id": "alice",
                "data": "hi",
                "conversation_id": "general"
            })
        );

        // Carol never joined; the first thing she sees is a later broadcast
        let marker = Envelope::new("server_notice", "marker");
        send(&mut bob, &marker).await;
        assert_eq!(next(&mut carol).await, marker);
    }

    #[tokio::test]
    async fn test_missing_user_id_is_anonymous() {
        let (addr, state) = start().await;

        let mut client = connect(addr, "?user_id=").await;
        next(&mut client).await;
        send(&mut client, &Envelope::new(kinds::JOIN_CONVERSATION, "lobby")).await;
        wait_for_members(&state.hub, "lobby", &["anonymous"]).await;
    }

    #[tokio::test]
    async fn test_close_unregisters() {
        let (addr, state) = start().await;

        let mut client = connect(addr, "?user_id=alice").await;
        next(&mut client).await;
        send(&mut client, &Envelope::new(kinds::JOIN_CONVERSATION, "general")).await;
        wait_for_members(&state.hub, "general", &["alice"]).await;

        client.close(None).await.unwrap();
        wait_for_members(&state.hub, "general", &[]).await;
        assert_eq!(state.hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_keeps_connection() {
        let (addr, state) = start().await;
        let limit = state.config.limits.max_message_size;

        let mut alice = connect(addr, "?user_id=alice").await;
        next(&mut alice).await;

        // Over the configured limit but under the socket ceiling
        let oversized = Envelope::new(kinds::MESSAGE, "x".repeat(limit + 6 * 1024))
            .with_conversation("general");
        send(&mut alice, &oversized).await;
        send(&mut alice, &Envelope::new(kinds::JOIN_CONVERSATION, "general")).await;

        wait_for_members(&state.hub, "general", &["alice"]).await;
        assert_eq!(state.hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_health() {
        let body = body_json(health_handler().await.into_response()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_stats_and_presence() {
        let (addr, state) = start().await;

        let mut client = connect(addr, "?user_id=alice").await;
        next(&mut client).await;
        send(&mut client, &Envelope::new(kinds::JOIN_CONVERSATION, "general")).await;
        wait_for_members(&state.hub, "general", &["alice"]).await;

        let stats = body_json(stats_handler(State(state.clone())).await).await;
        assert_eq!(stats["connections"], 1);
        assert_eq!(stats["identities"], 1);
        assert_eq!(stats["conversations"], 1);
        assert_eq!(stats["memberships"], 1);

        let presence = body_json(
            presence_handler(Path("general".to_string()), State(state.clone())).await,
        )
        .await;
        assert_eq!(presence, json!({"conversation_id": "general", "members": ["alice"]}));
    }
}
