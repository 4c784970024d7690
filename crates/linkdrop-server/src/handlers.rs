//! HTTP and WebSocket handlers for the Linkdrop server.
//!
//! REST routes store and route links; `/ws` upgrades into a
//! [`DeliverySession`] for one device.

use crate::auth::{AuthUser, Authenticator, TokenTable};
use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, Metered, SessionMetricsGuard};
use crate::storage::{Device, SqliteStorage};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use linkdrop_core::{
    parse_device_id, DeliverySession, DeviceKey, LinkRouter, LinkSink, NewLink, PresenceRegistry,
    RouterError,
};
use linkdrop_transport::WebSocketConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live device sessions.
    pub registry: Arc<PresenceRegistry>,
    /// Link router over the registry and storage.
    pub router: LinkRouter,
    /// Device and link storage.
    pub storage: SqliteStorage,
    /// Token to user mapping.
    pub auth: Arc<dyn Authenticator>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let registry = Arc::new(PresenceRegistry::with_policy(config.sessions.supersede));
        let router = LinkRouter::new(registry.clone(), Arc::new(storage.clone()));
        let auth = Arc::new(TokenTable::new(config.auth.tokens.clone()));

        Self {
            registry,
            router,
            storage,
            auth,
            config,
        }
    }

    fn sink(&self) -> Arc<dyn LinkSink> {
        Arc::new(self.storage.clone())
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/links", post(send_link_handler))
        .route(
            "/api/devices",
            post(register_device_handler).get(list_devices_handler),
        )
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if storage cannot be opened or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let storage = SqliteStorage::new(&config.storage.database)
        .await
        .context("Failed to open database")?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            // Descriptions only reach a recorder that is already installed.
            Ok(()) => metrics::init_metrics(),
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Linkdrop server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    if config.auth.tokens.is_empty() {
        warn!("No auth tokens configured, every request will be rejected");
    }

    serve(listener, Arc::new(AppState::new(config, storage))).await
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O failure.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "users_online": stats.user_count,
        "sessions": stats.session_count,
    }))
}

/// `POST /api/links`
async fn send_link_handler(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewLink>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(link) = payload.map_err(|e| {
        debug!(user, error = %e, "Rejected link body");
        ApiError::InvalidInput
    })?;

    match state.router.send_link(user, link).await {
        Ok(outcome) => {
            metrics::record_link(outcome.delivery);
            Ok(Json(json!({ "message": "Link sent" })))
        }
        Err(RouterError::InvalidLink(reason)) => {
            debug!(user, reason, "Rejected link");
            Err(ApiError::InvalidInput)
        }
        Err(RouterError::Persistence(e)) => {
            error!(user, error = %e, "Failed to store link");
            metrics::record_error("persistence");
            Err(ApiError::StoreLink)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterDevice {
    name: String,
}

/// `POST /api/devices`
async fn register_device_handler(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterDevice>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload.map_err(|_| ApiError::InvalidInput)?;

    match state.storage.register_device(user, &body.name).await {
        Ok(device) => Ok(Json(json!({
            "message": "Device registered",
            "device": device,
        }))),
        Err(e) => {
            warn!(user, error = %e, "Failed to register device");
            Err(ApiError::RegisterDevice)
        }
    }
}

/// A device as listed to its owner.
#[derive(Debug, Serialize)]
struct DeviceView {
    #[serde(flatten)]
    device: Device,
    online: bool,
}

/// `GET /api/devices`
async fn list_devices_handler(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeviceView>>, ApiError> {
    let devices = state.storage.list_devices(user).await.map_err(|e| {
        error!(user, error = %e, "Failed to fetch devices");
        metrics::record_error("storage");
        ApiError::FetchDevices
    })?;

    let online = state.registry.online_devices(user);
    Ok(Json(
        devices
            .into_iter()
            .map(|device| DeviceView {
                online: online.binary_search(&device.id).is_ok(),
                device,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    device_id: Option<String>,
}

/// `GET /ws?device_id=<n>`
///
/// The device id is validated before the upgrade, so a bad id is a plain
/// 400 response rather than a socket that closes immediately.
async fn ws_handler(
    AuthUser(user): AuthUser,
    params: Result<Query<SessionParams>, QueryRejection>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => {
            debug!(user, error = %e, "Rejected session query");
            return ApiError::InvalidDeviceId.into_response();
        }
    };

    let device = match parse_device_id(params.device_id.as_deref()) {
        Ok(device) => device,
        Err(e) => {
            debug!(user, error = %e, "Rejected session");
            return ApiError::InvalidDeviceId.into_response();
        }
    };

    let Some(ws) = ws else {
        return ApiError::UpgradeRequired.into_response();
    };

    let key = DeviceKey::new(user, device);
    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, key, remote, state))
}

/// Drive one device session to completion.
async fn handle_websocket(
    socket: WebSocket,
    key: DeviceKey,
    remote: Option<SocketAddr>,
    state: Arc<AppState>,
) {
    let mut metrics_guard = SessionMetricsGuard::new();

    let mut conn = WebSocketConnection::new(socket)
        .with_max_message_size(state.config.transport.max_message_size);
    if let Some(addr) = remote {
        conn = conn.with_remote_addr(addr);
    }

    let session = DeliverySession::new(key, state.registry.clone(), state.sink())
        .with_queue_capacity(state.config.sessions.queue_capacity);
    let reason = session.run(Metered(conn)).await;
    metrics_guard.closed(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use linkdrop_core::session::SessionCommand;
    use linkdrop_core::{Presence, SessionHandle, SessionInbox, UserId};
    use linkdrop_protocol::{codec, ServerFrame};
    use std::collections::HashMap;
    use tower::util::ServiceExt;

    const TOKEN: &str = "token-1";

    async fn test_state() -> Arc<AppState> {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let config = Config {
            auth: crate::config::AuthConfig {
                tokens: HashMap::from([(TOKEN.to_string(), 1), ("token-2".to_string(), 2)]),
            },
            ..Config::default()
        };
        Arc::new(AppState::new(config, storage))
    }

    fn online(state: &AppState, user: UserId, device: i64) -> SessionInbox {
        let (handle, inbox) = SessionHandle::new(DeviceKey::new(user, device));
        state.registry.register(handle).unwrap();
        inbox
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check() {
        let app = build_router(test_state().await);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn send_link_to_online_device() {
        let state = test_state().await;
        let mut inbox = online(&state, 1, 2);
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/api/links",
                r#"{"from_device_id":1,"to_device_id":2,"url":"https://example.com"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "message": "Link sent" }));
        assert_eq!(state.storage.count_links(1).await.unwrap(), 1);

        let Some(SessionCommand::Deliver(text)) = inbox.try_recv() else {
            panic!("expected a delivery");
        };
        let ServerFrame::Link(link) = codec::decode(&text).unwrap() else {
            panic!("expected a link frame");
        };
        assert_eq!(link.url, "https://example.com");
        assert_eq!(link.user_id, 1);
    }

    #[tokio::test]
    async fn send_link_to_offline_device_is_stored() {
        let state = test_state().await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/api/links",
                r#"{"from_device_id":1,"to_device_id":5,"url":"https://example.com"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.storage.count_links(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn send_link_does_not_cross_users() {
        let state = test_state().await;
        let mut other = online(&state, 2, 2);
        let app = build_router(state);

        let response = app
            .oneshot(post_json(
                "/api/links",
                r#"{"from_device_id":1,"to_device_id":2,"url":"https://example.com"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn send_link_rejects_bad_input() {
        let state = test_state().await;

        for body in [
            "not json",
            r#"{"from_device_id":1,"to_device_id":2}"#,
            r#"{"from_device_id":1,"to_device_id":2,"url":""}"#,
        ] {
            let response = build_router(state.clone())
                .oneshot(post_json("/api/links", body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                body_json(response).await,
                json!({ "error": "Invalid input" })
            );
        }
        assert_eq!(state.storage.count_links(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requests_without_token_are_unauthorized() {
        let app = build_router(test_state().await);

        let response = app
            .oneshot(
                Request::post("/api/links")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"from_device_id":1,"to_device_id":2,"url":"https://example.com"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await, json!({ "error": "Unauthorized" }));
    }

    #[tokio::test]
    async fn register_and_list_devices() {
        let state = test_state().await;

        let response = build_router(state.clone())
            .oneshot(post_json("/api/devices", r#"{"name":"phone"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Device registered");
        let id = body["device"]["id"].as_i64().unwrap();

        let _inbox = online(&state, 1, id);
        let response = build_router(state)
            .oneshot(get_request("/api/devices"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let devices = body_json(response).await;
        assert_eq!(devices[0]["id"], id);
        assert_eq!(devices[0]["name"], "phone");
        assert_eq!(devices[0]["online"], true);
    }

    #[tokio::test]
    async fn register_device_rejects_blank_name() {
        let response = build_router(test_state().await)
            .oneshot(post_json("/api/devices", r#"{"name":" "}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Failed to register device" })
        );
    }

    #[tokio::test]
    async fn ws_rejects_invalid_device_id() {
        let state = test_state().await;

        for uri in ["/ws", "/ws?device_id=abc", "/ws?device_id=0", "/ws?device_id=-3"] {
            let response = build_router(state.clone())
                .oneshot(get_request(uri))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                body_json(response).await,
                json!({ "error": "Invalid device_id" })
            );
        }
        assert_eq!(state.registry.stats().session_count, 0);
    }

    #[tokio::test]
    async fn ws_rejects_malformed_query_as_invalid_device_id() {
        let state = test_state().await;

        for uri in ["/ws?device_id=1&device_id=2", "/ws?device_id=%FF"] {
            let response = build_router(state.clone())
                .oneshot(get_request(uri))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                body_json(response).await,
                json!({ "error": "Invalid device_id" })
            );
        }
    }

    #[tokio::test]
    async fn send_link_to_backlogged_device_is_stored() {
        let state = test_state().await;
        let (handle, mut inbox) = SessionHandle::with_capacity(DeviceKey::new(1, 2), 1);
        state.registry.register(handle).unwrap();

        for _ in 0..2 {
            let response = build_router(state.clone())
                .oneshot(post_json(
                    "/api/links",
                    r#"{"from_device_id":1,"to_device_id":2,"url":"https://example.com"}"#,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(state.storage.count_links(1).await.unwrap(), 2);
        assert!(matches!(inbox.try_recv(), Some(SessionCommand::Deliver(_))));
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn ws_without_upgrade_requires_upgrade() {
        let response = build_router(test_state().await)
            .oneshot(get_request("/ws?device_id=2"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn ws_accepts_token_query_parameter() {
        let response = build_router(test_state().await)
            .oneshot(
                Request::get("/ws?device_id=abc&token=token-2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // Authenticated, so the device id is what fails.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
