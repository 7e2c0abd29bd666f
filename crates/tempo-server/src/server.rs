use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use tempo_auth::{TokenKeys, DEFAULT_TOKEN_TTL};
use tempo_store::Database;

use crate::registry::ConnectionRegistry;
use crate::sync::SyncEngine;
use crate::{http, ws};

/// Fallback signing secret for local development. Anything real must set
/// its own secret.
pub const DEV_TOKEN_SECRET: &str = "tempo-dev-secret-change-me";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub token_secret: String,
    pub token_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            token_secret: DEV_TOKEN_SECRET.to_owned(),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub keys: TokenKeys,
    pub token_ttl: Duration,
    pub registry: Arc<ConnectionRegistry>,
    pub engine: Arc<SyncEngine>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/login", post(http::login))
        .route("/timers", get(http::current_timer))
        .route("/ws", get(ws::ws_upgrade))
        .route("/health", get(http::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Handle returned by `start()`. Keeps the accept loop alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// Create and start the server.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new());
    let engine = Arc::new(SyncEngine::new(db.clone(), Arc::clone(&registry)));
    let keys = TokenKeys::new(config.token_secret.as_bytes());

    let state = AppState {
        db,
        keys,
        token_ttl: config.token_ttl,
        registry,
        engine,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Tempo server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        let db = Database::in_memory().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(SyncEngine::new(db.clone(), Arc::clone(&registry)));
        AppState {
            db,
            keys: TokenKeys::new(b"test-secret"),
            token_ttl: Duration::from_secs(3600),
            registry,
            engine,
        }
    }

    async fn start_test_server() -> ServerHandle {
        let config = ServerConfig {
            port: 0, // Random port
            token_secret: "test-secret".to_owned(),
            token_ttl: Duration::from_secs(3600),
        };
        start(config, Database::in_memory().unwrap()).await.unwrap()
    }

    #[test]
    fn build_router_creates_routes() {
        let _router = build_router(test_state());
        // If this doesn't panic, the router was built successfully
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start_test_server().await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn login_derives_a_stable_user_id() {
        let handle = start_test_server().await;
        let url = format!("http://127.0.0.1:{}/login", handle.port);
        let client = reqwest::Client::new();

        let first: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({"username": "alice", "password": "pw"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let second: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({"username": "alice", "password": "other"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(first["token_type"], "bearer");
        assert_eq!(first["user_id"], second["user_id"]);
        assert!(first["token"].as_str().is_some());

        let other: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({"username": "bob", "password": "pw"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_ne!(first["user_id"], other["user_id"]);
    }

    #[tokio::test]
    async fn timers_endpoint_requires_auth() {
        let handle = start_test_server().await;
        let url = format!("http://127.0.0.1:{}/timers", handle.port);
        let client = reqwest::Client::new();

        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), 401);

        let resp = client
            .get(&url)
            .header("Authorization", "Bearer not-a-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["detail"].as_str().is_some());
    }

    #[tokio::test]
    async fn timers_endpoint_returns_null_without_rows() {
        let handle = start_test_server().await;
        let client = reqwest::Client::new();

        let login: serde_json::Value = client
            .post(format!("http://127.0.0.1:{}/login", handle.port))
            .json(&serde_json::json!({"username": "carol", "password": "pw"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let token = login["token"].as_str().unwrap();

        let body: serde_json::Value = client
            .get(format!("http://127.0.0.1:{}/timers", handle.port))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(body.is_null());
    }
}
