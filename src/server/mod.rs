//! Server mode: many clients over WebSocket, each with its own chat session.

pub mod handlers;
pub mod hub;
pub mod messages;
pub mod rate_limit;
pub mod session;
mod ws;

use crate::config::AppConfig;
use crate::dcc::security;
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use hub::SessionHub;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rate_limit::SearchLimiter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerState {
    pub hub: Arc<SessionHub>,
    pub config: Arc<AppConfig>,
}

impl ServerState {
    pub fn new(config: AppConfig) -> Self {
        let limiter = SearchLimiter::new(
            Duration::from_secs(config.server.search_interval_secs),
            config.server.rate_limit_scope,
        );
        Self {
            hub: Arc::new(SessionHub::new(limiter)),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/library/{name}", get(library))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until ctrl-c, then close every session.
pub async fn run(config: AppConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.dcc.download_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create download directory {}",
                config.dcc.download_dir.display()
            )
        })?;

    let listen = config.server.listen.clone();
    let state = Arc::new(ServerState::new(config));
    let hub = state.hub.clone();
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    tracing::info!(address = %listen, "server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
            hub.broadcast_shutdown().await;
        })
        .await
        .context("Server error")?;
    Ok(())
}

/// A completed download, sent as an attachment. Unless the library is
/// persistent, the file is removed once it has been read.
async fn library(Path(name): Path<String>, State(state): State<Arc<ServerState>>) -> Response {
    let Some(path) = security::library_path(&state.config.dcc.download_dir, &name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "failed to read library file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !state.config.server.persist {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(file = %path.display(), error = %e, "failed to remove served file");
        }
    }

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(&name, NON_ALPHANUMERIC)
    );
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.hub.live_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(dir: &std::path::Path, persist: bool) -> Arc<ServerState> {
        let mut config = AppConfig::default();
        config.dcc.download_dir = dir.to_path_buf();
        config.server.persist = persist;
        Arc::new(ServerState::new(config))
    }

    async fn body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn library_serves_once_without_persist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dune.epub"), b"spice").unwrap();
        let state = state(dir.path(), false);

        let response = library(Path("Dune.epub".into()), State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''Dune%2Eepub"
        );
        assert_eq!(body(response).await, b"spice");
        assert!(!dir.path().join("Dune.epub").exists());

        let again = library(Path("Dune.epub".into()), State(state)).await;
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn persistent_library_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dune.epub"), b"spice").unwrap();
        let state = state(dir.path(), true);

        let response = library(Path("Dune.epub".into()), State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(dir.path().join("Dune.epub").exists());
    }

    #[tokio::test]
    async fn library_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), true);
        let response = library(Path("../secret".into()), State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_live_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), false);
        let Json(report) = health(State(state)).await;
        assert_eq!(report.status, "ok");
        assert_eq!(report.sessions, 0);
    }
}
