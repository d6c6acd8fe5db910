//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and starts
//! the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;

use opal_agent::Coordinator;

use crate::api;
use crate::error::{Result, WebError};
use crate::sse;
use crate::state::AppState;

/// Bind address and port configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_owned(),
            port: 7717,
        }
    }
}

/// The Opal web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new server over a coordinator.
    pub fn new(config: WebConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            config,
            state: AppState::new(coordinator),
        }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes registered.
    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(tower_http::cors::Any);

        Router::new()
            .route("/api/status", get(api::status))
            // Session management.
            .route("/api/sessions", post(api::create_session))
            .route("/api/sessions", get(api::list_sessions))
            .route("/api/sessions/{id}", delete(api::delete_session))
            // Tasks.
            .route("/api/tasks", post(api::submit_task))
            .route("/api/tasks/{id}/cancel", post(api::cancel_task))
            // Event stream.
            .route("/api/sse", get(sse::sse_handler))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Start the server and block until it is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<()> {
        let addr = self.addr();
        let router = self.router();

        tracing::info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| WebError::Bind {
                addr: addr.clone(),
                source,
            })?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}
