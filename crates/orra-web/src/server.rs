//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers every route, and
//! starts the HTTP listener.

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Router, extract::Request};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::{AppState, WebConfig};
use crate::ws;

/// Static response header every route carries.
const ORRA_VERSION_HEADER: &str = "Orra-Version";
const ORRA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The Orra control-plane HTTP server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        let config = state.config.clone();
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// The `host:port` string this server will bind to.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin("*".parse::<HeaderValue>().expect("static origin parses"))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(tower_http::cors::Any);

        Router::new()
            .route("/status", get(api::status))
            .route("/register/project", post(api::register_project))
            .route("/apikeys", post(api::mint_api_key))
            .route("/webhooks", post(api::add_webhook))
            .route("/register/service", post(api::register_service))
            .route("/register/agent", post(api::register_agent))
            .route("/orchestrations", post(api::submit_orchestration))
            .route("/orchestrations", get(api::list_orchestrations))
            .route("/orchestrations/{id}/abort", post(api::abort_orchestration))
            .route(
                "/orchestrations/inspections/{id}",
                get(api::inspect_orchestration),
            )
            .route("/ws/channel", get(ws::channel_handler))
            .layer(middleware::from_fn(tag_with_orra_version))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Start the server and block until it is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let router = self.router();

        tracing::info!(addr = %addr, "starting orra web server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

async fn tag_with_orra_version(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(ORRA_VERSION_HEADER, HeaderValue::from_static(ORRA_VERSION));
    response
}
