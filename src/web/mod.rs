mod error;
mod routes;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::FromRef;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analytics::AnalyticsService;
use crate::auth::TokenVerifier;
use crate::comments::CommentService;
use crate::gateway::Gateway;
use crate::posts::PostService;

pub use self::error::ErrorBody;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub comments: CommentService,
    pub posts: PostService,
    pub analytics: AnalyticsService,
    pub gateway: Gateway,
    pub verifier: TokenVerifier,
}

impl FromRef<AppState> for TokenVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Start the HTTP gateway and serve until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the address is invalid or the server fails.
pub async fn serve(host: &str, port: u16, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("Invalid web server address")?;

    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Web server error")?;

    Ok(())
}

/// Create the main application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
