//! HTTP server built on axum.
//!
//! Sets up routes, CORS and tracing middleware, and the shared state the
//! handlers read from.

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::ApiError;
pub use handlers::AppState;

use crate::relay::InvoiceRelay;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Wildcard CORS for the routes a browser page calls directly.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
}

/// Build the application router.
///
/// - POST /api/solve-captcha (CORS)
/// - POST /api/login-engie (CORS)
/// - POST /api/download-invoice
/// - GET /health
///
/// Any other method on the API routes answers 405 with a JSON body.
pub fn router(relay: Arc<InvoiceRelay>) -> Router {
    let state = AppState::new(relay);

    let browser_routes = Router::new()
        .route(
            "/api/solve-captcha",
            post(handlers::solve_captcha)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/login-engie",
            post(handlers::login)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .layer(cors());

    let download_routes = Router::new().route(
        "/api/download-invoice",
        post(handlers::download_invoice).fallback(handlers::method_not_allowed),
    );

    Router::new()
        .route("/health", get(handlers::health))
        .merge(browser_routes)
        .merge(download_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(relay: Arc<InvoiceRelay>, addr: SocketAddr) -> Result<(), ServerError> {
    let app = router(relay);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    log::info!("invoice relay listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("invoice relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    log::info!("shutdown signal received");
}
