mod error;
mod http;
mod sse;

pub use error::{ApiError, ApiServerError};

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use relay_engine::Dispatcher;

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// All routes, bound to `dispatcher`.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/api/topics", get(http::handle_list_topics))
        .route("/api/topics/{name}", get(http::handle_topic_status))
        .route("/api/topics/{name}/events", post(http::handle_publish))
        .route("/api/topics/{name}/poll", get(http::handle_short_poll))
        .route("/api/topics/{name}/long-poll", get(http::handle_long_poll))
        .route("/api/topics/{name}/stream", get(sse::handle_stream))
        .route(
            "/api/subscriptions/{id}",
            get(http::handle_subscription).delete(http::handle_unsubscribe),
        )
        .with_state(AppState { dispatcher })
}

/// Serve the HTTP API on `port` until `shutdown` is cancelled.
pub async fn run(
    port: u16,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<(), ApiServerError> {
    let app = router(dispatcher);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|source| ApiServerError::Bind { port, source })?;
    tracing::info!(port, "api server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ApiServerError::Serve)?;

    tracing::info!("api server stopped");
    Ok(())
}
