//! HTTP chat endpoint that streams replies as a chatline data stream.

pub mod config;
pub mod error;
pub mod observability;
pub mod routes;
pub mod state;

pub use config::{GeneratorKind, ServerConfig};
pub use error::{ApiError, ServerError};
pub use observability::{LogOutput, LogSettings, init_observability};
pub use routes::create_router;
pub use state::AppState;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use chatline_protocol::PROTOCOL_HEADER;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

/// Router with CORS, request tracing and panic recovery applied.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    create_router(state)
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([HeaderName::from_static(PROTOCOL_HEADER)])
        .allow_credentials(true)
}

/// Binds the configured address and serves until `shutdown_signal` completes.
pub async fn serve<F>(state: Arc<AppState>, shutdown_signal: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.bind_addr();
    let environment = state.config.environment.clone();
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, %environment, "chat server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;
    info!("chat server stopped");
    Ok(())
}
