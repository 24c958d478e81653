//! HTTP route handlers for the chat API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderName, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatline_protocol::{
    CONTENT_TYPE, ChannelSink, ChatRequest, PROTOCOL_HEADER, PROTOCOL_VERSION, PipeOutcome,
    StreamEncoder, fail_before_output, respond,
};
use futures::StreamExt as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument as _, info, info_span, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// In-band message sent when no generator is configured.
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "Failed to initialize chat service";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "chat-backend",
    }))
}

/// Validates the request, then streams the reply.
///
/// Errors found here are plain JSON responses; once streaming starts every
/// failure is reported inside the stream.
async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let request = ChatRequest::from_json(&body)
        .and_then(ChatRequest::validate)
        .inspect_err(|e| warn!(error = %e, "rejected chat request"))?;
    Ok(stream_reply(state, request))
}

fn stream_reply(state: Arc<AppState>, request: ChatRequest) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.stream_buffer.max(1));
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let span = info_span!("chat_session", session_id = %session_id, messages = request.messages.len());

    tokio::spawn(
        async move {
            let mut encoder = StreamEncoder::new(ChannelSink::new(tx));
            let Some(generator) = state.generator.clone() else {
                warn!("no generator configured");
                let _ = fail_before_output(&mut encoder, SERVICE_UNAVAILABLE_MESSAGE).await;
                return;
            };

            let timeout = state.config.session_timeout;
            match tokio::time::timeout(timeout, respond(generator.as_ref(), &request, &mut encoder))
                .await
            {
                Ok(Ok(PipeOutcome::Completed { reason, usage })) => {
                    info!(
                        %reason,
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        records = encoder.records_written(),
                        "chat session completed"
                    );
                }
                Ok(Ok(PipeOutcome::UpstreamFailed { message })) => {
                    warn!(error = %message, "chat session failed upstream");
                }
                Ok(Ok(PipeOutcome::Disconnected)) => {
                    info!(records = encoder.records_written(), "client disconnected");
                }
                Ok(Err(e)) => warn!(error = %e, "chat session aborted"),
                // Dropping the encoder closes the body without a finish record.
                Err(_) => warn!(timeout_secs = timeout.as_secs(), "chat session timed out"),
            }
        }
        .instrument(span),
    );

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (HeaderName::from_static(PROTOCOL_HEADER), PROTOCOL_VERSION),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
