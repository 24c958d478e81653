//! Upstream generation contract and the pump that writes it to the wire.

use std::pin::Pin;

use futures::{Stream, StreamExt as _};
use tracing::{debug, warn};

use crate::encoder::{RecordSink, StreamEncoder};
use crate::errors::{EncodeError, GenerationError};
use crate::request::ChatRequest;
use crate::wire::{DataObject, FinishReason, Usage, WireRecord};

/// One step of an upstream reply.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    Text(String),
    Reasoning(String),
    Data(Vec<DataObject>),
    /// Failure reported in-band by the upstream; the message is sent as is.
    Error(String),
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

pub type GenerationStream =
    Pin<Box<dyn Stream<Item = Result<GenerationEvent, GenerationError>> + Send + 'static>>;

/// Source of assistant replies.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Stable identifier used in logs.
    fn id(&self) -> &str;

    /// Starts a reply to the last user message of `request`.
    async fn start(&self, request: &ChatRequest) -> Result<GenerationStream, GenerationError>;
}

/// How a piped session ended.
#[derive(Clone, Debug, PartialEq)]
pub enum PipeOutcome {
    /// A finish record was written.
    Completed { reason: FinishReason, usage: Usage },
    /// The upstream failed; error and finish records were written.
    UpstreamFailed { message: String },
    /// The client went away and the upstream was dropped.
    Disconnected,
}

/// Asks `generator` for a reply and writes it through `encoder`.
///
/// A failure to start is reported in-band, since the response headers are
/// already committed.
pub async fn respond<S: RecordSink>(
    generator: &dyn Generator,
    request: &ChatRequest,
    encoder: &mut StreamEncoder<S>,
) -> Result<PipeOutcome, EncodeError> {
    match generator.start(request).await {
        Ok(events) => pipe(events, encoder).await,
        Err(e) => {
            warn!(generator = generator.id(), error = %e, "failed to start generation");
            let message = e.public_message();
            match fail_before_output(encoder, &message).await {
                Ok(()) => Ok(PipeOutcome::UpstreamFailed { message }),
                Err(EncodeError::TransportClosed) => Ok(PipeOutcome::Disconnected),
                Err(e) => Err(e),
            }
        }
    }
}

/// Forwards upstream events in order until a finish record is written.
///
/// Empty text fragments are skipped. An upstream that ends without finishing
/// gets a synthesized `stop` finish with estimated usage.
pub async fn pipe<S: RecordSink>(
    events: GenerationStream,
    encoder: &mut StreamEncoder<S>,
) -> Result<PipeOutcome, EncodeError> {
    match forward(events, encoder).await {
        Err(EncodeError::TransportClosed) => {
            debug!(
                records = encoder.records_written(),
                "client disconnected, dropping upstream"
            );
            Ok(PipeOutcome::Disconnected)
        }
        other => other,
    }
}

/// Writes an error record followed by `finish{error}`.
pub async fn fail_before_output<S: RecordSink>(
    encoder: &mut StreamEncoder<S>,
    message: &str,
) -> Result<(), EncodeError> {
    encoder.emit_error(message).await?;
    encoder
        .emit_finish(FinishReason::Error, Usage::default())
        .await
}

/// Usage reported when the upstream did not supply any.
pub fn estimate_usage(text: &str) -> Usage {
    Usage::new(0, text.split_whitespace().count() as u64)
}

async fn forward<S: RecordSink>(
    mut events: GenerationStream,
    encoder: &mut StreamEncoder<S>,
) -> Result<PipeOutcome, EncodeError> {
    let mut text = String::new();
    while let Some(event) = events.next().await {
        match event {
            Ok(GenerationEvent::Text(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }
                encoder.emit_text(&fragment).await?;
                text.push_str(&fragment);
            }
            Ok(GenerationEvent::Reasoning(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }
                encoder.emit_reasoning(&fragment).await?;
            }
            Ok(GenerationEvent::Data(items)) => {
                encoder.emit(WireRecord::Data(items)).await?;
            }
            Ok(GenerationEvent::Error(message)) => {
                warn!(error = %message, "upstream reported an error");
                encoder.emit_error(&message).await?;
                encoder
                    .emit_finish(FinishReason::Error, estimate_usage(&text))
                    .await?;
                return Ok(PipeOutcome::UpstreamFailed { message });
            }
            Ok(GenerationEvent::Finish { reason, usage }) => {
                let usage = usage.unwrap_or_else(|| estimate_usage(&text));
                encoder.emit_finish(reason, usage).await?;
                return Ok(PipeOutcome::Completed { reason, usage });
            }
            Err(e) => {
                warn!(error = %e, "upstream generation failed");
                let message = e.public_message();
                encoder.emit_error(&message).await?;
                encoder
                    .emit_finish(FinishReason::Error, estimate_usage(&text))
                    .await?;
                return Ok(PipeOutcome::UpstreamFailed { message });
            }
        }
    }

    debug!("upstream ended without finish, synthesizing stop");
    let usage = estimate_usage(&text);
    encoder.emit_finish(FinishReason::Stop, usage).await?;
    Ok(PipeOutcome::Completed {
        reason: FinishReason::Stop,
        usage,
    })
}
