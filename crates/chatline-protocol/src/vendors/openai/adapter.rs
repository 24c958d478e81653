use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::GenerationError;
use crate::generation::{GenerationEvent, GenerationStream, Generator};
use crate::request::ChatRequest;

use super::OPENAI_PROVIDER;
use super::config::OpenAiClientConfig;
use super::transport::{ChunkMapper, SseDecoder};

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Generator backed by OpenAI's chat completions API (streaming).
pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: OpenAiClientConfig,
}

impl OpenAiGenerator {
    /// Creates a generator from explicit client configuration.
    pub fn new(config: OpenAiClientConfig) -> Result<Self, GenerationError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                GenerationError::transport(
                    OPENAI_PROVIDER,
                    format!("failed to build OpenAI client: {e}"),
                )
            })?;
        debug!(model = %config.model, temperature = config.temperature, "OpenAI generator initialized");
        Ok(Self { client, config })
    }

    /// Creates a generator using `OPENAI_API_KEY` and friends.
    pub fn from_env() -> Result<Self, GenerationError> {
        Self::new(OpenAiClientConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAiClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Generator for OpenAiGenerator {
    fn id(&self) -> &str {
        OPENAI_PROVIDER
    }

    async fn start(&self, request: &ChatRequest) -> Result<GenerationStream, GenerationError> {
        let body = build_request_body(&self.config, request)?;
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            session_id = request.session_id.as_deref().unwrap_or("-"),
            "starting OpenAI chat completions stream"
        );

        let response = self
            .client
            .post(self.config.chat_completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                GenerationError::transport(OPENAI_PROVIDER, format!("OpenAI request failed: {e}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::provider(
                OPENAI_PROVIDER,
                format!("OpenAI chat completions request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(openai_event_stream(bytes_stream)))
    }
}

pub(crate) fn build_request_body(
    config: &OpenAiClientConfig,
    request: &ChatRequest,
) -> Result<serde_json::Value, GenerationError> {
    if request.messages.is_empty() {
        return Err(GenerationError::Validation(
            "Messages list cannot be empty".into(),
        ));
    }
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|message| {
            serde_json::json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature,
        "stream": true,
        "stream_options": { "include_usage": true },
    }))
}

fn openai_event_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<GenerationEvent, GenerationError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        mapper: ChunkMapper,
        pending: VecDeque<GenerationEvent>,
        /// Raised after the events queued ahead of it have been yielded.
        failure: Option<GenerationError>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            mapper: ChunkMapper::default(),
            pending: VecDeque::new(),
            failure: None,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if let Some(failure) = state.failure.take() {
                    return Err(failure);
                }
                if state.done || state.mapper.is_done() {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            match state.mapper.map_frame(&frame) {
                                Ok(events) => state.pending.extend(events),
                                Err(e) => {
                                    state.failure = Some(e);
                                    state.done = true;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Err(GenerationError::transport(
                            OPENAI_PROVIDER,
                            format!("OpenAI streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        state.done = true;
                        match state.mapper.finish() {
                            Some(finish) => state.pending.push_back(finish),
                            None => {
                                return Err(GenerationError::protocol(
                                    OPENAI_PROVIDER,
                                    format!(
                                        "stream ended without [DONE] ({} bytes pending)",
                                        state.decoder.pending()
                                    ),
                                ));
                            }
                        }
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;
    use crate::request::ChatMessage;
    use crate::session::Role;
    use crate::wire::{FinishReason, Usage};

    fn request() -> ChatRequest {
        ChatRequest::new(vec![
            ChatMessage::new("0", Role::System, "Be brief."),
            ChatMessage::new("1", Role::User, "hello"),
        ])
    }

    fn byte_stream(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(bytes::Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[test]
    fn request_body_carries_history_and_streaming_flags() {
        let config = OpenAiClientConfig::new("sk-test").model("gpt-4o-mini");
        let body = build_request_body(&config, &request()).expect("body");
        assert_eq!(body["stream"], serde_json::json!(true));
        assert_eq!(body["stream_options"]["include_usage"], serde_json::json!(true));
        assert_eq!(body["model"], serde_json::json!("gpt-4o-mini"));
        assert_eq!(
            body["messages"],
            serde_json::json!([
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hello"},
            ])
        );
    }

    #[test]
    fn empty_history_is_validation_error() {
        let config = OpenAiClientConfig::new("sk-test");
        let err = build_request_body(&config, &ChatRequest::new(Vec::new())).expect_err("empty");
        assert_eq!(err.public_message(), "Messages list cannot be empty");
    }

    #[test]
    fn generator_rejects_invalid_config() {
        let err = OpenAiGenerator::new(OpenAiClientConfig::new("sk-test").temperature(2.0))
            .err()
            .expect("temperature");
        assert!(matches!(err, GenerationError::Validation(_)));
    }

    #[tokio::test]
    async fn event_stream_maps_chunks_until_done() {
        let events: Vec<_> = openai_event_stream(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\ndata: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,",
            "\"completion_tokens\":2}}\n\ndata: [DONE]\n\n",
        ]))
        .collect()
        .await;

        let events: Vec<_> = events.into_iter().map(|e| e.expect("event")).collect();
        assert_eq!(
            events,
            vec![
                GenerationEvent::Text("Hel".into()),
                GenerationEvent::Text("lo".into()),
                GenerationEvent::Finish {
                    reason: FinishReason::Stop,
                    usage: Some(Usage::new(5, 2)),
                },
            ]
        );
    }

    #[tokio::test]
    async fn truncated_stream_is_protocol_error() {
        let events: Vec<_> = openai_event_stream(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        ]))
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(GenerationError::Protocol { .. })));
    }

    #[tokio::test]
    async fn bad_frame_fails_after_earlier_text_in_the_same_chunk() {
        let events: Vec<_> = openai_event_stream(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: {oops\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        ]))
        .collect()
        .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], Ok(GenerationEvent::Text("Hel".into())));
        assert_eq!(events[1], Ok(GenerationEvent::Text("lo".into())));
        assert!(matches!(events[2], Err(GenerationError::Protocol { .. })));
    }

    #[tokio::test]
    async fn env_gated_smoke_stream_if_key_present() {
        if std::env::var("OPENAI_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping OpenAI smoke test (OPENAI_API_KEY missing)");
            return;
        }

        let generator = OpenAiGenerator::from_env().expect("generator");
        let mut events = generator.start(&request()).await.expect("start");
        let mut saw_finish = false;
        while let Some(event) = events.next().await {
            if let GenerationEvent::Finish { .. } = event.expect("event") {
                saw_finish = true;
            }
        }
        assert!(saw_finish, "expected a finish event");
    }
}
