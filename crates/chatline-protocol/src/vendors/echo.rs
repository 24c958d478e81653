//! Offline generator that streams the last user message back.

use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;

use crate::errors::GenerationError;
use crate::generation::{GenerationEvent, GenerationStream, Generator};
use crate::request::ChatRequest;
use crate::wire::{FinishReason, Usage};

const ECHO_PROVIDER: &str = "echo";

/// Replies with the last user message, one word per text record.
#[derive(Clone, Debug, Default)]
pub struct EchoGenerator {
    delay: Option<Duration>,
    reasoning: bool,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses between fragments so clients can watch the reply grow.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prefixes the reply with a reasoning record.
    pub fn with_reasoning(mut self) -> Self {
        self.reasoning = true;
        self
    }
}

#[async_trait::async_trait]
impl Generator for EchoGenerator {
    fn id(&self) -> &str {
        ECHO_PROVIDER
    }

    async fn start(&self, request: &ChatRequest) -> Result<GenerationStream, GenerationError> {
        let last = request.last_user_message().ok_or_else(|| {
            GenerationError::Validation("Messages list cannot be empty".into())
        })?;

        let mut events = Vec::new();
        if self.reasoning {
            events.push(GenerationEvent::Reasoning(format!(
                "Echoing message {}.",
                last.id
            )));
        }
        let words = split_keeping_spaces(&last.content);
        let completion_tokens = words.len() as u64;
        events.extend(words.into_iter().map(GenerationEvent::Text));

        let prompt_tokens = request
            .messages
            .iter()
            .map(|message| message.content.split_whitespace().count() as u64)
            .sum();
        events.push(GenerationEvent::Finish {
            reason: FinishReason::Stop,
            usage: Some(Usage::new(prompt_tokens, completion_tokens)),
        });

        let delay = self.delay;
        let events = stream::iter(events).then(move |event| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, GenerationError>(event)
        });
        Ok(Box::pin(events))
    }
}

/// Splits into words, each carrying the whitespace that follows it.
fn split_keeping_spaces(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if !ch.is_whitespace() && current.ends_with(char::is_whitespace) {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
