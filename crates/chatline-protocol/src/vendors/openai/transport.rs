use crate::errors::GenerationError;
use crate::generation::GenerationEvent;
use crate::wire::{FinishReason, Usage};

use super::OPENAI_PROVIDER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes = self.buf[..idx].to_vec();
            self.buf.drain(..idx + delim_len);
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes still waiting for a frame delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Turns chat completion chunks into generation events.
///
/// OpenAI sends `finish_reason` and `usage` in separate chunks when usage
/// reporting is on, so the finish is held back until `[DONE]`.
#[derive(Debug, Default)]
pub(crate) struct ChunkMapper {
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl ChunkMapper {
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn map_frame(&mut self, frame: &SseFrame) -> Result<Vec<GenerationEvent>, GenerationError> {
        let data = frame.data.trim();
        if data.is_empty() || self.done {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(self.finish().into_iter().collect());
        }
        let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
            GenerationError::protocol(OPENAI_PROVIDER, format!("invalid SSE JSON frame: {e}"))
        })?;
        self.map_chunk(&value)
    }

    /// Finish event for a stream that closed after a finish reason but
    /// without `[DONE]`.
    pub fn finish(&mut self) -> Option<GenerationEvent> {
        let reason = self.finish_reason.take()?;
        Some(GenerationEvent::Finish {
            reason,
            usage: self.usage.take(),
        })
    }

    pub(crate) fn map_chunk(
        &mut self,
        value: &serde_json::Value,
    ) -> Result<Vec<GenerationEvent>, GenerationError> {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("OpenAI stream error");
            return Err(GenerationError::provider(OPENAI_PROVIDER, message, None));
        }

        if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(Usage::new(
                usage
                    .get("prompt_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                usage
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
            ));
        }

        let mut events = Vec::new();
        let Some(choice) = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|choices| choices.first())
        else {
            return Ok(events);
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(reasoning) = delta.get("reasoning_content").and_then(|v| v.as_str())
                && !reasoning.is_empty()
            {
                events.push(GenerationEvent::Reasoning(reasoning.to_string()));
            }
            if let Some(content) = delta.get("content").and_then(|v| v.as_str())
                && !content.is_empty()
            {
                events.push(GenerationEvent::Text(content.to_string()));
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.finish_reason = Some(map_finish_reason(reason));
        }
        Ok(events)
    }
}

pub(crate) fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        _ => FinishReason::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> SseFrame {
        SseFrame {
            event: None,
            data: data.into(),
        }
    }

    #[test]
    fn sse_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 = b"data: {\"choices\":[{\"delta\":{\"content\":\"hel";
        let part2 = b"lo\"}}]}\n\n";
        assert!(decoder.push_chunk(part1).is_empty());
        assert!(decoder.pending() > 0);
        let frames = decoder.push_chunk(part2);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.contains("hello"));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn sse_decoder_accepts_crlf_and_skips_comments() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push_chunk(b": keep-alive\r\n\r\nevent: message\r\ndata: [DONE]\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("message".into()),
                data: "[DONE]".into(),
            }]
        );
    }

    #[test]
    fn maps_content_and_reasoning_deltas() {
        let mut mapper = ChunkMapper::default();
        let events = mapper
            .map_chunk(&serde_json::json!({
                "choices": [{"delta": {"reasoning_content": "hmm", "content": "Hi"}}]
            }))
            .expect("map");
        assert_eq!(
            events,
            vec![
                GenerationEvent::Reasoning("hmm".into()),
                GenerationEvent::Text("Hi".into()),
            ]
        );
    }

    #[test]
    fn finish_waits_for_done_and_carries_usage() {
        let mut mapper = ChunkMapper::default();
        let events = mapper
            .map_frame(&frame(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#))
            .expect("finish chunk");
        assert!(events.is_empty());
        mapper
            .map_frame(&frame(
                r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":4}}"#,
            ))
            .expect("usage chunk");
        let events = mapper.map_frame(&frame("[DONE]")).expect("done");
        assert_eq!(
            events,
            vec![GenerationEvent::Finish {
                reason: FinishReason::Length,
                usage: Some(Usage::new(9, 4)),
            }]
        );
        assert!(mapper.is_done());
    }

    #[test]
    fn unknown_finish_reason_maps_to_error() {
        assert_eq!(map_finish_reason("content_filter"), FinishReason::Error);
        assert_eq!(map_finish_reason("tool_calls"), FinishReason::ToolCalls);
    }

    #[test]
    fn error_chunk_becomes_provider_error() {
        let mut mapper = ChunkMapper::default();
        let err = mapper
            .map_chunk(&serde_json::json!({"error": {"message": "quota exceeded"}}))
            .expect_err("should fail");
        assert!(matches!(err, GenerationError::Provider { ref message, .. } if message == "quota exceeded"));
    }

    #[test]
    fn invalid_json_frame_is_protocol_error() {
        let mut mapper = ChunkMapper::default();
        let err = mapper.map_frame(&frame("{oops")).expect_err("json");
        assert!(matches!(err, GenerationError::Protocol { .. }));
    }
}
