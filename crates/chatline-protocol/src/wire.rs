//! Wire grammar of the data stream protocol.
//!
//! A response body is a sequence of UTF-8 lines, one record per line:
//!
//! ```text
//! 0:"<json string>"                 text fragment
//! g:"<json string>"                 reasoning fragment
//! 2:[<json object>, ...]            side-channel data items
//! 3:"<json string>"                 error message
//! d:{"finishReason":..,"usage":..}  finish record
//! ```
//!
//! The tag set is closed: an unknown tag is a protocol error, never an
//! extension point.

use std::fmt;

use serde_json::{Map, Value};

use crate::errors::{EncodeError, ProtocolError};

/// `Content-Type` of a data stream response.
pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";
/// Response header carrying the protocol version.
pub const PROTOCOL_HEADER: &str = "x-vercel-ai-data-stream";
/// Protocol version written and accepted by this crate.
pub const PROTOCOL_VERSION: &str = "v1";

/// A JSON object carried by a data record.
pub type DataObject = Map<String, Value>;

/// Kind of a wire record; each kind owns one tag character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Text,
    Data,
    Error,
    Reasoning,
    Finish,
}

impl RecordKind {
    /// Every record kind, in tag order.
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Text,
        RecordKind::Data,
        RecordKind::Error,
        RecordKind::Reasoning,
        RecordKind::Finish,
    ];

    /// Tag character written before the `:` separator.
    pub fn tag(self) -> char {
        match self {
            RecordKind::Text => '0',
            RecordKind::Data => '2',
            RecordKind::Error => '3',
            RecordKind::Reasoning => 'g',
            RecordKind::Finish => 'd',
        }
    }

    /// Resolves a tag to its kind. Tags are exactly one character.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let mut chars = tag.chars();
        let first = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Self::ALL.into_iter().find(|kind| kind.tag() == first)
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::Data => "data",
            RecordKind::Error => "error",
            RecordKind::Reasoning => "reasoning",
            RecordKind::Finish => "finish",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why generation stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    ToolCalls,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
            FinishReason::ToolCalls => "tool_calls",
        })
    }
}

/// Token accounting reported with the finish record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }
}

/// Payload of the terminal `d:` record.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishPayload {
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One parsed line of the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum WireRecord {
    Text(String),
    Data(Vec<DataObject>),
    Error(String),
    Reasoning(String),
    Finish(FinishPayload),
}

impl WireRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            WireRecord::Text(_) => RecordKind::Text,
            WireRecord::Data(_) => RecordKind::Data,
            WireRecord::Error(_) => RecordKind::Error,
            WireRecord::Reasoning(_) => RecordKind::Reasoning,
            WireRecord::Finish(_) => RecordKind::Finish,
        }
    }

    /// Serializes the record as one complete line, terminator included.
    pub fn to_line(&self) -> Result<String, EncodeError> {
        let payload = match self {
            WireRecord::Text(text) | WireRecord::Error(text) | WireRecord::Reasoning(text) => {
                serde_json::to_string(text)
            }
            WireRecord::Data(items) => serde_json::to_string(items),
            WireRecord::Finish(finish) => serde_json::to_string(finish),
        }
        .map_err(|e| EncodeError::Serialize(e.to_string()))?;

        let mut line = String::with_capacity(payload.len() + 3);
        line.push(self.kind().tag());
        line.push(':');
        line.push_str(&payload);
        line.push('\n');
        Ok(line)
    }

    /// Parses a single line with its terminator already removed.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let Some((tag, rest)) = line.split_once(':') else {
            return Err(ProtocolError::MissingSeparator {
                line: preview(line),
            });
        };
        let kind = RecordKind::from_tag(tag).ok_or_else(|| ProtocolError::UnknownTag {
            tag: preview(tag),
        })?;
        // A CR before the terminator is the only byte allowed around the payload.
        let payload = rest.strip_suffix('\r').unwrap_or(rest);
        if payload.starts_with(char::is_whitespace) || payload.ends_with(char::is_whitespace) {
            return Err(ProtocolError::InvalidJson {
                kind,
                message: "whitespace around payload".into(),
            });
        }
        let value: Value =
            serde_json::from_str(payload).map_err(|e| ProtocolError::InvalidJson {
                kind,
                message: e.to_string(),
            })?;

        match kind {
            RecordKind::Text => expect_string(kind, value).map(WireRecord::Text),
            RecordKind::Reasoning => expect_string(kind, value).map(WireRecord::Reasoning),
            RecordKind::Error => expect_string(kind, value).map(WireRecord::Error),
            RecordKind::Data => expect_objects(value).map(WireRecord::Data),
            RecordKind::Finish => {
                if !value.is_object() {
                    return Err(ProtocolError::ShapeMismatch {
                        kind,
                        expected: "an object",
                        found: json_type(&value),
                    });
                }
                serde_json::from_value(value)
                    .map(WireRecord::Finish)
                    .map_err(|e| ProtocolError::InvalidPayload {
                        kind,
                        message: e.to_string(),
                    })
            }
        }
    }
}

fn expect_string(kind: RecordKind, value: Value) -> Result<String, ProtocolError> {
    match value {
        Value::String(text) => Ok(text),
        other => Err(ProtocolError::ShapeMismatch {
            kind,
            expected: "a string",
            found: json_type(&other),
        }),
    }
}

fn expect_objects(value: Value) -> Result<Vec<DataObject>, ProtocolError> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(ProtocolError::ShapeMismatch {
                kind: RecordKind::Data,
                expected: "an array of objects",
                found: json_type(&other),
            });
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(ProtocolError::ShapeMismatch {
                kind: RecordKind::Data,
                expected: "an array of objects",
                found: json_type(&other),
            }),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// Keeps error messages bounded when a peer sends a huge garbage line.
fn preview(text: &str) -> String {
    const MAX: usize = 64;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_line_escapes_json() {
        let line = WireRecord::Text("say \"hi\"\n".into())
            .to_line()
            .expect("encode");
        assert_eq!(line, "0:\"say \\\"hi\\\"\\n\"\n");
    }

    #[test]
    fn finish_line_uses_camel_case_fields() {
        let line = WireRecord::Finish(FinishPayload {
            finish_reason: FinishReason::ToolCalls,
            usage: Some(Usage::new(5, 2)),
        })
        .to_line()
        .expect("encode");
        assert_eq!(
            line,
            "d:{\"finishReason\":\"tool_calls\",\"usage\":{\"promptTokens\":5,\"completionTokens\":2}}\n"
        );
    }

    #[test]
    fn every_tag_resolves_to_its_kind() {
        for kind in RecordKind::ALL {
            let tag = kind.tag().to_string();
            assert_eq!(RecordKind::from_tag(&tag), Some(kind));
        }
        assert_eq!(RecordKind::from_tag("00"), None);
        assert_eq!(RecordKind::from_tag(""), None);
    }

    #[test]
    fn parses_data_array_of_objects() {
        let record = WireRecord::parse(r#"2:[{"filename":"a.txt","size":3,"content":"abc"}]"#)
            .expect("parse");
        let WireRecord::Data(items) = record else {
            panic!("expected data record");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].get("filename"), Some(&Value::from("a.txt")));
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = WireRecord::parse("9:bogus").expect_err("unknown tag");
        assert!(matches!(err, ProtocolError::UnknownTag { tag } if tag == "9"));
    }

    #[test]
    fn rejects_missing_separator() {
        let err = WireRecord::parse("hello").expect_err("no separator");
        assert!(matches!(err, ProtocolError::MissingSeparator { .. }));
    }

    #[test]
    fn rejects_scalar_data_payload() {
        let err = WireRecord::parse("2:42").expect_err("scalar data");
        assert!(matches!(
            err,
            ProtocolError::ShapeMismatch {
                kind: RecordKind::Data,
                found: "a number",
                ..
            }
        ));
    }

    #[test]
    fn rejects_data_array_with_scalars() {
        let err = WireRecord::parse(r#"2:[{"a":1},"b"]"#).expect_err("mixed data");
        assert!(matches!(err, ProtocolError::ShapeMismatch { found: "a string", .. }));
    }

    #[test]
    fn rejects_text_that_is_not_a_string() {
        let err = WireRecord::parse("0:{\"text\":1}").expect_err("object text");
        assert!(matches!(
            err,
            ProtocolError::ShapeMismatch {
                kind: RecordKind::Text,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = WireRecord::parse("0:\"unterminated").expect_err("bad json");
        assert!(matches!(err, ProtocolError::InvalidJson { kind: RecordKind::Text, .. }));
    }

    #[test]
    fn rejects_unknown_finish_reason() {
        let err = WireRecord::parse(r#"d:{"finishReason":"bored"}"#).expect_err("bad reason");
        assert!(matches!(err, ProtocolError::InvalidPayload { kind: RecordKind::Finish, .. }));
    }

    #[test]
    fn finish_usage_is_optional() {
        let record = WireRecord::parse(r#"d:{"finishReason":"length"}"#).expect("parse");
        assert_eq!(
            record,
            WireRecord::Finish(FinishPayload {
                finish_reason: FinishReason::Length,
                usage: None,
            })
        );
    }

    #[test]
    fn tolerates_carriage_return_before_terminator() {
        let record = WireRecord::parse("0:\"hi\"\r").expect("parse");
        assert_eq!(record, WireRecord::Text("hi".into()));
    }

    #[test]
    fn rejects_whitespace_around_payload() {
        for line in ["0: \"hi\"", "0:\"hi\"  ", "d:\t{\"finishReason\":\"stop\"}", "0:\"hi\" \r"] {
            let err = WireRecord::parse(line).expect_err(line);
            assert!(
                matches!(err, ProtocolError::InvalidJson { .. }),
                "{line:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn long_garbage_is_truncated_in_errors() {
        let garbage = "x".repeat(500);
        let err = WireRecord::parse(&garbage).expect_err("garbage");
        let ProtocolError::MissingSeparator { line } = err else {
            panic!("expected missing separator");
        };
        assert!(line.len() < 100);
    }
}
