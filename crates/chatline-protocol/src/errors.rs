use std::fmt;

use crate::wire::RecordKind;

/// A line that does not match the wire grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The line has no `:` between tag and payload.
    #[error("record has no tag separator: {line:?}")]
    MissingSeparator { line: String },
    /// The tag is not one of the recognized single characters.
    #[error("unknown record tag {tag:?}")]
    UnknownTag { tag: String },
    /// The payload is not valid JSON.
    #[error("invalid JSON in {kind} record: {message}")]
    InvalidJson { kind: RecordKind, message: String },
    /// The payload is JSON of the wrong type for its tag.
    #[error("{kind} record must carry {expected}, found {found}")]
    ShapeMismatch {
        kind: RecordKind,
        expected: &'static str,
        found: &'static str,
    },
    /// The payload has the right type but invalid fields.
    #[error("invalid {kind} payload: {message}")]
    InvalidPayload { kind: RecordKind, message: String },
    /// The line is not valid UTF-8.
    #[error("record is not valid UTF-8: {message}")]
    InvalidUtf8 { message: String },
    /// A line grew past the decoder's limit without a terminator.
    #[error("record longer than {limit} bytes")]
    LineTooLong { limit: usize },
}

/// How the byte stream ended when no finish record was seen.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CloseCause {
    /// The peer closed the transport.
    Closed,
    /// The local caller cancelled the session.
    Cancelled,
    /// Reading from the transport failed.
    Transport(String),
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::Closed => f.write_str("stream closed before finish"),
            CloseCause::Cancelled => f.write_str("session cancelled"),
            CloseCause::Transport(message) => write!(f, "transport failed: {message}"),
        }
    }
}

/// Terminal failure of one decoded session.
///
/// Each variant is a distinct category so callers can tell a model error from
/// a broken peer from a lost connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFailure {
    /// A line violated the wire grammar; nothing after it was applied.
    #[error("malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: ProtocolError,
    },
    /// The server sent an explicit error record.
    #[error("{message}")]
    Remote { message: String },
    /// The transport ended before a finish record.
    #[error("connection lost: {cause}")]
    Incomplete {
        cause: CloseCause,
        residual_bytes: usize,
    },
}

impl StreamFailure {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, StreamFailure::Incomplete { .. })
    }
}

/// Errors returned by `StreamEncoder`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A write to the transport failed; the encoder writes nothing further.
    #[error("transport closed")]
    TransportClosed,
    /// A finish record was already written for this session.
    #[error("session already finished")]
    AlreadyFinished,
    /// A data item did not serialize to a JSON object.
    #[error("data items must serialize to JSON objects: {0}")]
    InvalidData(String),
    #[error("failed to serialize record: {0}")]
    Serialize(String),
}

/// Errors raised by an upstream generator before or while it streams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The conversation was rejected before generation began.
    #[error("validation error: {0}")]
    Validation(String),
    /// The model provider returned a failure (HTTP status, auth, quota).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: String,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport to the provider failed.
    #[error("transport error ({provider}): {message}")]
    Transport { provider: String, message: String },
    /// The provider stream was shaped unexpectedly.
    #[error("protocol error ({provider}): {message}")]
    Protocol { provider: String, message: String },
}

/// Message written into the stream for failures whose detail stays server-side.
pub const GENERIC_GENERATION_FAILURE: &str =
    "An internal error occurred while generating the response";

impl GenerationError {
    pub fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn protocol(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Text safe to send to the client in an error record.
    ///
    /// Validation messages are passed through; everything else is replaced by
    /// a generic message.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            _ => GENERIC_GENERATION_FAILURE.to_string(),
        }
    }
}

/// Errors from reading a chat request body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("invalid JSON in request body: {0}")]
    InvalidJson(String),
    #[error("{0}")]
    Validation(String),
}

/// Errors from starting a session against a chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("config error: {0}")]
    Config(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("chat endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unsupported data stream version {found:?}")]
    Version { found: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_message_hides_provider_detail() {
        let err = GenerationError::provider("openai", "invalid api key sk-123", Some(401));
        assert_eq!(err.public_message(), GENERIC_GENERATION_FAILURE);
        let err = GenerationError::Validation("Messages list cannot be empty".into());
        assert_eq!(err.public_message(), "Messages list cannot be empty");
    }

    #[test]
    fn incomplete_reads_as_connection_lost() {
        let failure = StreamFailure::Incomplete {
            cause: CloseCause::Closed,
            residual_bytes: 4,
        };
        assert!(failure.is_incomplete());
        assert!(failure.to_string().starts_with("connection lost"));
    }

    #[test]
    fn remote_failure_is_verbatim() {
        let failure = StreamFailure::Remote {
            message: "model overloaded".into(),
        };
        assert_eq!(failure.to_string(), "model overloaded");
        assert!(!failure.is_incomplete());
    }
}
