//! Line-oriented data stream protocol for streaming chat replies.
//!
//! A server turns generator output into tagged records with
//! [`StreamEncoder`]; a client feeds the bytes it receives, in arbitrary
//! chunks, to a [`StreamDecoder`] and renders the [`StreamSession`] after
//! every record.
//!
//! # Decoding a reply
//!
//! ```
//! use chatline_protocol::prelude::*;
//!
//! let mut decoder = StreamDecoder::new();
//! decoder.push_chunk(b"0:\"Hel");
//! decoder.push_chunk(b"lo\"\nd:{\"finishReason\":\"stop\"}\n");
//!
//! let finish = decoder.close().expect("finished");
//! assert_eq!(finish.finish_reason, FinishReason::Stop);
//! let snapshot = decoder.session().snapshot();
//! assert_eq!(snapshot.assistant().map(|m| m.content.as_str()), Some("Hello"));
//! ```
//!
//! # Streaming a reply
//!
//! ```no_run
//! use chatline_protocol::prelude::*;
//! use chatline_protocol::vendors::EchoGenerator;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), EncodeError> {
//! let request = ChatRequest::new(vec![ChatMessage::new("1", Role::User, "hi there")]);
//! let mut encoder = StreamEncoder::new(Vec::new());
//! respond(&EchoGenerator::new(), &request, &mut encoder).await?;
//! print!("{}", String::from_utf8_lossy(&encoder.into_sink()));
//! # Ok(())
//! # }
//! ```

/// Client-side conversation history.
pub mod conversation;
/// Incremental byte-to-session decoder.
pub mod decoder;
/// Server-side record writer and transports.
pub mod encoder;
/// Error types for every layer.
pub mod errors;
/// Upstream generator contract and the encoder pump.
pub mod generation;
/// reqwest-based client for chat endpoints.
pub mod http;
/// Common imports for typical usage.
pub mod prelude;
/// Chat request body and validation.
pub mod request;
/// Assembled conversation state.
pub mod session;
/// Async consumption of response bodies.
pub mod stream;
/// Generator implementations.
pub mod vendors;
/// Record grammar and payload types.
pub mod wire;

pub use conversation::ConversationStore;
pub use decoder::{SessionUpdate, StreamDecoder};
pub use encoder::{ChannelSink, RecordSink, StreamEncoder, WriterSink};
pub use errors::{
    ClientError, CloseCause, EncodeError, GenerationError, ProtocolError, RequestError,
    StreamFailure,
};
pub use generation::{
    GenerationEvent, GenerationStream, Generator, PipeOutcome, fail_before_output, pipe, respond,
};
pub use http::ChatClient;
pub use request::{ChatMessage, ChatRequest, ErrorResponse};
pub use session::{
    ConversationMessage, DataItem, FileAttachment, IdSource, MessageId, MessagePart, Role,
    SessionSnapshot, SessionStatus, StreamSession,
};
pub use stream::{AbortHandle, SessionEvent, SessionOutcome, SessionStream, consume, consume_with};
pub use wire::{
    CONTENT_TYPE, DataObject, FinishPayload, FinishReason, PROTOCOL_HEADER, PROTOCOL_VERSION,
    RecordKind, Usage, WireRecord,
};
