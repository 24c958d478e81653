//! Common imports for encoding and decoding sessions.
pub use crate::{
    AbortHandle, ChatClient, ChatMessage, ChatRequest, ConversationStore, EncodeError,
    FinishReason, GenerationEvent, Generator, PipeOutcome, RecordSink, Role, SessionEvent,
    SessionSnapshot, SessionStatus, SessionStream, StreamDecoder, StreamEncoder, StreamFailure,
    StreamSession, Usage, respond,
};
