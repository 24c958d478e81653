//! Client-side conversation state assembled from decoded records.

use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::wire::{DataObject, FinishPayload};

/// Opaque message identifier, stable for the lifetime of the message.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// A fresh random (v4 UUID) id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed fragment of a message, kept in the order the model produced it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
    Reasoning { text: String },
}

impl MessagePart {
    pub fn text(&self) -> &str {
        match self {
            MessagePart::Text { text } | MessagePart::Reasoning { text } => text,
        }
    }
}

/// One turn of the conversation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub role: Role,
    /// Every text fragment of the turn, concatenated in arrival order.
    pub content: String,
    /// Text and reasoning fragments in arrival order. Adjacent fragments of
    /// the same kind share one part.
    pub parts: Vec<MessagePart>,
    /// `false` while the turn is still streaming.
    pub complete: bool,
}

impl ConversationMessage {
    /// A finished message typed by a user.
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id,
            role: Role::User,
            parts: vec![MessagePart::Text {
                text: content.clone(),
            }],
            content,
            complete: true,
        }
    }

    pub(crate) fn open_assistant(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            parts: Vec::new(),
            complete: false,
        }
    }

    /// Concatenated reasoning fragments.
    pub fn reasoning(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Reasoning { text } => Some(text.as_str()),
                MessagePart::Text { .. } => None,
            })
            .collect()
    }

    fn push_text(&mut self, fragment: &str) {
        self.content.push_str(fragment);
        match self.parts.last_mut() {
            Some(MessagePart::Text { text }) => text.push_str(fragment),
            _ => self.parts.push(MessagePart::Text {
                text: fragment.to_string(),
            }),
        }
    }

    fn push_reasoning(&mut self, fragment: &str) {
        match self.parts.last_mut() {
            Some(MessagePart::Reasoning { text }) => text.push_str(fragment),
            _ => self.parts.push(MessagePart::Reasoning {
                text: fragment.to_string(),
            }),
        }
    }
}

/// File artifact as sent in data records by the chat backend.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileAttachment {
    pub filename: String,
    pub size: u64,
    pub content: String,
}

/// One side-channel item and the message it was attached to.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DataItem {
    pub value: DataObject,
    /// `None` until an assistant message exists to receive it.
    pub message_id: Option<MessageId>,
}

impl DataItem {
    /// Typed view of the item when it describes a file.
    pub fn as_file(&self) -> Option<FileAttachment> {
        serde_json::from_value(Value::Object(self.value.clone())).ok()
    }
}

/// Lifecycle of one streamed reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No record applied yet.
    #[default]
    Pending,
    /// At least one record applied, no terminal state reached.
    Streaming,
    /// A finish record arrived and no error was reported.
    Completed,
    /// An error record or a malformed line was seen.
    Errored,
    /// The transport ended or was cancelled before a finish record.
    Incomplete,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Errored | SessionStatus::Incomplete
        )
    }
}

/// Source of ids for assistant messages opened by the stream.
#[derive(Clone, Debug, Default)]
pub enum IdSource {
    #[default]
    Random,
    /// `<prefix>-0`, `<prefix>-1`, ...; useful when ids must be reproducible.
    Sequential { prefix: String, next: u64 },
}

impl IdSource {
    pub fn sequential(prefix: impl Into<String>) -> Self {
        Self::Sequential {
            prefix: prefix.into(),
            next: 0,
        }
    }

    fn next_id(&mut self) -> MessageId {
        match self {
            IdSource::Random => MessageId::random(),
            IdSource::Sequential { prefix, next } => {
                let id = MessageId(format!("{prefix}-{next}"));
                *next += 1;
                id
            }
        }
    }
}

/// Point-in-time copy of a session, handed to observers after every record.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionSnapshot {
    /// Completed messages followed by the open one, if any.
    pub messages: Vec<ConversationMessage>,
    pub data: Vec<DataItem>,
    pub status: SessionStatus,
    pub finish: Option<FinishPayload>,
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// The last assistant message, open or complete.
    pub fn assistant(&self) -> Option<&ConversationMessage> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }

    /// Data items attached to `id`.
    pub fn attachments_for<'a>(&'a self, id: &'a MessageId) -> impl Iterator<Item = &'a DataItem> {
        self.data
            .iter()
            .filter(move |item| item.message_id.as_ref() == Some(id))
    }
}

/// State of one in-flight reply. Owned by a single decoder.
#[derive(Clone, Debug, Default)]
pub struct StreamSession {
    completed: Vec<ConversationMessage>,
    open: Option<ConversationMessage>,
    data: Vec<DataItem>,
    unattached: Vec<usize>,
    status: SessionStatus,
    finish: Option<FinishPayload>,
    error: Option<String>,
    ids: IdSource,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: IdSource) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn finish(&self) -> Option<&FinishPayload> {
        self.finish.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Messages closed by a finish record.
    pub fn completed(&self) -> &[ConversationMessage] {
        &self.completed
    }

    /// The message currently being assembled.
    pub fn open_message(&self) -> Option<&ConversationMessage> {
        self.open.as_ref()
    }

    pub fn data(&self) -> &[DataItem] {
        &self.data
    }

    /// Data items still waiting for an assistant message.
    pub fn unattached(&self) -> impl Iterator<Item = &DataItem> {
        self.unattached.iter().map(|idx| &self.data[*idx])
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut messages = self.completed.clone();
        if let Some(open) = &self.open {
            messages.push(open.clone());
        }
        SessionSnapshot {
            messages,
            data: self.data.clone(),
            status: self.status,
            finish: self.finish.clone(),
            error: self.error.clone(),
        }
    }

    pub(crate) fn apply_text(&mut self, fragment: &str) {
        self.mark_streaming();
        self.open_or_current().push_text(fragment);
    }

    pub(crate) fn apply_reasoning(&mut self, fragment: &str) {
        self.mark_streaming();
        self.open_or_current().push_reasoning(fragment);
    }

    pub(crate) fn apply_data(&mut self, items: Vec<DataObject>) {
        self.mark_streaming();
        let target = self.latest_assistant_id();
        for value in items {
            if target.is_none() {
                self.unattached.push(self.data.len());
            }
            self.data.push(DataItem {
                value,
                message_id: target.clone(),
            });
        }
    }

    pub(crate) fn apply_error(&mut self, message: String) {
        self.status = SessionStatus::Errored;
        self.error = Some(message);
    }

    pub(crate) fn apply_finish(&mut self, finish: FinishPayload) {
        if let Some(mut message) = self.open.take() {
            message.complete = true;
            self.completed.push(message);
        }
        self.finish = Some(finish);
        if self.status != SessionStatus::Errored {
            self.status = SessionStatus::Completed;
        }
    }

    pub(crate) fn mark_malformed(&mut self, message: String) {
        self.status = SessionStatus::Errored;
        self.error = Some(message);
    }

    pub(crate) fn mark_incomplete(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Incomplete;
        }
    }

    fn mark_streaming(&mut self) {
        if self.status == SessionStatus::Pending {
            self.status = SessionStatus::Streaming;
        }
    }

    fn latest_assistant_id(&self) -> Option<MessageId> {
        self.open
            .iter()
            .chain(self.completed.iter().rev())
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.id.clone())
    }

    fn open_or_current(&mut self) -> &mut ConversationMessage {
        let message = match self.open.take() {
            Some(message) => message,
            None => {
                let id = self.ids.next_id();
                debug!(message_id = %id, attaching = self.unattached.len(), "opening assistant message");
                for idx in self.unattached.drain(..) {
                    self.data[idx].message_id = Some(id.clone());
                }
                ConversationMessage::open_assistant(id)
            }
        };
        self.open.insert(message)
    }
}
