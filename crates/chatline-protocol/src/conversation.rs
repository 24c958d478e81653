//! Client-side conversation history across sessions.

use tracing::debug;

use crate::request::{ChatMessage, ChatRequest};
use crate::session::{
    ConversationMessage, DataItem, FileAttachment, MessageId, Role, SessionSnapshot,
};

/// Owns the messages and attachments of one conversation.
///
/// A user turn is recorded as soon as it is sent; the assistant reply is
/// merged from the session snapshot once the stream ends.
#[derive(Clone, Debug)]
pub struct ConversationStore {
    id: String,
    messages: Vec<ConversationMessage>,
    attachments: Vec<DataItem>,
    session_id: Option<String>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            attachments: Vec::new(),
            session_id: None,
        }
    }

    /// Session id sent with every request.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Records a user turn and returns its id.
    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        let id = MessageId::random();
        self.messages
            .push(ConversationMessage::user(id.clone(), content));
        id
    }

    /// Builds the request body for the next reply.
    ///
    /// Messages with blank content (a reply that only carried reasoning, or
    /// one cut off before any text) are left out.
    pub fn request(&self) -> ChatRequest {
        let messages = self
            .messages
            .iter()
            .filter(|message| !message.content.trim().is_empty())
            .map(|message| {
                ChatMessage::new(message.id.as_str(), message.role, message.content.clone())
            })
            .collect();
        let mut request = ChatRequest::new(messages);
        request.id = Some(self.id.clone());
        request.session_id = self.session_id.clone();
        request
    }

    /// Merges a finished session: its assistant messages and data items.
    ///
    /// Items that never found a message are dropped.
    pub fn absorb(&mut self, snapshot: &SessionSnapshot) {
        let replies = snapshot
            .messages
            .iter()
            .filter(|message| message.role == Role::Assistant);
        self.messages.extend(replies.cloned());

        let mut dropped = 0_usize;
        for item in &snapshot.data {
            if item.message_id.is_some() {
                self.attachments.push(item.clone());
            } else {
                dropped += 1;
            }
        }
        debug!(
            conversation = %self.id,
            messages = self.messages.len(),
            attachments = self.attachments.len(),
            dropped,
            status = ?snapshot.status,
            "absorbed session"
        );
    }

    pub fn attachments_for<'a>(&'a self, id: &'a MessageId) -> impl Iterator<Item = &'a DataItem> {
        self.attachments
            .iter()
            .filter(move |item| item.message_id.as_ref() == Some(id))
    }

    /// Attachments for `id` that have the file shape.
    pub fn files_for(&self, id: &MessageId) -> Vec<FileAttachment> {
        self.attachments_for(id)
            .filter_map(DataItem::as_file)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::StreamDecoder;
    use crate::session::{IdSource, StreamSession};

    fn decode(body: &str) -> SessionSnapshot {
        let mut decoder =
            StreamDecoder::with_session(StreamSession::with_ids(IdSource::sequential("reply")));
        decoder.push_chunk(body.as_bytes());
        let _ = decoder.close();
        decoder.session().snapshot()
    }

    #[test]
    fn request_carries_history_in_order() {
        let mut store = ConversationStore::with_id("conv-1").session_id("s-1");
        store.push_user("first question");
        store.absorb(&decode("0:\"first answer\"\nd:{\"finishReason\":\"stop\"}\n"));
        let second = store.push_user("second question");

        let request = store.request();
        assert_eq!(request.id.as_deref(), Some("conv-1"));
        assert_eq!(request.session_id.as_deref(), Some("s-1"));
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.messages[1].content, "first answer");
        assert_eq!(request.messages[2].id, second.as_str());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn blank_replies_are_not_sent_back() {
        let mut store = ConversationStore::new();
        store.push_user("hi");
        store.absorb(&decode("g:\"thinking\"\n3:\"overloaded\"\nd:{\"finishReason\":\"error\"}\n"));
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.request().messages.len(), 1);
    }

    #[test]
    fn attachments_are_keyed_by_message() {
        let mut store = ConversationStore::new();
        store.push_user("send the file");
        store.absorb(&decode(concat!(
            "0:\"here\"\n",
            "2:[{\"filename\":\"a.txt\",\"size\":3,\"content\":\"abc\"},{\"note\":true}]\n",
            "d:{\"finishReason\":\"stop\"}\n",
        )));

        let reply = MessageId::new("reply-0");
        assert_eq!(store.attachments_for(&reply).count(), 2);
        let files = store.files_for(&reply);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "a.txt");
    }
}
