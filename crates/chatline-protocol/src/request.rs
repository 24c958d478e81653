//! Inbound chat request accepted by the chat endpoint.

use crate::errors::RequestError;
use crate::session::Role;

/// One prior turn sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
        }
    }
}

/// Full conversation history posted for one reply.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Conversation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            id: None,
            user_id: None,
            session_id: None,
        }
    }

    /// Decodes a request body. Syntax errors and shape errors are reported
    /// separately so the caller can word its response.
    pub fn from_json(body: &[u8]) -> Result<Self, RequestError> {
        serde_json::from_slice(body).map_err(|e| {
            if e.is_data() {
                RequestError::Validation(e.to_string())
            } else {
                RequestError::InvalidJson(e.to_string())
            }
        })
    }

    /// Checks the request and trims ids and contents.
    ///
    /// Rules: at least one message, non-blank ids and contents, and the last
    /// message comes from the user.
    pub fn validate(mut self) -> Result<Self, RequestError> {
        if self.messages.is_empty() {
            return Err(RequestError::Validation(
                "At least one message is required".into(),
            ));
        }
        for message in &mut self.messages {
            let id = message.id.trim();
            if id.is_empty() {
                return Err(RequestError::Validation("Message ID cannot be empty".into()));
            }
            let content = message.content.trim();
            if content.is_empty() {
                return Err(RequestError::Validation(
                    "Message content cannot be empty".into(),
                ));
            }
            message.id = id.to_string();
            message.content = content.to_string();
        }
        if let Some(last) = self.messages.last()
            && last.role != Role::User
        {
            return Err(RequestError::Validation(
                "Last message must be from user".into(),
            ));
        }
        Ok(self)
    }

    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
    }
}

/// JSON body returned for failures that happen before streaming starts.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_type: error_type.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
