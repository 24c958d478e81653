//! HTTP client for a chat endpoint that answers with a data stream.

use std::time::Duration;

use tracing::debug;

use crate::decoder::StreamDecoder;
use crate::errors::ClientError;
use crate::request::ChatRequest;
use crate::stream::{DEFAULT_EVENT_BUFFER, SessionStream, consume_with};
use crate::wire::{PROTOCOL_HEADER, PROTOCOL_VERSION};

/// Posts chat requests and decodes the streamed replies.
#[derive(Clone, Debug)]
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    event_buffer: usize,
}

impl ChatClient {
    /// Creates a client for `endpoint`, e.g. `http://127.0.0.1:8000/api/chat`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `request` and starts decoding the reply into a fresh session.
    pub async fn send(&self, request: &ChatRequest) -> Result<SessionStream, ClientError> {
        self.send_with(request, StreamDecoder::new()).await
    }

    /// Like [`ChatClient::send`], decoding into a preconfigured decoder.
    pub async fn send_with(
        &self,
        request: &ChatRequest,
        decoder: StreamDecoder,
    ) -> Result<SessionStream, ClientError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        check_version(response.headers())?;

        debug!(endpoint = %self.endpoint, messages = request.messages.len(), "chat stream opened");
        Ok(consume_with(
            response.bytes_stream(),
            decoder,
            self.event_buffer,
        ))
    }
}

/// Rejects responses that announce a different data stream version.
///
/// A missing header is accepted.
pub fn check_version(headers: &reqwest::header::HeaderMap) -> Result<(), ClientError> {
    match headers.get(PROTOCOL_HEADER) {
        None => Ok(()),
        Some(value) if value.as_bytes() == PROTOCOL_VERSION.as_bytes() => Ok(()),
        Some(value) => Err(ClientError::Version {
            found: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    #[test]
    fn accepts_v1_and_missing_header() {
        let mut headers = HeaderMap::new();
        assert!(check_version(&headers).is_ok());
        headers.insert(PROTOCOL_HEADER, HeaderValue::from_static("v1"));
        assert!(check_version(&headers).is_ok());
    }

    #[test]
    fn rejects_other_versions() {
        let mut headers = HeaderMap::new();
        headers.insert(PROTOCOL_HEADER, HeaderValue::from_static("v2"));
        assert_eq!(
            check_version(&headers),
            Err(ClientError::Version { found: "v2".into() })
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        let client = ChatClient::new("http://127.0.0.1:9/api/chat").expect("client");
        let request = ChatRequest::new(Vec::new());
        let err = client.send(&request).await.err().expect("connection refused");
        assert!(matches!(err, ClientError::Request(_)));
    }
}
