//! Incremental decoder: bytes in, session mutations out.
//!
//! Chunks may split a line anywhere, including inside a multi-byte UTF-8
//! sequence. Complete lines are applied to the owned [`StreamSession`] one at a
//! time, in arrival order, and the observer passed to
//! [`StreamDecoder::push_chunk_with`] sees the session after every record.

use tracing::{debug, warn};

use crate::errors::{CloseCause, ProtocolError, StreamFailure};
use crate::session::StreamSession;
use crate::wire::{FinishPayload, RecordKind, WireRecord};

/// Longest record line accepted by default.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Byte buffer that hands out `\n`-terminated lines.
///
/// Consumed lines are skipped with a cursor and compacted away lazily, and
/// bytes already searched for a terminator are not searched again.
#[derive(Debug)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
    start: usize,
    scanned: usize,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            max_line,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.start > 0 && self.start >= self.buf.len() / 2 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete line without its terminator.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buf.len();
            if self.len() > self.max_line {
                return Err(ProtocolError::LineTooLong {
                    limit: self.max_line,
                });
            }
            return Ok(None);
        };
        let end = self.scanned + offset;
        let line = &self.buf[self.start..end];
        if line.len() > self.max_line {
            return Err(ProtocolError::LineTooLong {
                limit: self.max_line,
            });
        }
        let line = line.to_vec();
        self.start = end + 1;
        self.scanned = self.start;
        Ok(Some(line))
    }

    /// Bytes buffered but not yet returned as a line.
    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Drops buffered bytes, returning how many there were.
    pub fn discard(&mut self) -> usize {
        let len = self.len();
        self.buf.clear();
        self.start = 0;
        self.scanned = 0;
        len
    }
}

/// What applying one record did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A text, reasoning or data record was applied.
    Applied(RecordKind),
    /// An error record or a malformed line. Reported once per session.
    Failed(StreamFailure),
    /// The finish record; nothing after it is applied.
    Finished(FinishPayload),
}

/// Parses a byte stream into a [`StreamSession`].
#[derive(Debug, Default)]
pub struct StreamDecoder {
    lines: LineBuffer,
    session: StreamSession,
    line_no: usize,
    ended: bool,
    ignored_bytes: usize,
    failure: Option<StreamFailure>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes into an existing (usually freshly configured) session.
    pub fn with_session(session: StreamSession) -> Self {
        Self {
            session,
            ..Self::default()
        }
    }

    /// Treats any line longer than `limit` bytes as malformed.
    pub fn max_line_bytes(mut self, limit: usize) -> Self {
        self.lines = LineBuffer::with_limit(limit);
        self
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn into_session(self) -> StreamSession {
        self.session
    }

    /// `true` once a finish record or a malformed line stopped decoding.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Bytes received after decoding stopped.
    pub fn ignored_bytes(&self) -> usize {
        self.ignored_bytes
    }

    /// Feeds one chunk and returns one update per applied record.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        self.push_chunk_with(chunk, |update, _| updates.push(update.clone()));
        updates
    }

    /// Feeds one chunk, calling `observer` after every applied record with the
    /// update and the session as it stands after that record.
    pub fn push_chunk_with<F>(&mut self, chunk: &[u8], mut observer: F)
    where
        F: FnMut(&SessionUpdate, &StreamSession),
    {
        if self.ended {
            self.ignore(chunk.len());
            return;
        }
        self.lines.push(chunk);
        while !self.ended {
            let line = self.lines.next_line();
            if matches!(line, Ok(None)) {
                break;
            }
            self.line_no += 1;
            let update = match line {
                Ok(Some(line)) => self.apply_line(&line),
                Ok(None) => None,
                Err(source) => self.reject(source),
            };
            if let Some(update) = update {
                observer(&update, &self.session);
            }
        }
        if self.ended {
            let rest = self.lines.discard();
            self.ignore(rest);
        }
    }

    /// Ends the session because the transport closed.
    pub fn close(&mut self) -> Result<FinishPayload, StreamFailure> {
        self.close_with(CloseCause::Closed)
    }

    /// Ends the session because the caller gave up on it.
    pub fn cancel(&mut self) -> Result<FinishPayload, StreamFailure> {
        self.close_with(CloseCause::Cancelled)
    }

    /// Resolves the session: the finish payload on success, otherwise the
    /// first failure seen, or an incomplete-stream failure when the transport
    /// ended early.
    pub fn close_with(&mut self, cause: CloseCause) -> Result<FinishPayload, StreamFailure> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.ended
            && let Some(finish) = self.session.finish()
        {
            return Ok(finish.clone());
        }

        let residual_bytes = self.lines.discard();
        self.ended = true;
        self.session.mark_incomplete();
        debug!(%cause, residual_bytes, lines = self.line_no, "stream ended without finish record");
        let failure = StreamFailure::Incomplete {
            cause,
            residual_bytes,
        };
        self.failure = Some(failure.clone());
        Err(failure)
    }

    fn apply_line(&mut self, line: &[u8]) -> Option<SessionUpdate> {
        let record = match std::str::from_utf8(line) {
            Ok(text) => WireRecord::parse(text),
            Err(e) => Err(ProtocolError::InvalidUtf8 {
                message: e.to_string(),
            }),
        };
        let record = match record {
            Ok(record) => record,
            Err(source) => return self.reject(source),
        };

        let kind = record.kind();
        if self.failure.is_some() && kind != RecordKind::Finish {
            debug!(record = %kind, line = self.line_no, "ignoring record after error");
            return None;
        }

        match record {
            WireRecord::Text(fragment) => {
                self.session.apply_text(&fragment);
                Some(SessionUpdate::Applied(kind))
            }
            WireRecord::Reasoning(fragment) => {
                self.session.apply_reasoning(&fragment);
                Some(SessionUpdate::Applied(kind))
            }
            WireRecord::Data(items) => {
                self.session.apply_data(items);
                Some(SessionUpdate::Applied(kind))
            }
            WireRecord::Error(message) => {
                self.session.apply_error(message.clone());
                Some(self.fail(StreamFailure::Remote { message }))
            }
            WireRecord::Finish(finish) => {
                self.session.apply_finish(finish.clone());
                self.ended = true;
                Some(SessionUpdate::Finished(finish))
            }
        }
    }

    /// Stops decoding at a line that breaks the grammar. Only the first
    /// failure of a session is reported.
    fn reject(&mut self, source: ProtocolError) -> Option<SessionUpdate> {
        self.ended = true;
        if self.failure.is_some() {
            debug!(line = self.line_no, error = %source, "malformed record after error, ending session");
            return None;
        }
        warn!(line = self.line_no, error = %source, "malformed data stream record");
        let failure = StreamFailure::Malformed {
            line: self.line_no,
            source,
        };
        self.session.mark_malformed(failure.to_string());
        Some(self.fail(failure))
    }

    fn fail(&mut self, failure: StreamFailure) -> SessionUpdate {
        self.failure = Some(failure.clone());
        SessionUpdate::Failed(failure)
    }

    fn ignore(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.ignored_bytes += bytes;
        debug!(bytes, total = self.ignored_bytes, "ignoring bytes after end of session");
    }
}
