//! Server-side encoder: one generation event in, one flushed line out.

use std::io;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::errors::EncodeError;
use crate::wire::{DataObject, FinishPayload, FinishReason, Usage, WireRecord};

/// Transport that receives complete records.
///
/// `send_record` must deliver and flush the whole line before returning; an
/// error means the peer is gone.
#[async_trait::async_trait]
pub trait RecordSink: Send {
    async fn send_record(&mut self, line: Bytes) -> io::Result<()>;
}

/// Sink feeding a bounded channel, typically drained by an HTTP response body.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl RecordSink for ChannelSink {
    async fn send_record(&mut self, line: Bytes) -> io::Result<()> {
        self.tx
            .send(line)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }
}

/// Sink over any async writer; flushes after every record.
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait::async_trait]
impl<W> RecordSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_record(&mut self, line: Bytes) -> io::Result<()> {
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }
}

/// In-memory sink, handy for tests and transcripts.
#[async_trait::async_trait]
impl RecordSink for Vec<u8> {
    async fn send_record(&mut self, line: Bytes) -> io::Result<()> {
        self.extend_from_slice(&line);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EncoderState {
    Open,
    Finished,
    Closed,
}

/// Writes wire records for one session.
///
/// Every `emit_*` call is exactly one write-and-flush. After a finish record
/// the encoder refuses further records; after a failed write it refuses
/// everything and never touches the sink again.
pub struct StreamEncoder<S> {
    sink: S,
    state: EncoderState,
    records: u64,
}

impl<S: RecordSink> StreamEncoder<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: EncoderState::Open,
            records: 0,
        }
    }

    /// Records successfully written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn is_finished(&self) -> bool {
        self.state == EncoderState::Finished
    }

    /// `true` once a write failed.
    pub fn is_closed(&self) -> bool {
        self.state == EncoderState::Closed
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// `0:"<fragment>"`
    pub async fn emit_text(&mut self, fragment: &str) -> Result<(), EncodeError> {
        self.emit(WireRecord::Text(fragment.to_string())).await
    }

    /// `g:"<fragment>"`
    pub async fn emit_reasoning(&mut self, fragment: &str) -> Result<(), EncodeError> {
        self.emit(WireRecord::Reasoning(fragment.to_string())).await
    }

    /// `2:[...]`. Each item must serialize to a JSON object.
    pub async fn emit_data<T: Serialize>(&mut self, items: &[T]) -> Result<(), EncodeError> {
        let objects = items
            .iter()
            .map(to_object)
            .collect::<Result<Vec<_>, _>>()?;
        self.emit(WireRecord::Data(objects)).await
    }

    /// `3:"<message>"`. A finish record may still follow.
    pub async fn emit_error(&mut self, message: &str) -> Result<(), EncodeError> {
        self.emit(WireRecord::Error(message.to_string())).await
    }

    /// `d:{...}`. Must be the last record of the session.
    pub async fn emit_finish(
        &mut self,
        reason: FinishReason,
        usage: Usage,
    ) -> Result<(), EncodeError> {
        self.emit(WireRecord::Finish(FinishPayload {
            finish_reason: reason,
            usage: Some(usage),
        }))
        .await
    }

    /// Writes an already built record.
    pub async fn emit(&mut self, record: WireRecord) -> Result<(), EncodeError> {
        match self.state {
            EncoderState::Open => {}
            EncoderState::Finished => return Err(EncodeError::AlreadyFinished),
            EncoderState::Closed => return Err(EncodeError::TransportClosed),
        }

        let kind = record.kind();
        let line = record.to_line()?;
        let bytes = line.len();
        if let Err(e) = self.sink.send_record(Bytes::from(line)).await {
            debug!(record = %kind, records = self.records, error = %e, "transport closed while writing record");
            self.state = EncoderState::Closed;
            return Err(EncodeError::TransportClosed);
        }

        self.records += 1;
        trace!(record = %kind, bytes, seq = self.records, "wrote record");
        if matches!(record, WireRecord::Finish(_)) {
            self.state = EncoderState::Finished;
        }
        Ok(())
    }
}

fn to_object<T: Serialize>(item: &T) -> Result<DataObject, EncodeError> {
    match serde_json::to_value(item) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(EncodeError::InvalidData(format!("got {other}"))),
        Err(e) => Err(EncodeError::InvalidData(e.to_string())),
    }
}
