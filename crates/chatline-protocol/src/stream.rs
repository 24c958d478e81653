//! Async consumption of a data stream body.
//!
//! [`consume`] spawns a task that drives a [`StreamDecoder`] from a byte
//! stream and publishes one [`SessionEvent`] per applied record, so a UI can
//! render every intermediate state.

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::decoder::{SessionUpdate, StreamDecoder};
use crate::errors::{CloseCause, StreamFailure};
use crate::session::{SessionSnapshot, StreamSession};
use crate::wire::{FinishPayload, RecordKind};

/// Default number of events buffered between the decode task and the consumer.
///
/// A reader that falls further behind skips intermediate updates; failure and
/// finish events are always delivered.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Observable change to a session being decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A text, reasoning or data record was applied.
    Updated {
        kind: RecordKind,
        snapshot: SessionSnapshot,
    },
    /// An error record, a malformed line or a lost connection.
    Failed {
        failure: StreamFailure,
        snapshot: SessionSnapshot,
    },
    /// The finish record was applied.
    Finished(SessionSnapshot),
}

impl SessionEvent {
    pub fn snapshot(&self) -> &SessionSnapshot {
        match self {
            SessionEvent::Updated { snapshot, .. }
            | SessionEvent::Failed { snapshot, .. }
            | SessionEvent::Finished(snapshot) => snapshot,
        }
    }
}

/// Final state of a consumed session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOutcome {
    pub snapshot: SessionSnapshot,
    pub result: Result<FinishPayload, StreamFailure>,
}

impl SessionOutcome {
    pub fn into_result(self) -> Result<SessionSnapshot, StreamFailure> {
        self.result.map(|_| self.snapshot)
    }
}

/// Handle used to cancel a session that is still being read.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The session ends as incomplete with [`CloseCause::Cancelled`].
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Handle returned by [`consume`].
pub struct SessionStream {
    rx: mpsc::Receiver<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
    final_rx: oneshot::Receiver<SessionOutcome>,
    abort_handle: AbortHandle,
}

impl SessionStream {
    /// Next event, or `None` once the decode task has finished.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Receiver that always holds the latest snapshot, whether or not
    /// [`SessionStream::next_event`] is being read.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Drains remaining events and returns the final outcome.
    ///
    /// Safe to call after reading events with [`SessionStream::next_event`].
    pub async fn finish(mut self) -> SessionOutcome {
        while self.rx.recv().await.is_some() {}
        match self.final_rx.await {
            Ok(outcome) => outcome,
            Err(_) => SessionOutcome {
                snapshot: self.snapshots.borrow().clone(),
                result: Err(StreamFailure::Incomplete {
                    cause: CloseCause::Transport("decode task ended without result".into()),
                    residual_bytes: 0,
                }),
            },
        }
    }
}

/// Decodes `body` into a fresh session on a background task.
pub fn consume<S, E>(body: S) -> SessionStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    consume_with(body, StreamDecoder::new(), DEFAULT_EVENT_BUFFER)
}

/// Like [`consume`], with a preconfigured decoder and event buffer size.
pub fn consume_with<S, E>(body: S, decoder: StreamDecoder, capacity: usize) -> SessionStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(decoder.session().snapshot());
    let (final_tx, final_rx) = oneshot::channel();
    let (abort_tx, abort_rx) = watch::channel(false);

    tokio::spawn(decode_task(
        Box::pin(body),
        decoder,
        tx,
        snapshot_tx,
        final_tx,
        abort_rx,
    ));

    SessionStream {
        rx,
        snapshots: snapshot_rx,
        final_rx,
        abort_handle: AbortHandle { tx: abort_tx },
    }
}

async fn decode_task<S, E>(
    mut body: std::pin::Pin<Box<S>>,
    mut decoder: StreamDecoder,
    tx: mpsc::Sender<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    final_tx: oneshot::Sender<SessionOutcome>,
    mut abort_rx: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
{
    let mut publisher = Publisher::new(tx, snapshots);
    let mut chunks = 0_u64;
    let result = loop {
        tokio::select! {
            biased;
            changed = abort_rx.changed() => {
                match changed {
                    Ok(()) if *abort_rx.borrow() => break decoder.cancel(),
                    Ok(()) => {}
                    // Every abort handle is gone, so nobody is listening.
                    Err(_) => break decoder.cancel(),
                }
            }
            next = body.next() => {
                match next {
                    Some(Ok(chunk)) => {
                        chunks += 1;
                        let mut connected = true;
                        decoder.push_chunk_with(&chunk, |update, session| {
                            connected &= publisher.publish(event_for(update, session));
                        });
                        if !connected {
                            debug!(chunks, "session consumer dropped");
                            break decoder.cancel();
                        }
                        if decoder.is_ended() {
                            break decoder.close();
                        }
                    }
                    Some(Err(e)) => break decoder.close_with(CloseCause::Transport(e.to_string())),
                    None => break decoder.close(),
                }
            }
        }
    };

    let snapshot = decoder.session().snapshot();
    if let Err(failure @ StreamFailure::Incomplete { .. }) = &result {
        publisher.publish(SessionEvent::Failed {
            failure: failure.clone(),
            snapshot: snapshot.clone(),
        });
    }
    publisher.snapshots.send_replace(snapshot.clone());
    debug!(
        chunks,
        status = ?snapshot.status,
        ok = result.is_ok(),
        skipped = publisher.skipped,
        "session decode finished"
    );
    let _ = final_tx.send(SessionOutcome { snapshot, result });
    publisher.deliver_held().await;
}

fn event_for(update: &SessionUpdate, session: &StreamSession) -> SessionEvent {
    let snapshot = session.snapshot();
    match update {
        SessionUpdate::Applied(kind) => SessionEvent::Updated {
            kind: *kind,
            snapshot,
        },
        SessionUpdate::Failed(failure) => SessionEvent::Failed {
            failure: failure.clone(),
            snapshot,
        },
        SessionUpdate::Finished(_) => SessionEvent::Finished(snapshot),
    }
}

/// Fans decoded events out to the event channel and the snapshot watch.
///
/// Never waits on the event reader: the watch and abort paths keep moving
/// even when nobody calls `next_event`.
struct Publisher {
    tx: mpsc::Sender<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    /// Failure and finish events waiting for room in the channel.
    held: VecDeque<SessionEvent>,
    skipped: u64,
}

impl Publisher {
    fn new(tx: mpsc::Sender<SessionEvent>, snapshots: watch::Sender<SessionSnapshot>) -> Self {
        Self {
            tx,
            snapshots,
            held: VecDeque::new(),
            skipped: 0,
        }
    }

    /// Returns `false` once the event receiver is gone.
    fn publish(&mut self, event: SessionEvent) -> bool {
        self.snapshots.send_replace(event.snapshot().clone());
        if !self.flush_held() {
            return false;
        }
        let event = if self.held.is_empty() {
            match self.tx.try_send(event) {
                Ok(()) => return true,
                Err(TrySendError::Full(event)) => event,
                Err(TrySendError::Closed(_)) => return false,
            }
        } else {
            event
        };
        match event {
            SessionEvent::Updated { .. } => self.skipped += 1,
            terminal => self.held.push_back(terminal),
        }
        true
    }

    fn flush_held(&mut self) -> bool {
        while let Some(event) = self.held.pop_front() {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.held.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }
        true
    }

    /// Waits for the reader to take the held events, or to go away.
    async fn deliver_held(mut self) {
        while let Some(event) = self.held.pop_front() {
            if self.tx.send(event).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::stream;
    use futures::StreamExt as _;

    use super::*;
    use crate::session::SessionStatus;
    use crate::wire::FinishReason;

    fn chunks(parts: &[&str]) -> Vec<Result<Bytes, io::Error>> {
        parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn publishes_one_event_per_record() {
        let mut session = consume(stream::iter(chunks(&[
            "0:\"Hel",
            "lo\"\n0:\" world\"\n",
            "d:{\"finishReason\":\"stop\"}\n",
        ])));

        let mut texts = Vec::new();
        let mut finished = false;
        while let Some(event) = session.next_event().await {
            match event {
                SessionEvent::Updated { kind, snapshot } => {
                    assert_eq!(kind, RecordKind::Text);
                    let text = snapshot.assistant().map(|m| m.content.clone());
                    texts.push(text.unwrap_or_default());
                }
                SessionEvent::Finished(snapshot) => {
                    assert_eq!(snapshot.status, SessionStatus::Completed);
                    finished = true;
                }
                SessionEvent::Failed { failure, .. } => panic!("unexpected failure {failure}"),
            }
        }
        assert_eq!(texts, vec!["Hello", "Hello world"]);
        assert!(finished);

        let outcome = session.finish().await;
        assert_eq!(
            outcome.result.expect("finish").finish_reason,
            FinishReason::Stop
        );
    }

    #[tokio::test]
    async fn early_close_is_reported_as_incomplete() {
        let session = consume(stream::iter(chunks(&["0:\"partial\"\n0:\"cut"])));
        let outcome = session.finish().await;
        assert_eq!(outcome.snapshot.status, SessionStatus::Incomplete);
        assert_eq!(
            outcome.result,
            Err(StreamFailure::Incomplete {
                cause: CloseCause::Closed,
                residual_bytes: 6,
            })
        );
    }

    #[tokio::test]
    async fn transport_error_is_incomplete_with_cause() {
        let mut parts = chunks(&["0:\"a\"\n"]);
        parts.push(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        let session = consume(stream::iter(parts));
        let outcome = session.finish().await;
        assert!(matches!(
            outcome.result,
            Err(StreamFailure::Incomplete {
                cause: CloseCause::Transport(ref message),
                ..
            }) if message.contains("reset")
        ));
    }

    #[tokio::test]
    async fn abort_cancels_a_stalled_stream() {
        let body = stream::iter(chunks(&["0:\"thinking\"\n"])).chain(stream::pending());
        let mut session = consume(body);

        let first = session.next_event().await.expect("first event");
        assert!(matches!(first, SessionEvent::Updated { .. }));
        session.abort_handle().abort();

        let next = session.next_event().await.expect("cancel event");
        assert!(matches!(
            next,
            SessionEvent::Failed {
                failure: StreamFailure::Incomplete {
                    cause: CloseCause::Cancelled,
                    ..
                },
                ..
            }
        ));
        let outcome = session.finish().await;
        assert_eq!(outcome.snapshot.status, SessionStatus::Incomplete);
        assert_eq!(
            outcome.snapshot.assistant().map(|m| m.content.as_str()),
            Some("thinking")
        );
    }

    #[tokio::test]
    async fn latest_snapshot_tracks_final_state() {
        let session = consume(stream::iter(chunks(&[
            "3:\"model overloaded\"\n",
            "d:{\"finishReason\":\"error\"}\n",
        ])));
        let snapshots = session.subscribe();
        let outcome = session.finish().await;
        assert_eq!(
            outcome.result,
            Err(StreamFailure::Remote {
                message: "model overloaded".into()
            })
        );
        let latest = snapshots.borrow().clone();
        assert_eq!(latest.status, SessionStatus::Errored);
        assert_eq!(latest.error.as_deref(), Some("model overloaded"));
    }

    fn text_records(count: usize) -> String {
        "0:\"x\"\n".repeat(count)
    }

    fn many_records(count: usize) -> Vec<Result<Bytes, io::Error>> {
        let body = text_records(count) + "d:{\"finishReason\":\"stop\"}\n";
        vec![Ok(Bytes::from(body))]
    }

    #[tokio::test]
    async fn subscriber_sees_completion_without_reading_events() {
        let session = consume(stream::iter(many_records(200)));
        let mut snapshots = session.subscribe();

        let latest = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            snapshots.wait_for(|snapshot| snapshot.status.is_terminal()),
        )
        .await
        .expect("decode task stalled")
        .expect("watch open")
        .clone();

        assert_eq!(latest.status, SessionStatus::Completed);
        assert_eq!(latest.assistant().map(|m| m.content.len()), Some(200));
        assert!(session.finish().await.result.is_ok());
    }

    #[tokio::test]
    async fn late_reader_skips_updates_but_gets_finish() {
        let mut session = consume(stream::iter(many_records(200)));
        let mut snapshots = session.subscribe();
        snapshots
            .wait_for(|snapshot| snapshot.status.is_terminal())
            .await
            .expect("watch open");

        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            events.push(event);
        }
        assert_eq!(events.len(), DEFAULT_EVENT_BUFFER + 1);
        assert!(matches!(events.last(), Some(SessionEvent::Finished(_))));
    }

    #[tokio::test]
    async fn abort_is_seen_while_events_go_unread() {
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from(text_records(100)))])
            .chain(stream::pending());
        let session = consume(body);
        let mut snapshots = session.subscribe();
        snapshots
            .wait_for(|snapshot| snapshot.assistant().map(|m| m.content.len()) == Some(100))
            .await
            .expect("watch open");

        session.abort_handle().abort();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), session.finish())
            .await
            .expect("abort ignored");
        assert!(matches!(
            outcome.result,
            Err(StreamFailure::Incomplete {
                cause: CloseCause::Cancelled,
                ..
            })
        ));
    }
}
