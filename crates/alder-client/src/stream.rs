//! Event stream plumbing shared by streaming primitives.

use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;

use crate::error::ClientError;

/// Buffered events per stream before the receive loop backpressures.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A stream of decoded events from one or more partitions.
///
/// Events arrive in server delivery order per partition. Dropping the stream
/// cancels the attached per-stream token, which stops the receive loops and
/// releases the server-streams even when no further event arrives.
pub struct EventStream<T> {
    rx: mpsc::Receiver<Result<T, ClientError>>,
    guard: Option<DropGuard>,
}

impl<T> EventStream<T> {
    /// Create a stream and the sender that feeds it.
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<Result<T, ClientError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx, guard: None })
    }

    /// Cancel `token` when this stream is dropped.
    pub(crate) fn attach_guard(&mut self, token: CancellationToken) {
        self.guard = Some(token.drop_guard());
    }

    /// Multiplex several streams into one.
    ///
    /// Per-source order is preserved; global order is unspecified. The
    /// merged stream ends once every source has ended, and dropping it
    /// drops every source.
    pub(crate) fn merge(streams: Vec<Self>) -> Self
    where
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let (tx, mut merged) = Self::channel(EVENT_CHANNEL_CAPACITY);
        for mut stream in streams {
            let tx = tx.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    let item = tokio::select! {
                        _ = token.cancelled() => break,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(item) => {
                            if tx.send(item).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            });
        }
        merged.attach_guard(token);
        merged
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the stream has ended: every producing partition
    /// finished its stream, or a terminal error was already delivered.
    pub async fn next(&mut self) -> Option<Result<T, ClientError>> {
        self.rx.recv().await
    }
}

impl<T> futures::Stream for EventStream<T> {
    type Item = Result<T, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Per-stream delivery bookkeeping.
///
/// The session's lookup table holds this weakly; the stream's receive loop
/// holds the only strong reference, so an abandoned stream unregisters
/// itself when the loop exits.
pub(crate) struct StreamTracker {
    stream_id: u64,
    last_response_id: AtomicU64,
}

impl StreamTracker {
    pub(crate) fn new(stream_id: u64) -> Self {
        Self {
            stream_id,
            last_response_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Highest response id delivered to the consumer.
    pub(crate) fn last_response_id(&self) -> u64 {
        self.last_response_id.load(Ordering::Acquire)
    }

    pub(crate) fn record(&self, response_id: u64) {
        self.last_response_id.store(response_id, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_stream_delivers_in_order() {
        let (tx, mut stream) = EventStream::channel(8);
        for i in 0..3u64 {
            tx.send(Ok(i)).await.unwrap();
        }
        drop(tx);

        assert_eq!(stream.next().await.unwrap().unwrap(), 0);
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_merge_delivers_from_every_source() {
        let (left_tx, left) = EventStream::channel(8);
        let (right_tx, right) = EventStream::channel(8);
        let mut merged = EventStream::merge(vec![left, right]);

        left_tx.send(Ok(1u64)).await.unwrap();
        right_tx.send(Ok(2u64)).await.unwrap();
        drop(left_tx);
        drop(right_tx);

        let mut seen = vec![
            merged.next().await.unwrap().unwrap(),
            merged.next().await.unwrap().unwrap(),
        ];
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
        assert!(merged.next().await.is_none());
    }

    #[test]
    fn test_tracker_records_progress() {
        let tracker = StreamTracker::new(9);
        assert_eq!(tracker.stream_id(), 9);
        assert_eq!(tracker.last_response_id(), 0);
        tracker.record(3);
        assert_eq!(tracker.last_response_id(), 3);
    }
}
