//! The connection contract consumed by the session runtime.

use alder_api::PrimitiveRequest;
use alder_api::PrimitiveResponse;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the transport.
///
/// The session runtime treats all of these as caller-decided: a failed call
/// does not close the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The partition could not be reached or the call failed in flight.
    #[error("connection error: {reason}")]
    Connection {
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The call did not complete within its deadline.
    #[error("request timed out after {duration_ms}ms")]
    Timeout {
        /// Deadline in milliseconds.
        duration_ms: u64,
    },

    /// A message exceeded the configured size limit.
    #[error("message exceeds {max_bytes} byte limit")]
    MessageTooLarge {
        /// The limit that was exceeded.
        max_bytes: usize,
    },

    /// A message could not be decoded.
    #[error("failed to decode message: {reason}")]
    Codec {
        /// Human-readable description of the decode failure.
        reason: String,
    },

    /// The caller's cancellation token fired while the call was in flight.
    #[error("call cancelled")]
    Cancelled,
}

/// A handle to one partition endpoint.
///
/// Implementations must be safe for concurrent use: the session runtime
/// issues commands, queries, keep-alives, and stream opens on the same
/// connection without external synchronization.
#[async_trait]
pub trait PartitionConnection: Send + Sync + 'static {
    /// Issue a request and wait for its single response.
    ///
    /// Observing `cancel` aborts the in-flight call with
    /// [`TransportError::Cancelled`].
    async fn unary(
        &self,
        request: PrimitiveRequest,
        cancel: &CancellationToken,
    ) -> Result<PrimitiveResponse, TransportError>;

    /// Issue a request that opens a server-stream of responses.
    ///
    /// The returned stream yields responses in arrival order until the
    /// server finishes the stream, an error occurs, or `cancel` fires.
    /// Dropping the stream releases the underlying transport resources.
    async fn open_stream(
        &self,
        request: PrimitiveRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream, TransportError>;
}

/// A server-stream of responses.
pub struct ResponseStream {
    rx: mpsc::Receiver<Result<PrimitiveResponse, TransportError>>,
}

impl ResponseStream {
    /// Create a stream and the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<PrimitiveResponse, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// Receive the next response.
    ///
    /// Returns `None` when the server has finished the stream.
    pub async fn next(&mut self) -> Option<Result<PrimitiveResponse, TransportError>> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}
