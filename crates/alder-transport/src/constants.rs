//! Transport limits and protocol identifiers.

use std::time::Duration;

/// ALPN identifying the primitive session protocol.
pub const PRIMITIVE_ALPN: &[u8] = b"alder/primitive/1";

/// Maximum size of a single unary message.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Maximum time to establish a connection to a partition.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered responses per open server-stream before backpressure.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;
