//! Transport binding for alder primitive sessions.
//!
//! The session runtime consumes an opaque [`PartitionConnection`]: a handle
//! on which unary and server-streaming calls can be issued concurrently.
//! This crate defines that contract, the frame codec shared by streaming
//! calls, and an Iroh P2P implementation that dials partitions over QUIC
//! with a dedicated ALPN.

mod connection;
mod constants;
mod frame;
mod iroh_transport;

pub use connection::PartitionConnection;
pub use connection::ResponseStream;
pub use connection::TransportError;
pub use constants::CONNECT_TIMEOUT;
pub use constants::MAX_MESSAGE_SIZE;
pub use constants::PRIMITIVE_ALPN;
pub use constants::STREAM_CHANNEL_CAPACITY;
pub use frame::read_frame;
pub use frame::write_frame;
pub use iroh_transport::IrohConnection;
pub use iroh_transport::IrohTransport;
