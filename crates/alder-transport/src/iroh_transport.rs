//! Iroh P2P implementation of the partition connection contract.
//!
//! Each unary call opens a fresh bidirectional stream on a QUIC connection
//! to the partition endpoint, writes the postcard-encoded request, and reads
//! the single response. Server-streams keep their stream open and deliver
//! length-prefixed response frames until the server finishes.

use std::sync::Arc;

use alder_api::PrimitiveRequest;
use alder_api::PrimitiveResponse;
use anyhow::Context;
use async_trait::async_trait;
use iroh::Endpoint;
use iroh::NodeAddr;
use iroh::endpoint::VarInt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::connection::PartitionConnection;
use crate::connection::ResponseStream;
use crate::connection::TransportError;
use crate::constants::CONNECT_TIMEOUT;
use crate::constants::MAX_MESSAGE_SIZE;
use crate::constants::PRIMITIVE_ALPN;
use crate::constants::STREAM_CHANNEL_CAPACITY;
use crate::frame::read_frame;

/// Factory for partition connections over an Iroh endpoint.
pub struct IrohTransport {
    endpoint: Endpoint,
}

impl IrohTransport {
    /// Bind a fresh client endpoint.
    pub async fn bind() -> anyhow::Result<Self> {
        let secret_key = iroh::SecretKey::generate(rand_core::OsRng);
        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![PRIMITIVE_ALPN.to_vec()])
            .bind()
            .await
            .context("failed to bind Iroh endpoint")?;
        debug!(endpoint_id = %endpoint.node_id(), "alder transport bound");
        Ok(Self { endpoint })
    }

    /// Wrap an existing endpoint.
    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    /// Connection handle for one partition endpoint.
    pub fn connection(&self, addr: NodeAddr) -> IrohConnection {
        IrohConnection {
            endpoint: self.endpoint.clone(),
            addr,
        }
    }

    /// Connection handles for an ordered partition endpoint list.
    ///
    /// The index of each address in the list is its partition id.
    pub fn connections(&self, addrs: Vec<NodeAddr>) -> Vec<Arc<dyn PartitionConnection>> {
        addrs.into_iter().map(|addr| Arc::new(self.connection(addr)) as Arc<dyn PartitionConnection>).collect()
    }

    /// Close the endpoint.
    pub async fn shutdown(self) {
        self.endpoint.close().await;
    }
}

/// A partition connection over Iroh QUIC.
pub struct IrohConnection {
    endpoint: Endpoint,
    addr: NodeAddr,
}

impl IrohConnection {
    async fn connect(&self) -> anyhow::Result<iroh::endpoint::Connection> {
        let connection = timeout(CONNECT_TIMEOUT, async {
            self.endpoint.connect(self.addr.clone(), PRIMITIVE_ALPN).await.context("failed to connect to partition")
        })
        .await
        .context("connection timeout")??;
        Ok(connection)
    }

    async fn unary_inner(&self, request: PrimitiveRequest) -> anyhow::Result<PrimitiveResponse> {
        let connection = self.connect().await?;
        let (mut send, mut recv) = connection.open_bi().await.context("failed to open stream")?;

        let request_bytes = postcard::to_stdvec(&request).context("failed to serialize request")?;
        send.write_all(&request_bytes).await.context("failed to send request")?;
        send.finish().context("failed to finish send stream")?;

        let response_bytes = recv.read_to_end(MAX_MESSAGE_SIZE).await.context("failed to read response")?;
        let response: PrimitiveResponse =
            postcard::from_bytes(&response_bytes).context("failed to deserialize response")?;

        connection.close(VarInt::from_u32(0), b"done");
        Ok(response)
    }
}

#[async_trait]
impl PartitionConnection for IrohConnection {
    async fn unary(
        &self,
        request: PrimitiveRequest,
        cancel: &CancellationToken,
    ) -> Result<PrimitiveResponse, TransportError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.unary_inner(request) => result.map_err(|err| TransportError::Connection {
                reason: format!("{err:#}"),
            }),
        }
    }

    async fn open_stream(
        &self,
        request: PrimitiveRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let connection = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = self.connect() => result.map_err(|err| TransportError::Connection {
                reason: format!("{err:#}"),
            })?,
        };
        let (mut send, mut recv) = connection.open_bi().await.map_err(|err| TransportError::Connection {
            reason: err.to_string(),
        })?;

        let request_bytes = postcard::to_stdvec(&request).map_err(|err| TransportError::Codec {
            reason: err.to_string(),
        })?;
        send.write_all(&request_bytes).await.map_err(|err| TransportError::Connection {
            reason: err.to_string(),
        })?;
        send.finish().map_err(|err| TransportError::Connection {
            reason: err.to_string(),
        })?;

        let (tx, stream) = ResponseStream::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            // Keep the connection alive for the lifetime of the stream.
            let _connection = connection;
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = read_frame::<_, PrimitiveResponse>(&mut recv, MAX_MESSAGE_SIZE) => frame,
                };
                match frame {
                    Ok(Some(response)) => {
                        if tx.send(Ok(response)).await.is_err() {
                            debug!("stream consumer dropped, stopping receive loop");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "stream receive failed");
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });

        Ok(stream)
    }
}
