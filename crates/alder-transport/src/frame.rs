//! Length-prefixed postcard frames for server-streams.
//!
//! Unary calls serialize one message per QUIC stream and rely on stream
//! finish for delimiting. Long-lived server-streams carry many messages on
//! one stream, so each is framed with a little-endian `u32` length prefix.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::connection::TransportError;

/// Write one framed message.
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_bytes: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = postcard::to_stdvec(message).map_err(|err| TransportError::Codec {
        reason: err.to_string(),
    })?;
    if bytes.len() > max_bytes {
        return Err(TransportError::MessageTooLarge { max_bytes });
    }
    writer
        .write_u32_le(bytes.len() as u32)
        .await
        .map_err(|err| TransportError::Connection {
            reason: err.to_string(),
        })?;
    writer.write_all(&bytes).await.map_err(|err| TransportError::Connection {
        reason: err.to_string(),
    })?;
    Ok(())
}

/// Read one framed message.
///
/// Returns `None` on a clean end of stream (EOF before a length prefix).
pub async fn read_frame<R, T>(reader: &mut R, max_bytes: usize) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => {
            return Err(TransportError::Connection {
                reason: err.to_string(),
            });
        }
    };
    if len > max_bytes {
        return Err(TransportError::MessageTooLarge { max_bytes });
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await.map_err(|err| TransportError::Connection {
        reason: err.to_string(),
    })?;
    let message = postcard::from_bytes(&bytes).map_err(|err| TransportError::Codec {
        reason: err.to_string(),
    })?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Message {
        id: u64,
        body: Vec<u8>,
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut buffer = Vec::new();
        let first = Message {
            id: 1,
            body: b"hello".to_vec(),
        };
        let second = Message {
            id: 2,
            body: Vec::new(),
        };
        write_frame(&mut buffer, &first, 1024).await.unwrap();
        write_frame(&mut buffer, &second, 1024).await.unwrap();

        let mut reader = buffer.as_slice();
        let got: Option<Message> = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(got, Some(first));
        let got: Option<Message> = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(got, Some(second));
        let got: Option<Message> = read_frame::<_, Message>(&mut reader, 1024).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_frame_rejects_oversized_length() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut reader = buffer.as_slice();
        let result = read_frame::<_, Message>(&mut reader, 1024).await;
        assert!(matches!(result, Err(TransportError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_frame_truncated_body_is_an_error() {
        let mut buffer = Vec::new();
        let message = Message {
            id: 9,
            body: vec![1, 2, 3, 4],
        };
        write_frame(&mut buffer, &message, 1024).await.unwrap();
        buffer.truncate(buffer.len() - 2);

        let mut reader = buffer.as_slice();
        let result = read_frame::<_, Message>(&mut reader, 1024).await;
        assert!(matches!(result, Err(TransportError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_write_frame_enforces_limit() {
        let mut buffer = Vec::new();
        let message = Message {
            id: 1,
            body: vec![0u8; 64],
        };
        let result = write_frame(&mut buffer, &message, 16).await;
        assert!(matches!(result, Err(TransportError::MessageTooLarge { max_bytes: 16 })));
    }
}
