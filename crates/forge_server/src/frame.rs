//! Length-prefixed bincode frames on a byte stream.
//!
//! Each frame is a little-endian `u32` body length followed by the
//! bincode-encoded [`Frame`].

use forge_core::remote::{ConnectionId, RemoteMessage};
use forge_core::version::Version;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ServerError};

/// Largest accepted frame body. Join snapshots dominate.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Everything that travels between a client and the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// First client frame.
    Hello {
        /// Client build.
        version: Version,
        /// Client remote registry fingerprint.
        fingerprint: u64,
    },
    /// Handshake accepted; the client adopts the snapshot.
    Welcome {
        /// Identifier the server uses for this client.
        connection: ConnectionId,
        /// Full simulation snapshot.
        snapshot: Vec<u8>,
    },
    /// Handshake refused or session dropped.
    Reject {
        /// Human-readable reason.
        reason: String,
    },
    /// A remote call.
    Call(RemoteMessage),
}

impl Frame {
    /// Variant name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Welcome { .. } => "welcome",
            Self::Reject { .. } => "reject",
            Self::Call(_) => "call",
        }
    }

    /// Encode the body (without the length prefix).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Frame`] if bincode fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ServerError::Frame(e.to_string()))
    }

    /// Decode a body.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Frame`] on malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| ServerError::Frame(e.to_string()))
    }
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns an error if the frame is too large or the write fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let body = frame.encode()?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ServerError::FrameTooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| ServerError::FrameTooLarge(body.len()))?;
    writer.write_u32_le(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the stream closes cleanly between frames.
///
/// # Errors
///
/// Returns an error on oversize or malformed frames, a stream closed
/// mid-frame, or a read failure.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(ServerError::FrameTooLarge(len));
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Frame::decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::remote::{Arg, Delivery};

    fn call() -> Frame {
        Frame::Call(RemoteMessage {
            op: 3,
            delivery: Delivery::Forwarded,
            args: vec![Arg::Int(7), Arg::Int(-2)],
        })
    }

    #[tokio::test]
    async fn test_frames_survive_the_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let hello = Frame::Hello {
            version: Version::current(),
            fingerprint: 0xfeed,
        };
        write_frame(&mut a, &hello).await.unwrap();
        write_frame(&mut a, &call()).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b).await.unwrap(), Some(hello));
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(call()));
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &call()).await.unwrap();
        let len = b.read_u32_le().await.unwrap() as usize;
        assert_eq!(len, call().encode().unwrap().len());
    }

    #[tokio::test]
    async fn test_oversize_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32_le(u32::MAX).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ServerError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32_le(10).await.unwrap();
        a.write_all(&[1, 2, 3]).await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(ServerError::Io(_))));
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        assert!(matches!(
            Frame::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(ServerError::Frame(_))
        ));
    }
}
