// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Framing and the host-side RPC client.
//!
//! Frames are `u32` big-endian length prefixes followed by one encoded
//! [`Envelope`](crate::proto::Envelope). The handshake line travels before
//! the first frame and is plain text; everything after it is binary.

pub mod client;

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::TransportError;
use crate::proto::Envelope;

/// Upper bound on a single frame. Large enough for any realistic parameter
/// payload, small enough to catch a desynchronized stream early.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Writes one envelope as a length-delimited frame and flushes. Oversized
/// envelopes fail here, before any bytes hit the wire, rather than as a
/// decode desync on the peer.
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = envelope.encode_to_vec();
    if bytes.len() > MAX_FRAME_LEN as usize {
        return Err(TransportError::FrameTooLarge {
            len: bytes.len() as u64,
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the channel cleanly at
/// a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Envelope>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len: len as u64,
            max: MAX_FRAME_LEN,
        });
    }

    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).await?;
    Ok(Some(Envelope::decode(bytes.as_slice())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{envelope, ConfigureRequest, PROTOCOL_VERSION};

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let envelope = Envelope {
            seq: 7,
            body: Some(envelope::Body::ConfigureRequest(ConfigureRequest {
                protocol_version: PROTOCOL_VERSION,
            })),
        };
        write_frame(&mut a, &envelope).await.unwrap();

        let read = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(read, envelope);
    }

    #[tokio::test]
    async fn clean_close_reads_as_none() {
        let (a, mut b) = tokio::io::duplex(1024);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_writing() {
        use crate::proto::PerformTaskRequest;

        let (mut a, mut b) = tokio::io::duplex(1024);

        let envelope = Envelope {
            seq: 1,
            body: Some(envelope::Body::PerformTaskRequest(PerformTaskRequest {
                backend: "big".into(),
                inputs: vec![],
                parameters: vec![0u8; MAX_FRAME_LEN as usize + 1],
                out_directory: String::new(),
            })),
        };

        let err = write_frame(&mut a, &envelope).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));

        // Nothing was written: the peer sees a clean close, not a desync.
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }
}
