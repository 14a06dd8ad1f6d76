//! Connection handshake.
//!
//! ```text
//! client → server   "HUB0" + hub id (16 bytes)
//! server → client   "HUB0"
//! client → server   one frame: the join parameter (nil counts as empty)
//! server → client   spoke id (16 bytes), only if the join was accepted
//! ```
//!
//! After that both directions carry frames. A server that refuses the join
//! sends a leave frame (best effort) and closes instead of replying.
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;

use super::frame::{Frame, FrameCodec};
use crate::error::{FrameError, HubError};
use crate::id::{HubId, Id, SpokeId, ID_SIZE};

/// Header both sides send first.
pub const MAGIC: [u8; 4] = *b"HUB0";

fn closed_on_eof(e: std::io::Error) -> HubError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        HubError::Closed
    } else {
        HubError::Io(e)
    }
}

/// Write a single frame directly to a stream and flush it.
pub async fn write_frame<W>(
    writer: &mut W,
    codec: &mut FrameCodec,
    frame: Frame,
) -> Result<(), HubError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Client side: announce the hub, send the join parameter, and read back
/// the spoke id.
///
/// `None` sends a nil parameter frame.
pub async fn client_handshake<S>(
    stream: &mut S,
    hub: HubId,
    param: Option<Bytes>,
    codec: &mut FrameCodec,
) -> Result<SpokeId, HubError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hello = [0u8; 4 + ID_SIZE];
    hello[..4].copy_from_slice(&MAGIC);
    hello[4..].copy_from_slice(hub.as_bytes());
    stream.write_all(&hello).await?;
    stream.flush().await?;

    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.map_err(closed_on_eof)?;
    if magic != MAGIC {
        return Err(HubError::BadMagic(magic));
    }

    let frame = match param {
        Some(param) => Frame::Data(param),
        None => Frame::Nil,
    };
    write_frame(stream, codec, frame).await?;

    let mut spoke = [0u8; ID_SIZE];
    stream
        .read_exact(&mut spoke)
        .await
        .map_err(|e| match closed_on_eof(e) {
            HubError::Closed => HubError::Refused(hub),
            other => other,
        })?;
    Ok(Id::from_array(spoke))
}

/// Server side, first step: check the client's magic.
///
/// A peer that fails this gets no reply at all.
pub async fn read_magic<S>(stream: &mut S) -> Result<(), HubError>
where
    S: AsyncRead + Unpin,
{
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.map_err(closed_on_eof)?;
    if magic != MAGIC {
        return Err(HubError::BadMagic(magic));
    }
    Ok(())
}

/// Server side, second step: answer the magic and read the hub id and join
/// parameter.
///
/// Keepalives before the parameter are skipped; a leave frame ends the
/// handshake.
pub async fn server_handshake<S>(
    stream: &mut S,
    codec: &FrameCodec,
) -> Result<(HubId, Bytes), HubError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&MAGIC).await?;
    stream.flush().await?;

    let mut hub = [0u8; ID_SIZE];
    stream.read_exact(&mut hub).await.map_err(closed_on_eof)?;
    let hub = Id::from_array(hub);

    loop {
        match codec.read_frame(stream).await {
            Ok(Frame::Data(param)) => return Ok((hub, param)),
            Ok(Frame::Nil) => return Ok((hub, Bytes::new())),
            Ok(Frame::Ignore) => continue,
            Ok(Frame::Leave) => return Err(HubError::Closed),
            Err(FrameError::Io(e)) => return Err(closed_on_eof(e)),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Server side, last step: tell the client its spoke id.
pub async fn write_spoke_id<S>(stream: &mut S, spoke: SpokeId) -> Result<(), HubError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(spoke.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
