//! Frame codec.
//!
//! The low 3 bits of the first byte are a type tag:
//!
//! ```text
//! 0  empty payload        4  sized, 1 length byte
//! 1  nil (no-op)          5  sized, 2 length bytes
//! 2  leave                6  sized, 3 length bytes
//! 3  ignore (keepalive)   7  sized, 4 length bytes
//! ```
//!
//! For sized frames the tag shares its bytes with the payload length: the
//! first 1–4 bytes, read as a little-endian integer and shifted right by 3,
//! give the length. The payload follows.
//!
//! ```text
//! byte 0    byte 1    byte 2    byte 3
//! LLLLLTTT  LLLLLLLL  LLLLLLLL  LLLLLLLL
//! ```
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Largest payload the 4-byte header can describe.
pub const MAX_PAYLOAD_LEN: usize = 0x1FFF_FFFF;

const TAG_MASK: u8 = 0x07;
const TAG_EMPTY: u8 = 0;
const TAG_NIL: u8 = 1;
const TAG_LEAVE: u8 = 2;
const TAG_IGNORE: u8 = 3;
const TAG_SIZED: u8 = 4;

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Explicit absence of a message. Carries nothing and is skipped.
    Nil,
    /// Graceful end of the connection.
    Leave,
    /// Keepalive, discarded on receipt.
    Ignore,
    /// A message. An empty payload is sent as the 1-byte empty frame.
    Data(Bytes),
}

enum Header {
    /// The first byte is the whole frame.
    Complete(Frame),
    /// A sized frame whose header is this many bytes long.
    Sized(usize),
}

fn parse_tag(first: u8) -> Header {
    match first & TAG_MASK {
        TAG_EMPTY => Header::Complete(Frame::Data(Bytes::new())),
        TAG_NIL => Header::Complete(Frame::Nil),
        TAG_LEAVE => Header::Complete(Frame::Leave),
        TAG_IGNORE => Header::Complete(Frame::Ignore),
        tag => Header::Sized((tag - TAG_SIZED + 1) as usize),
    }
}

fn payload_len(header: &[u8]) -> usize {
    let mut raw = [0u8; 4];
    raw[..header.len()].copy_from_slice(header);
    (u32::from_le_bytes(raw) >> 3) as usize
}

/// Fewest header bytes that can describe a payload of `len` bytes.
pub fn header_width(len: usize) -> Option<usize> {
    match len {
        0..=0x1F => Some(1),
        0x20..=0x1FFF => Some(2),
        0x2000..=0x1F_FFFF => Some(3),
        0x20_0000..=MAX_PAYLOAD_LEN => Some(4),
        _ => None,
    }
}

/// Tokio codec for [`Frame`]s.
///
/// Decoding refuses payloads above `max_frame_size` before buffering them,
/// and encoding refuses to write them.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_PAYLOAD_LEN),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Read exactly one frame straight from a reader, without buffering any
    /// byte past it. Used during the handshake, before framing starts.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Frame, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header[..1]).await?;
        let width = match parse_tag(header[0]) {
            Header::Complete(frame) => return Ok(frame),
            Header::Sized(width) => width,
        };
        reader.read_exact(&mut header[1..width]).await?;
        let len = payload_len(&header[..width]);
        self.check_len(len)?;

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        Ok(Frame::Data(payload.into()))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };
        let width = match parse_tag(first) {
            Header::Complete(frame) => {
                src.advance(1);
                return Ok(Some(frame));
            }
            Header::Sized(width) => width,
        };
        if src.len() < width {
            return Ok(None);
        }

        let len = payload_len(&src[..width]);
        self.check_len(len)?;
        if src.len() < width + len {
            src.reserve(width + len - src.len());
            return Ok(None);
        }

        src.advance(width);
        Ok(Some(Frame::Data(src.split_to(len).freeze())))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload = match frame {
            Frame::Data(payload) if !payload.is_empty() => payload,
            Frame::Data(_) => {
                dst.put_u8(TAG_EMPTY);
                return Ok(());
            }
            Frame::Nil => {
                dst.put_u8(TAG_NIL);
                return Ok(());
            }
            Frame::Leave => {
                dst.put_u8(TAG_LEAVE);
                return Ok(());
            }
            Frame::Ignore => {
                dst.put_u8(TAG_IGNORE);
                return Ok(());
            }
        };

        let len = payload.len();
        self.check_len(len)?;
        let width = header_width(len).ok_or(FrameError::TooLarge {
            size: len,
            max: MAX_PAYLOAD_LEN,
        })?;
        let header = ((len as u32) << 3) | u32::from(TAG_SIZED + width as u8 - 1);

        dst.reserve(width + len);
        dst.put_slice(&header.to_le_bytes()[..width]);
        dst.put_slice(&payload);
        Ok(())
    }
}
