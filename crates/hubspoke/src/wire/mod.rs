//! Wire protocol: frame codec and connection handshake.
//!
//! A connection starts with the handshake in [`handshake`], then carries
//! [`Frame`]s in both directions: messages from hub to spoke, feedback from
//! spoke to hub, keepalives and a final leave either way.

pub mod frame;
pub mod handshake;

pub use frame::{header_width, Frame, FrameCodec, MAX_PAYLOAD_LEN};
pub use handshake::MAGIC;
