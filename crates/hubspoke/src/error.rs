use crate::id::{HubId, Id};

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors returned by the broker's fallible operations.
///
/// Membership operations themselves never fail from the caller's point of
/// view: a refused or unknown join shows up as a spoke whose first
/// `receive` returns `None`. These variants cover the remote transport and
/// manager lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("bad handshake magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("hub not found: {0}")]
    HubNotFound(HubId),

    #[error("join rejected by hub {0}")]
    JoinRejected(HubId),

    #[error("hub {0} refused the connection (unknown hub or join rejected)")]
    Refused(HubId),

    #[error("connection closed during handshake")]
    Closed,

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("manager is not running")]
    ManagerStopped,

    #[error("manager aborted: {0}")]
    ManagerPanicked(String),
}

/// Misuse of the lock-window protocol.
///
/// This is a caller bug, not a runtime condition: the manager logs it and
/// aborts rather than continue with undefined membership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("hub {0} is already locked")]
    AlreadyLocked(Id),

    #[error("hub {0} is not locked")]
    NotLocked(Id),
}
