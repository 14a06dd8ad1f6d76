//! Spokes: subscribers attached to exactly one hub.
//!
//! Local and remote spokes share one contract (`receive`, `feedback`,
//! `leave`) and differ only in what backs them: an in-process queue fed by
//! the manager, or a socket whose reader task feeds a local queue.
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::id::{HubId, SpokeId};
use crate::manager::{Command, ManagerHandle};
use crate::messenger::Messenger;
use crate::remote::RemoteSpoke;

/// A subscriber to one hub.
#[derive(Debug)]
pub enum Spoke {
    /// Joined through a [`Hub`](crate::Hub) handle in this process.
    Local(LocalSpoke),
    /// Joined over a TCP connection with [`dial`](crate::remote::dial).
    Remote(RemoteSpoke),
}

impl Spoke {
    pub fn id(&self) -> SpokeId {
        match self {
            Spoke::Local(spoke) => spoke.id(),
            Spoke::Remote(spoke) => spoke.id(),
        }
    }

    /// Identity of the hub this spoke is attached to.
    pub fn hub_id(&self) -> HubId {
        match self {
            Spoke::Local(spoke) => spoke.hub_id(),
            Spoke::Remote(spoke) => spoke.hub_id(),
        }
    }

    /// Wait for the next message from the hub.
    ///
    /// `None` means the spoke is finished: it left, was rejected, its hub
    /// stopped, or its connection dropped. Messages already queued are
    /// delivered before `None`.
    pub async fn receive(&self) -> Option<Bytes> {
        match self {
            Spoke::Local(spoke) => spoke.receive().await,
            Spoke::Remote(spoke) => spoke.receive().await,
        }
    }

    /// Send data back to the hub's feedback callback.
    pub fn feedback(&self, data: impl Into<Bytes>) {
        match self {
            Spoke::Local(spoke) => spoke.feedback(data.into()),
            Spoke::Remote(spoke) => spoke.feedback(data.into()),
        }
    }

    /// Leave the hub. Idempotent.
    pub fn leave(&self) {
        match self {
            Spoke::Local(spoke) => spoke.leave(),
            Spoke::Remote(spoke) => spoke.leave(),
        }
    }

    /// Messages as a stream, ending when `receive` would return `None`.
    pub fn into_stream(self) -> BoxStream<'static, Bytes> {
        futures_util::stream::unfold(self, |spoke| async move {
            let message = spoke.receive().await?;
            Some((message, spoke))
        })
        .boxed()
    }

    /// Messages as one continuous byte stream.
    ///
    /// Message boundaries are lost; EOF is reported once the spoke is
    /// finished.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin + 'static {
        StreamReader::new(self.into_stream().map(Ok::<_, std::io::Error>))
    }
}

// ── LocalSpoke ───────────────────────────────────────────────────────

/// A spoke backed by an in-process messenger.
#[derive(Debug, Clone)]
pub struct LocalSpoke {
    id: SpokeId,
    hub: HubId,
    messenger: Arc<Messenger>,
    manager: ManagerHandle,
}

impl LocalSpoke {
    pub(crate) fn new(
        id: SpokeId,
        hub: HubId,
        messenger: Arc<Messenger>,
        manager: ManagerHandle,
    ) -> Self {
        Self {
            id,
            hub,
            messenger,
            manager,
        }
    }

    pub fn id(&self) -> SpokeId {
        self.id
    }

    pub fn hub_id(&self) -> HubId {
        self.hub
    }

    pub async fn receive(&self) -> Option<Bytes> {
        self.messenger.receive().await
    }

    pub fn feedback(&self, data: Bytes) {
        self.manager.submit(Command::Feedback {
            hub: self.hub,
            spoke: self.id,
            data,
        });
    }

    pub fn leave(&self) {
        self.manager.submit(Command::Leave {
            hub: self.hub,
            spoke: self.id,
        });
    }
}
