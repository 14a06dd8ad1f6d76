use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error_span, trace, warn, Instrument};

use super::keepalive_ticker;
use crate::config::RemoteConfig;
use crate::error::HubError;
use crate::id::{HubId, SpokeId};
use crate::messenger::Messenger;
use crate::spoke::Spoke;
use crate::wire::handshake::client_handshake;
use crate::wire::{Frame, FrameCodec};

/// Connect to a hub served at `addr` and join it.
///
/// `param` is handed to the hub's join callback; `None` sends a nil
/// parameter, which the hub sees as empty. Fails with
/// [`HubError::Refused`] when the server answers the handshake but does
/// not admit the spoke.
pub async fn dial(
    addr: impl ToSocketAddrs,
    hub: HubId,
    param: Option<Bytes>,
    config: &RemoteConfig,
) -> Result<Spoke, HubError> {
    let stream = tokio::time::timeout(config.handshake_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| HubError::Timeout("connect"))??;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }
    attach(stream, hub, param, config).await
}

/// Join a hub over an already connected stream.
pub async fn attach<S>(
    mut stream: S,
    hub: HubId,
    param: Option<Bytes>,
    config: &RemoteConfig,
) -> Result<Spoke, HubError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut codec = config.codec();
    let id = tokio::time::timeout(
        config.handshake_timeout,
        client_handshake(&mut stream, hub, param, &mut codec),
    )
    .await
    .map_err(|_| HubError::Timeout("handshake"))??;
    debug!(%hub, spoke = %id, "joined remote hub");
    Ok(Spoke::Remote(RemoteSpoke::start(id, hub, stream, codec, config)))
}

#[derive(Debug)]
enum Outbound {
    Feedback(Bytes),
    Leave,
}

/// A spoke whose hub lives on the other end of a connection.
///
/// A reader task queues incoming messages locally; a writer task sends
/// feedback and keepalives. Dropping the spoke leaves the hub.
#[derive(Debug)]
pub struct RemoteSpoke {
    id: SpokeId,
    hub: HubId,
    inbound: Arc<Messenger>,
    outbound: mpsc::UnboundedSender<Outbound>,
    left: AtomicBool,
}

impl RemoteSpoke {
    fn start<S>(
        id: SpokeId,
        hub: HubId,
        stream: S,
        codec: FrameCodec,
        config: &RemoteConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let inbound = Arc::new(Messenger::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let span = error_span!("remote", spoke = %id);

        tokio::spawn(
            recv_loop(FramedRead::new(read_half, codec), inbound.clone(), cancel.clone())
                .instrument(error_span!(parent: &span, "recv")),
        );
        tokio::spawn(
            send_loop(
                FramedWrite::new(write_half, codec),
                outbound_rx,
                config.clone(),
                cancel,
            )
            .instrument(error_span!(parent: &span, "send")),
        );

        Self {
            id,
            hub,
            inbound,
            outbound,
            left: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SpokeId {
        self.id
    }

    pub fn hub_id(&self) -> HubId {
        self.hub
    }

    /// Next message from the hub. `None` once the spoke left or the
    /// connection ended; messages received before the connection ended
    /// are delivered first.
    pub async fn receive(&self) -> Option<Bytes> {
        if self.left.load(Ordering::Acquire) {
            return None;
        }
        self.inbound.receive().await
    }

    pub fn feedback(&self, data: Bytes) {
        if self.left.load(Ordering::Acquire) {
            return;
        }
        let _ = self.outbound.send(Outbound::Feedback(data));
    }

    /// Send a leave frame (after any queued feedback) and close. Idempotent.
    pub fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Outbound::Leave);
        self.inbound.close();
    }
}

async fn recv_loop<S>(
    mut frames: FramedRead<ReadHalf<S>, FrameCodec>,
    inbound: Arc<Messenger>,
    cancel: CancellationToken,
) where
    S: AsyncRead,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(Frame::Data(message))) => inbound.send(message),
            Some(Ok(Frame::Ignore | Frame::Nil)) => {}
            Some(Ok(Frame::Leave)) => {
                debug!("hub closed the spoke");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "read failed");
                break;
            }
            None => {
                debug!("connection closed");
                break;
            }
        }
    }
    inbound.close();
    cancel.cancel();
}

async fn send_loop<S>(
    mut frames: FramedWrite<WriteHalf<S>, FrameCodec>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    config: RemoteConfig,
    cancel: CancellationToken,
) where
    S: AsyncWrite,
{
    let mut ticker = keepalive_ticker(config.keepalive_interval);
    let result: Result<(), HubError> = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = outbound.recv() => match next {
                    Some(Outbound::Feedback(data)) => {
                        frames.send(Frame::Data(data)).await?;
                        ticker.reset();
                    }
                    Some(Outbound::Leave) | None => return Ok(()),
                },
                _ = ticker.tick() => {
                    trace!("keepalive");
                    frames.send(Frame::Ignore).await?;
                }
            }
        }
    }
    .await;

    match result {
        Ok(()) => {
            let _ = frames.send(Frame::Leave).await;
        }
        Err(e) => debug!(error = %e, "write failed"),
    }
    let _ = frames.close().await;
    cancel.cancel();
}
