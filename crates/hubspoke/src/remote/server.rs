use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error_span, trace, warn, Instrument};

use super::keepalive_ticker;
use crate::config::RemoteConfig;
use crate::error::HubError;
use crate::manager::ManagerHandle;
use crate::spoke::LocalSpoke;
use crate::wire::handshake::{read_magic, server_handshake, write_frame, write_spoke_id};
use crate::wire::{Frame, FrameCodec};

async fn within<T>(
    deadline: Instant,
    step: &'static str,
    fut: impl Future<Output = Result<T, HubError>>,
) -> Result<T, HubError> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| HubError::Timeout(step))?
}

/// Serve one accepted connection until either side leaves.
///
/// The peer joins the hub it names in the handshake as a local spoke.
/// Messages for that spoke go out as frames; data frames coming in become
/// feedback. The reply to the handshake waits until the join is resolved,
/// so a join that lands in a lock window holds the handshake open until
/// the window closes.
///
/// A peer with the wrong magic gets no reply. A peer naming an unknown hub
/// or refused by the hub gets a leave frame and a closed connection. Either
/// way the error is returned.
pub async fn serve_connection<S>(
    mut stream: S,
    manager: ManagerHandle,
    config: RemoteConfig,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let deadline = Instant::now() + config.handshake_timeout;
    within(deadline, "handshake", read_magic(&mut stream)).await?;

    let mut codec = config.codec();
    let spoke = match admit(&mut stream, &manager, &codec, deadline).await {
        Ok(spoke) => spoke,
        Err(e) => {
            debug!(error = %e, "refusing connection");
            let _ = write_frame(&mut stream, &mut codec, Frame::Leave).await;
            let _ = stream.shutdown().await;
            return Err(e);
        }
    };
    debug!(hub = %spoke.hub_id(), spoke = %spoke.id(), "remote spoke joined");

    let (read_half, write_half) = tokio::io::split(stream);
    let mut frames_in = FramedRead::new(read_half, codec);
    let mut frames_out = FramedWrite::new(write_half, codec);
    let cancel = CancellationToken::new();

    let send_fut =
        send_loop(&spoke, &mut frames_out, &config, &cancel).instrument(error_span!("send"));
    let recv_fut = recv_loop(&spoke, &mut frames_in, &cancel).instrument(error_span!("recv"));
    let (send_res, ()) = tokio::join!(send_fut, recv_fut);

    spoke.leave();
    debug!(spoke = %spoke.id(), "remote spoke finished");
    send_res
}

/// Finish the handshake and get the join resolved.
async fn admit<S>(
    stream: &mut S,
    manager: &ManagerHandle,
    codec: &FrameCodec,
    deadline: Instant,
) -> Result<LocalSpoke, HubError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (hub_id, param) = within(deadline, "handshake", server_handshake(stream, codec)).await?;
    let hub = manager
        .find_hub(hub_id)
        .await
        .ok_or(HubError::HubNotFound(hub_id))?;

    let (outcome_tx, outcome) = oneshot::channel();
    let spoke = hub.join_local(param, Some(outcome_tx));
    let joined = tokio::time::timeout_at(deadline, outcome).await;
    match joined {
        Ok(Ok(true)) => {}
        Ok(_) => return Err(HubError::JoinRejected(hub_id)),
        Err(_) => {
            spoke.leave();
            return Err(HubError::Timeout("join"));
        }
    }

    if let Err(e) = within(deadline, "handshake", write_spoke_id(stream, spoke.id())).await {
        spoke.leave();
        return Err(e);
    }
    Ok(spoke)
}

/// Spoke messages out to the peer, with keepalives in the gaps.
async fn send_loop<W>(
    spoke: &LocalSpoke,
    frames: &mut FramedWrite<WriteHalf<W>, FrameCodec>,
    config: &RemoteConfig,
    cancel: &CancellationToken,
) -> Result<(), HubError>
where
    W: AsyncWrite,
{
    let mut ticker = keepalive_ticker(config.keepalive_interval);
    let result: Result<(), HubError> = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = spoke.receive() => {
                    let Some(message) = message else {
                        return Ok(());
                    };
                    frames.send(Frame::Data(message)).await?;
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    trace!("keepalive");
                    frames.send(Frame::Ignore).await?;
                }
            }
        }
    }
    .await;

    if result.is_ok() {
        let _ = frames.send(Frame::Leave).await;
    }
    let _ = frames.close().await;
    cancel.cancel();
    result
}

/// Peer frames in as feedback, until the peer leaves or the stream fails.
async fn recv_loop<R>(
    spoke: &LocalSpoke,
    frames: &mut FramedRead<ReadHalf<R>, FrameCodec>,
    cancel: &CancellationToken,
) where
    R: AsyncRead,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(Frame::Data(data))) => spoke.feedback(data),
            Some(Ok(Frame::Ignore | Frame::Nil)) => {}
            Some(Ok(Frame::Leave)) => {
                debug!("peer left");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "read failed");
                break;
            }
            None => {
                debug!("peer closed");
                break;
            }
        }
    }
    cancel.cancel();
}
