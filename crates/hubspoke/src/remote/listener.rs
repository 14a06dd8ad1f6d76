use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error_span, info, warn, Instrument};

use super::serve_connection;
use crate::config::RemoteConfig;
use crate::error::HubError;
use crate::manager::ManagerHandle;

/// Accepts TCP connections and serves each one as a remote spoke.
///
/// Stops accepting on [`Listener::close`] or drop. Connections already
/// being served are unaffected.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Listener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        manager: ManagerHandle,
        config: RemoteConfig,
    ) -> Result<Self, HubError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        info!(%local_addr, "listening");
        let task = tokio::spawn(accept_loop(listener, manager, config, cancel.clone()));
        Ok(Self {
            local_addr,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    manager: ManagerHandle,
    config: RemoteConfig,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed, listener stopping");
                break;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }

        let manager = manager.clone();
        let config = config.clone();
        tokio::spawn(
            async move {
                match serve_connection(stream, manager, config).await {
                    Ok(()) => debug!("connection closed"),
                    Err(e) => debug!(error = %e, "connection ended with error"),
                }
            }
            .instrument(error_span!("conn", %peer)),
        );
    }
    debug!("accept loop stopped");
}
