//! Per-connection handling
//!
//! `Accepted -> Dialing -> (Connected | DialFailed) -> Piping -> Closed`
//!
//! The handler owns the accepted stream from the moment it is called and the
//! remote stream from the moment the dial succeeds. Both are shut down and
//! dropped before `handle` returns, on every path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::error::DialError;
use super::pipe::{Pipe, PipeResult};
use crate::overlay::{Connection, Overlay, OverlayStream};

/// Handler lifecycle, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Dialing,
    Connected,
    DialFailed,
    Piping,
    Closed,
}

/// How a handled connection ended
#[derive(Debug)]
pub enum HandleOutcome {
    /// Remote never opened; no bytes were forwarded
    DialFailed(DialError),
    /// Relay ran and both legs are closed
    Closed(PipeResult),
}

/// Relays accepted connections of one transport to its remote address
#[derive(Clone)]
pub struct ConnectionHandler {
    remote_address: Arc<str>,
    overlay: Arc<dyn Overlay>,
    dial_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        remote_address: impl Into<Arc<str>>,
        overlay: Arc<dyn Overlay>,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            remote_address: remote_address.into(),
            overlay,
            dial_timeout,
        }
    }

    /// Handle one accepted connection to completion
    pub async fn handle<L>(&self, mut local: L, peer: SocketAddr) -> HandleOutcome
    where
        L: Connection,
    {
        let remote_address = &*self.remote_address;
        self.transition(peer, ConnectionState::Accepted);
        info!("Connection from {}, connecting {}", peer, remote_address);

        self.transition(peer, ConnectionState::Dialing);
        let mut remote = match self.dial().await {
            Ok(remote) => remote,
            Err(e) => {
                self.transition(peer, ConnectionState::DialFailed);
                warn!("Connect remote {} for {} failed: {}", remote_address, peer, e);
                close_leg(&mut local, "local").await;
                drop(local);
                return HandleOutcome::DialFailed(e);
            }
        };
        self.transition(peer, ConnectionState::Connected);

        info!("Open pipe: {} <== FWD ==> {}", peer, remote_address);
        self.transition(peer, ConnectionState::Piping);
        let result = Pipe::new(&peer.to_string(), remote_address)
            .forward(&mut local, &mut remote)
            .await;

        close_leg(&mut remote, "remote").await;
        drop(remote);
        close_leg(&mut local, "local").await;
        drop(local);
        self.transition(peer, ConnectionState::Closed);

        match &result.terminal_error {
            Some(e) => info!(
                "Close pipe: {} <== FWD ==> {} ({} bytes out, {} bytes in, {:?} ended with error: {})",
                peer, remote_address, result.bytes_forward, result.bytes_backward, result.finished, e
            ),
            None => info!(
                "Close pipe: {} <== FWD ==> {} ({} bytes out, {} bytes in)",
                peer, remote_address, result.bytes_forward, result.bytes_backward
            ),
        }

        HandleOutcome::Closed(result)
    }

    async fn dial(&self) -> Result<OverlayStream, DialError> {
        let address = &*self.remote_address;
        match tokio::time::timeout(self.dial_timeout, self.overlay.dial(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(DialError::Overlay {
                address: address.to_string(),
                source,
            }),
            Err(_) => Err(DialError::Timeout {
                address: address.to_string(),
                timeout: self.dial_timeout,
            }),
        }
    }

    fn transition(&self, peer: SocketAddr, state: ConnectionState) {
        debug!("[{} -> {}] {:?}", peer, self.remote_address, state);
    }
}

/// Shut a leg down; the caller drops it right after
async fn close_leg<S>(stream: &mut S, leg: &str)
where
    S: AsyncWrite + Unpin + ?Sized,
{
    if let Err(e) = stream.shutdown().await {
        // Peer already gone is the normal case after a pipe ends
        debug!("Shutdown of {} leg: {}", leg, e);
    }
}
