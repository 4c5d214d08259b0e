//! Listener worker for one transport
//!
//! Binds the transport's local address and accepts forever, handing every
//! connection to `on_accept`. Only a bind failure or a shutdown signal ends
//! the loop; accept errors are treated as transient.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::error::ListenError;
use crate::config::TransportSpec;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle of a listener worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    /// Bound; carries the actual address (differs from config when port is 0)
    Listening(SocketAddr),
    Stopped,
}

/// Why a worker's accept loop ended
#[derive(Debug)]
pub enum WorkerExit {
    /// Local address could not be bound
    BindFailed(ListenError),
    /// Shutdown was requested
    Shutdown,
    /// The worker task panicked
    Panicked(String),
}

/// Accept loop for one [`TransportSpec`]
pub struct ListenerWorker {
    spec: TransportSpec,
    state_tx: watch::Sender<ListenerState>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ListenerWorker {
    pub fn new(
        spec: TransportSpec,
        state_tx: watch::Sender<ListenerState>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            spec,
            state_tx,
            shutdown_rx,
        }
    }

    /// Bind and accept until shutdown
    ///
    /// `on_accept` runs on the accept loop itself, so it must hand the
    /// connection off (spawn) and return immediately.
    pub async fn run<F>(mut self, mut on_accept: F) -> WorkerExit
    where
        F: FnMut(TcpStream, SocketAddr),
    {
        let _ = self.state_tx.send(ListenerState::Starting);

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err((addr, e)) => return self.stop(WorkerExit::BindFailed(ListenError::from_bind(&addr, e))),
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                let addr = self.spec.bind_address();
                return self.stop(WorkerExit::BindFailed(ListenError::from_bind(&addr, e)));
            }
        };

        info!(
            "Started forward: {} -> {}",
            local_addr, self.spec.remote_port
        );
        let _ = self.state_tx.send(ListenerState::Listening(local_addr));

        let exit = loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Forward on {} stopped by request", local_addr);
                    break WorkerExit::Shutdown;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }
                            debug!("Accepted connection from {} on {}", peer_addr, local_addr);
                            on_accept(stream, peer_addr);
                        }
                        Err(e) => {
                            warn!("Accept error on {}: {}", local_addr, e);
                            tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        }
                    }
                }
            }
        };

        self.stop(exit)
    }

    /// Bind the local address, retrying an empty host on IPv4 only
    async fn bind(&self) -> Result<TcpListener, (String, io::Error)> {
        let bind_addr = self.spec.bind_address();
        let err = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => e,
        };

        match self.spec.fallback_bind_address() {
            Some(fallback)
                if !matches!(
                    err.kind(),
                    io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
                ) =>
            {
                debug!("Bind {} failed ({}), retrying on {}", bind_addr, err, fallback);
                TcpListener::bind(&fallback).await.map_err(|e| (fallback, e))
            }
            _ => Err((bind_addr, err)),
        }
    }

    fn stop(&self, exit: WorkerExit) -> WorkerExit {
        if let WorkerExit::BindFailed(e) = &exit {
            error!("Listen on {} failed: {}", self.spec.local_port, e);
        }
        info!(
            "Closed forward {} <--> {}",
            self.spec.local_port, self.spec.remote_port
        );
        let _ = self.state_tx.send(ListenerState::Stopped);
        exit
    }
}
