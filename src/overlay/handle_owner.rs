//! Handle Owner Task
//!
//! Exactly one task owns the gateway `Handle<GatewayHandler>`. Connection
//! handlers reach it through a cloneable [`HandleController`] that sends
//! commands over an mpsc channel, so no lock is ever held across `.await`.
//!
//! Each channel open runs as its own task: the gateway only confirms a
//! `direct-tcpip` open once it has reached the target, and one unreachable
//! target must not hold up opens for every other transport.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::error::OverlayError;
use super::ssh::GatewayHandler;

/// Commands sent to the Handle Owner Task
pub enum HandleCommand<C = Channel<Msg>> {
    /// Open a direct-tcpip channel to `host:port`
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<C, russh::Error>>,
    },

    /// Disconnect from the gateway
    Disconnect,
}

/// Session operations the owner task performs
#[async_trait]
pub(crate) trait ChannelOpener: Send + Sync + 'static {
    type Channel: Send + 'static;

    async fn open(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Self::Channel, russh::Error>;

    /// Close a channel nobody is waiting for anymore
    async fn release(&self, channel: Self::Channel);

    async fn shutdown(&self);
}

#[async_trait]
impl ChannelOpener for Handle<GatewayHandler> {
    type Channel = Channel<Msg>;

    async fn open(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Self::Channel, russh::Error> {
        self.channel_open_direct_tcpip(host, port, originator_host, originator_port)
            .await
    }

    async fn release(&self, channel: Self::Channel) {
        // A bare Channel is not closed on drop
        if let Err(e) = channel.close().await {
            debug!("Closing abandoned channel failed: {}", e);
        }
    }

    async fn shutdown(&self) {
        let _ = Handle::disconnect(
            self,
            russh::Disconnect::ByApplication,
            "forwarder closed",
            "en",
        )
        .await;
    }
}

/// Controller for sending commands to the Handle Owner Task
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl HandleController {
    /// Wrap a command sender (tests drive the receiving side themselves)
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Open a direct-tcpip channel
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, OverlayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            })
            .await
            .map_err(|_| OverlayError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| OverlayError::Disconnected)?
            .map_err(|e| OverlayError::ChannelError(e.to_string()))
    }

    /// Ask the owner task to disconnect
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Whether the owner task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task, taking ownership of `handle`
pub fn spawn_handle_owner_task(handle: Handle<GatewayHandler>, identity: String) -> HandleController {
    let (cmd_tx, cmd_rx) = mpsc::channel::<HandleCommand>(64);
    tokio::spawn(run_handle_owner(Arc::new(handle), cmd_rx, identity));
    HandleController { cmd_tx }
}

/// Command loop of the owner task
pub(crate) async fn run_handle_owner<O: ChannelOpener>(
    opener: Arc<O>,
    mut cmd_rx: mpsc::Receiver<HandleCommand<O::Channel>>,
    identity: String,
) {
    info!("Gateway handle owner started for {}", identity);
    let mut opens = JoinSet::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(HandleCommand::ChannelOpenDirectTcpip {
                    host,
                    port,
                    originator_host,
                    originator_port,
                    reply_tx,
                }) => {
                    let opener = opener.clone();
                    opens.spawn(async move {
                        debug!("Opening direct-tcpip to {}:{}", host, port);
                        let result = opener
                            .open(&host, port, &originator_host, originator_port)
                            .await;
                        if let Err(Ok(channel)) = reply_tx.send(result) {
                            warn!(
                                "Caller dropped before direct-tcpip to {}:{} opened, closing channel",
                                host, port
                            );
                            opener.release(channel).await;
                        }
                    });
                }
                Some(HandleCommand::Disconnect) => {
                    info!("Disconnect requested for {}", identity);
                    break;
                }
                None => break,
            },

            // Reap finished opens
            Some(_) = opens.join_next(), if !opens.is_empty() => {}
        }
    }

    drain_pending_commands(&mut cmd_rx);
    opens.shutdown().await;

    opener.shutdown().await;
    info!("Gateway handle owner terminated for {}", identity);
}

/// Fail every queued command with a disconnect
fn drain_pending_commands<C>(cmd_rx: &mut mpsc::Receiver<HandleCommand<C>>) {
    cmd_rx.close();
    while let Ok(cmd) = cmd_rx.try_recv() {
        if let HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } = cmd {
            let _ = reply_tx.send(Err(russh::Error::Disconnect));
        }
    }
}
