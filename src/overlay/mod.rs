//! Overlay network module
//!
//! The forwarder reaches remote addresses only through [`Overlay`]:
//! `start` once, `dial` per connection, `close` on exit.
//!
//! - [`DirectOverlay`]: plain TCP
//! - [`SshOverlay`]: `direct-tcpip` channels through an SSH gateway

mod direct;
mod error;
mod handle_owner;
pub mod known_hosts;
mod ssh;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ForwarderConfig;

pub use direct::DirectOverlay;
pub use error::OverlayError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
pub use ssh::{GatewayHandler, SshOverlay};

/// Anything that can carry one leg of a relay
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Remote leg returned by [`Overlay::dial`]
pub type OverlayStream = Box<dyn Connection>;

/// Network collaborator used to reach remote addresses
#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    /// Establish the overlay session
    async fn start(&self) -> Result<(), OverlayError>;

    /// Open a stream to `address` (`host:port`)
    ///
    /// Callers bound this with their own timeout; dropping the future
    /// abandons the dial.
    async fn dial(&self, address: &str) -> Result<OverlayStream, OverlayError>;

    /// Tear the session down
    async fn close(&self) -> Result<(), OverlayError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Pick the overlay described by `config`
pub fn from_config(config: &ForwarderConfig) -> Arc<dyn Overlay> {
    match &config.gateway {
        Some(gateway) => Arc::new(SshOverlay::new(
            gateway.clone(),
            config.hostname.clone(),
            config.authkey.clone(),
            config.ephemeral,
            config.state_dir(),
            config.dial_timeout(),
        )),
        None => Arc::new(DirectOverlay::new()),
    }
}
