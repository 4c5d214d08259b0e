//! port-forwarder - config-driven TCP port forwarding
//!
//! Every configured transport gets a local listener. Each accepted connection
//! is relayed to the transport's remote address through an [`overlay::Overlay`]
//! (plain TCP, or `direct-tcpip` channels over an SSH gateway).

pub mod config;
pub mod forwarding;
pub mod overlay;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// Reads `RUST_LOG`, falls back to `info`. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
