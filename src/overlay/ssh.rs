//! SSH gateway overlay
//!
//! `start` connects and authenticates to the gateway once; every `dial`
//! afterwards opens a `direct-tcpip` channel through that session and hands
//! the channel back as a byte stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::known_hosts::{HostKeyVerification, KnownHostsStore};
use super::{Overlay, OverlayError, OverlayStream};
use crate::config::{split_host_port, GatewayConfig};

/// Originator reported to the gateway for forwarded channels
const ORIGINATOR_HOST: &str = "127.0.0.1";

/// Overlay backed by one SSH gateway session
pub struct SshOverlay {
    gateway: GatewayConfig,
    /// Node identity, used in logs and as the owner task label
    identity: String,
    /// Password, or key passphrase when `gateway.key_path` is set
    authkey: String,
    ephemeral: bool,
    state_dir: PathBuf,
    connect_timeout: Duration,
    controller: RwLock<Option<HandleController>>,
}

impl SshOverlay {
    pub fn new(
        gateway: GatewayConfig,
        identity: String,
        authkey: String,
        ephemeral: bool,
        state_dir: PathBuf,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            identity,
            authkey,
            ephemeral,
            state_dir,
            connect_timeout,
            controller: RwLock::new(None),
        }
    }

    fn controller(&self) -> Result<HandleController, OverlayError> {
        self.controller
            .read()
            .clone()
            .ok_or(OverlayError::NotStarted)
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<GatewayHandler>,
    ) -> Result<(), OverlayError> {
        let username = &self.gateway.username;

        let result = match &self.gateway.key_path {
            Some(key_path) => {
                let passphrase = (!self.authkey.is_empty()).then_some(self.authkey.as_str());
                let key = russh::keys::load_secret_key(key_path, passphrase)
                    .map_err(|e| OverlayError::KeyError(e.to_string()))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(username, key_with_hash)
                    .await
                    .map_err(|e| OverlayError::AuthenticationFailed(e.to_string()))?
            }
            None => handle
                .authenticate_password(username, &self.authkey)
                .await
                .map_err(|e| OverlayError::AuthenticationFailed(e.to_string()))?,
        };

        if !result.success() {
            return Err(OverlayError::AuthenticationFailed(
                "Authentication rejected by gateway".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Overlay for SshOverlay {
    async fn start(&self) -> Result<(), OverlayError> {
        let known_hosts = Arc::new(KnownHostsStore::open(&self.state_dir, self.ephemeral)?);

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = GatewayHandler::new(
            self.gateway.host.clone(),
            self.gateway.port,
            self.gateway.strict_host_key_checking,
            self.ephemeral,
            known_hosts,
        );

        info!(
            "Connecting to gateway {}:{} as {}",
            self.gateway.host, self.gateway.port, self.identity
        );

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(
                Arc::new(ssh_config),
                (self.gateway.host.as_str(), self.gateway.port),
                handler,
            ),
        )
        .await
        .map_err(|_| OverlayError::Timeout("Gateway connection timed out".to_string()))??;

        self.authenticate(&mut handle).await?;
        info!("Gateway session established for {}", self.identity);

        let controller = spawn_handle_owner_task(handle, self.identity.clone());
        let previous = self.controller.write().replace(controller);
        if let Some(previous) = previous {
            warn!("Gateway overlay restarted; dropping previous session");
            tokio::spawn(async move { previous.disconnect().await });
        }
        Ok(())
    }

    async fn dial(&self, address: &str) -> Result<OverlayStream, OverlayError> {
        let (host, port) = split_host_port(address)
            .filter(|(host, _)| !host.is_empty())
            .ok_or_else(|| OverlayError::InvalidAddress(address.to_string()))?;

        let controller = self.controller()?;
        let channel = controller
            .open_direct_tcpip(host, port as u32, ORIGINATOR_HOST, 0)
            .await?;

        debug!("Opened gateway channel to {}", address);
        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) -> Result<(), OverlayError> {
        let controller = self.controller.write().take();
        if let Some(controller) = controller {
            controller.disconnect().await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

/// russh callbacks for the gateway connection
///
/// Only host key verification is needed; the forwarder never accepts
/// server-initiated channels.
pub struct GatewayHandler {
    host: String,
    port: u16,
    /// Reject host keys not already known
    strict: bool,
    /// Trust unknown keys for this process only
    ephemeral: bool,
    known_hosts: Arc<KnownHostsStore>,
}

impl GatewayHandler {
    pub fn new(
        host: String,
        port: u16,
        strict: bool,
        ephemeral: bool,
        known_hosts: Arc<KnownHostsStore>,
    ) -> Self {
        Self {
            host,
            port,
            strict,
            ephemeral,
            known_hosts,
        }
    }
}

impl client::Handler for GatewayHandler {
    type Error = OverlayError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.known_hosts.verify(&self.host, self.port, server_public_key) {
            HostKeyVerification::Verified => {
                debug!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => {
                if self.strict {
                    warn!(
                        "Unknown host key for {}:{} ({}), strict mode rejects it",
                        self.host, self.port, fingerprint
                    );
                    return Err(OverlayError::ConnectionFailed(format!(
                        "Host key verification failed: unknown host {}:{}. Fingerprint: {}",
                        self.host, self.port, fingerprint
                    )));
                }

                if self.ephemeral {
                    info!(
                        "Trusting host key for {}:{} for this run only ({})",
                        self.host, self.port, fingerprint
                    );
                } else {
                    info!(
                        "New gateway {}:{}, adding to known_hosts ({})",
                        self.host, self.port, fingerprint
                    );
                }
                if let Err(e) = self.known_hosts.add_host(&self.host, self.port, server_public_key) {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                );
                Err(OverlayError::ConnectionFailed(format!(
                    "Host key for {}:{} has changed (expected {}, got {})",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;
    use tempfile::tempdir;

    const ED25519: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti user@example.com";

    fn gateway() -> GatewayConfig {
        GatewayConfig {
            host: "bastion".into(),
            port: 2222,
            username: "relay".into(),
            key_path: None,
            strict_host_key_checking: false,
        }
    }

    fn overlay(dir: PathBuf) -> SshOverlay {
        SshOverlay::new(
            gateway(),
            "edge-1".into(),
            "secret".into(),
            false,
            dir,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_dial_before_start() {
        let temp = tempdir().unwrap();
        let result = overlay(temp.path().to_path_buf()).dial("svc:9000").await;
        assert!(matches!(result, Err(OverlayError::NotStarted)));
    }

    #[tokio::test]
    async fn test_dial_invalid_address() {
        let temp = tempdir().unwrap();
        let overlay = overlay(temp.path().to_path_buf());
        assert!(matches!(
            overlay.dial("svc").await,
            Err(OverlayError::InvalidAddress(_))
        ));
        assert!(matches!(
            overlay.dial(":9000").await,
            Err(OverlayError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_close_without_start() {
        let temp = tempdir().unwrap();
        assert!(overlay(temp.path().to_path_buf()).close().await.is_ok());
    }

    #[tokio::test]
    async fn test_strict_rejects_unknown_host() {
        let temp = tempdir().unwrap();
        let store = Arc::new(KnownHostsStore::open(temp.path(), false).unwrap());
        let mut handler = GatewayHandler::new("bastion".into(), 22, true, false, store);

        let key = PublicKey::from_openssh(ED25519).unwrap();
        assert!(handler.check_server_key(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_non_strict_trusts_and_persists() {
        let temp = tempdir().unwrap();
        let store = Arc::new(KnownHostsStore::open(temp.path(), false).unwrap());
        let mut handler = GatewayHandler::new("bastion".into(), 22, false, false, store.clone());

        let key = PublicKey::from_openssh(ED25519).unwrap();
        assert!(handler.check_server_key(&key).await.unwrap());
        assert!(store.path().exists());
        assert_eq!(store.verify("bastion", 22, &key), HostKeyVerification::Verified);
    }

    #[tokio::test]
    async fn test_ephemeral_trusts_without_persisting() {
        let temp = tempdir().unwrap();
        let store = Arc::new(KnownHostsStore::open(temp.path(), true).unwrap());
        let mut handler = GatewayHandler::new("bastion".into(), 22, false, true, store.clone());

        let key = PublicKey::from_openssh(ED25519).unwrap();
        assert!(handler.check_server_key(&key).await.unwrap());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_start_times_out_on_silent_gateway() {
        // Accepts TCP but never speaks SSH
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let temp = tempdir().unwrap();
        let mut gateway = gateway();
        gateway.host = addr.ip().to_string();
        gateway.port = addr.port();
        let overlay = SshOverlay::new(
            gateway,
            "edge-1".into(),
            "secret".into(),
            true,
            temp.path().to_path_buf(),
            Duration::from_millis(200),
        );

        assert!(matches!(overlay.start().await, Err(OverlayError::Timeout(_))));
    }
}
