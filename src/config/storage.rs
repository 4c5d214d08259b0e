//! Configuration Storage
//!
//! Reads and validates the JSON config, and writes the `--new` template.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::types::{split_host_port, ForwarderConfig};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config file or path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Load and validate the config at `path`
pub async fn load_config(path: &Path) -> Result<ForwarderConfig, ConfigError> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let config: ForwarderConfig = serde_json::from_str(&contents)?;
    validate(&config)?;

    info!(
        "Config loaded from {}, hostname: {}, {} transport(s)",
        path.display(),
        config.hostname,
        config.transports.len()
    );
    Ok(config)
}

/// Reject configs the forwarder cannot run
pub fn validate(config: &ForwarderConfig) -> Result<(), ConfigError> {
    if config.transports.is_empty() {
        return Err(ConfigError::Invalid("no transports configured".into()));
    }
    if config.dial_timeout_secs == 0 {
        return Err(ConfigError::Invalid("dialTimeoutSecs must be > 0".into()));
    }

    let mut seen = HashSet::new();
    for (i, transport) in config.transports.iter().enumerate() {
        if split_host_port(&transport.local_port).is_none() {
            return Err(ConfigError::Invalid(format!(
                "transport {}: localPort {:?} is not host:port",
                i, transport.local_port
            )));
        }
        match split_host_port(&transport.remote_port) {
            Some((host, _)) if !host.is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "transport {}: remotePort {:?} is not host:port",
                    i, transport.remote_port
                )))
            }
        }
        if !seen.insert(transport.bind_address()) {
            warn!(
                "Local address {} is used by more than one transport; only one can bind",
                transport.local_port
            );
        }
    }

    if let Some(gateway) = &config.gateway {
        if gateway.host.is_empty() || gateway.username.is_empty() {
            return Err(ConfigError::Invalid(
                "gateway needs both host and username".into(),
            ));
        }
    }

    Ok(())
}

/// Write the placeholder config to `path`
///
/// Writes a temp file first, then renames it over the target.
pub async fn write_template(path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(&ForwarderConfig::template())?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).await.map_err(io_err)?;
    file.write_all(json.as_bytes()).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    fs::rename(&temp_path, path).await.map_err(io_err)?;

    info!("Template written to {}", path.display());
    Ok(())
}
