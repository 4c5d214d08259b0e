//! Known hosts store for the SSH gateway
//!
//! One file per state directory (`<dir>/known_hosts`), OpenSSH line format:
//! `host keytype base64key`, with `[host]:port` for non-default ports.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::OverlayError;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches the stored entry
    Verified,
    /// Host has no stored key of this type
    Unknown { fingerprint: String },
    /// Stored key of the same type differs
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

pub struct KnownHostsStore {
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
    /// Keys added at runtime stay in memory only
    ephemeral: bool,
}

impl KnownHostsStore {
    /// Open the store in `dir`, loading existing entries
    pub fn open(dir: &Path, ephemeral: bool) -> Result<Self, OverlayError> {
        let path = dir.join("known_hosts");
        let hosts = Self::load(&path)?;
        debug!("Known hosts {} ({} hosts)", path.display(), hosts.len());

        Ok(Self {
            hosts: RwLock::new(hosts),
            path,
            ephemeral,
        })
    }

    fn load(path: &Path) -> Result<HashMap<String, Vec<HostKeyEntry>>, OverlayError> {
        let mut hosts: HashMap<String, Vec<HostKeyEntry>> = HashMap::new();

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(hosts),
            Err(e) => return Err(OverlayError::IoError(e)),
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(names), Some(key_type), Some(key_data)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            for name in names.split(',') {
                hosts.entry(name.to_lowercase()).or_default().push(HostKeyEntry {
                    key_type: key_type.to_string(),
                    key_data: key_data.to_string(),
                });
            }
        }

        Ok(hosts)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA256 fingerprint in OpenSSH notation
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let hash = Sha256::digest(bytes);
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let actual_b64 = BASE64.encode(key.public_key_bytes());
        let actual_type = key.algorithm().as_str().to_string();
        let fingerprint = Self::fingerprint(key);

        let hosts = self.hosts.read();
        let Some(entries) = hosts.get(&lookup_key) else {
            return HostKeyVerification::Unknown { fingerprint };
        };

        match entries.iter().find(|e| e.key_type == actual_type) {
            Some(entry) if entry.key_data == actual_b64 => HostKeyVerification::Verified,
            Some(entry) => HostKeyVerification::Changed {
                expected_fingerprint: BASE64
                    .decode(&entry.key_data)
                    .map(|bytes| Self::fingerprint_bytes(&bytes))
                    .unwrap_or_else(|_| "unknown".to_string()),
                actual_fingerprint: fingerprint,
            },
            None => HostKeyVerification::Unknown { fingerprint },
        }
    }

    /// Trust `key` for `host:port`; written to disk unless ephemeral
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), OverlayError> {
        let lookup_key = Self::make_key(host, port);
        let entry = HostKeyEntry {
            key_type: key.algorithm().as_str().to_string(),
            key_data: BASE64.encode(key.public_key_bytes()),
        };

        if !self.ephemeral {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writeln!(file, "{} {} {}", lookup_key, entry.key_type, entry.key_data)?;
            info!("Added host key for {} to {}", lookup_key, self.path.display());
        }

        self.hosts.write().entry(lookup_key).or_default().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ED25519: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti user@example.com";

    fn key() -> PublicKey {
        PublicKey::from_openssh(ED25519).unwrap()
    }

    #[test]
    fn test_make_key() {
        assert_eq!(KnownHostsStore::make_key("GitHub.com", 22), "github.com");
        assert_eq!(KnownHostsStore::make_key("server.com", 2222), "[server.com]:2222");
    }

    #[test]
    fn test_unknown_then_verified_and_persisted() {
        let temp = tempdir().unwrap();
        let store = KnownHostsStore::open(temp.path(), false).unwrap();

        assert!(matches!(
            store.verify("bastion", 22, &key()),
            HostKeyVerification::Unknown { .. }
        ));
        store.add_host("bastion", 22, &key()).unwrap();
        assert_eq!(store.verify("bastion", 22, &key()), HostKeyVerification::Verified);

        // Reopen from disk
        let reopened = KnownHostsStore::open(temp.path(), false).unwrap();
        assert_eq!(reopened.verify("bastion", 22, &key()), HostKeyVerification::Verified);
        // Other port is a different entry
        assert!(matches!(
            reopened.verify("bastion", 2222, &key()),
            HostKeyVerification::Unknown { .. }
        ));
    }

    #[test]
    fn test_ephemeral_does_not_write() {
        let temp = tempdir().unwrap();
        let store = KnownHostsStore::open(temp.path(), true).unwrap();
        store.add_host("bastion", 22, &key()).unwrap();

        assert_eq!(store.verify("bastion", 22, &key()), HostKeyVerification::Verified);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_changed_key() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join("known_hosts"),
            "bastion ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\n",
        )
        .unwrap();
        let store = KnownHostsStore::open(temp.path(), false).unwrap();

        match store.verify("bastion", 22, &key()) {
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                assert!(expected_fingerprint.starts_with("SHA256:"));
                assert_ne!(expected_fingerprint, actual_fingerprint);
            }
            other => panic!("expected Changed, got {:?}", other),
        }
    }
}
