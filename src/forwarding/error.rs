//! Forwarding error types
//!
//! Only [`ListenError`] ever leaves a transport's worker. Dial and copy
//! errors stay inside the connection that produced them.

use std::time::Duration;

use thiserror::Error;

use crate::overlay::OverlayError;

/// The local listener could not be created; fatal to one transport
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("Port already in use: {0}. Another application may be using this port.")]
    AddrInUse(String),

    #[error("Permission denied binding to {0}. Ports below 1024 require elevated privileges.")]
    PermissionDenied(String),

    #[error("Address not available: {0}. The specified address is not valid on this system.")]
    AddrNotAvailable(String),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ListenError {
    pub(crate) fn from_bind(addr: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::AddrInUse => ListenError::AddrInUse(addr.to_string()),
            std::io::ErrorKind::PermissionDenied => ListenError::PermissionDenied(addr.to_string()),
            std::io::ErrorKind::AddrNotAvailable => ListenError::AddrNotAvailable(addr.to_string()),
            _ => ListenError::Bind {
                addr: addr.to_string(),
                source: err,
            },
        }
    }
}

/// Remote leg could not be opened
#[derive(Error, Debug)]
pub enum DialError {
    #[error("Dial {address} timed out after {}s", .timeout.as_secs_f32())]
    Timeout { address: String, timeout: Duration },

    #[error("Dial {address} failed: {source}")]
    Overlay {
        address: String,
        #[source]
        source: OverlayError,
    },
}

/// One copy direction ended abnormally
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("short write: destination accepted {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    #[error("write error: {0}")]
    Write(#[source] std::io::Error),
}
