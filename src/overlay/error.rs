//! Overlay error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Overlay not started")]
    NotStarted,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Disconnected")]
    Disconnected,
}

impl From<russh::Error> for OverlayError {
    fn from(err: russh::Error) -> Self {
        OverlayError::ConnectionFailed(err.to_string())
    }
}

impl From<russh::keys::Error> for OverlayError {
    fn from(err: russh::keys::Error) -> Self {
        OverlayError::KeyError(err.to_string())
    }
}
