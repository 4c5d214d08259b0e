//! Plain TCP overlay

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{Overlay, OverlayError, OverlayStream};

/// Dials remote addresses directly with `TcpStream::connect`
#[derive(Debug, Default, Clone)]
pub struct DirectOverlay;

impl DirectOverlay {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Overlay for DirectOverlay {
    async fn start(&self) -> Result<(), OverlayError> {
        debug!("Direct overlay has no session to start");
        Ok(())
    }

    async fn dial(&self, address: &str) -> Result<OverlayStream, OverlayError> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            OverlayError::ConnectionFailed(format!("connect {}: {}", address, e))
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(Box::new(stream))
    }

    async fn close(&self) -> Result<(), OverlayError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let overlay = DirectOverlay::new();
        overlay.start().await.unwrap();
        let mut stream = overlay.dial(&addr.to_string()).await.unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Bind then drop so the port is very likely closed
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let result = DirectOverlay::new().dial(&addr.to_string()).await;
        assert!(matches!(result, Err(OverlayError::ConnectionFailed(_))));
    }
}
