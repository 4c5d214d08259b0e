//! One direction of a relay

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::error::CopyError;

/// Copy buffer size (32 KiB)
pub const COPY_BUFFER_SIZE: usize = 0x8000;

/// Copies bytes from one stream to another until EOF or error
///
/// The byte count lives on the copier rather than in the returned future, so
/// it is still readable when the copy was cancelled mid-flight.
pub struct ByteCopier {
    /// Route label for logs, e.g. "10.0.0.5:51234 -> svc:9000"
    route: String,
    buf: Box<[u8]>,
    written: u64,
}

impl ByteCopier {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            buf: vec![0u8; COPY_BUFFER_SIZE].into_boxed_slice(),
            written: 0,
        }
    }

    /// Bytes delivered to the destination so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Copy until `src` reaches EOF
    ///
    /// Returns the total bytes written. Each chunk read is written whole; if
    /// the destination stops accepting part way through a chunk the copy
    /// aborts with [`CopyError::ShortWrite`].
    pub async fn copy<R, W>(&mut self, src: &mut R, dst: &mut W) -> Result<u64, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            let nr = match src.read(&mut self.buf).await {
                Ok(0) => return Ok(self.written),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CopyError::Read(e)),
            };

            let nw = self.write_chunk(dst, nr).await?;
            if nw != nr {
                return Err(CopyError::ShortWrite {
                    written: nw,
                    expected: nr,
                });
            }
        }
    }

    /// Write `buf[..len]` to `dst`, returning how much was accepted
    async fn write_chunk<W>(&mut self, dst: &mut W, len: usize) -> Result<usize, CopyError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut nw = 0;
        while nw < len {
            match dst.write(&self.buf[nw..len]).await {
                Ok(0) => break,
                Ok(n) => {
                    nw += n;
                    self.written += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CopyError::Write(e)),
            }
        }

        if nw > 0 {
            debug!("{} == [{} bytes] ==>", self.route, nw);
            dst.flush().await.map_err(CopyError::Write)?;
        }
        Ok(nw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts `limit` bytes in total, then reports zero-length writes
    struct StallingWriter {
        accepted: Vec<u8>,
        limit: usize,
    }

    impl AsyncWrite for StallingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let room = self.limit - self.accepted.len();
            let n = room.min(buf.len());
            self.accepted.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Accepts one byte per write call
    struct TrickleWriter(Vec<u8>);

    impl AsyncWrite for TrickleWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.0.push(buf[0]);
            Poll::Ready(Ok(1))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_copies_multi_chunk_payload_in_order() {
        let data = payload(COPY_BUFFER_SIZE * 5 + 123);
        let (mut client, mut server) = tokio::io::duplex(4096);

        let expected = data.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&expected).await.unwrap();
            // dropping the client end is EOF for the copier
        });

        let mut out = Vec::new();
        let mut copier = ByteCopier::new("test");
        let n = copier.copy(&mut server, &mut out).await.unwrap();
        writer.await.unwrap();

        assert_eq!(n, data.len() as u64);
        assert_eq!(copier.bytes_written(), data.len() as u64);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_immediate_eof() {
        let mut src: &[u8] = &[];
        let mut out = Vec::new();
        let mut copier = ByteCopier::new("test");
        assert_eq!(copier.copy(&mut src, &mut out).await.unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_partial_progress_within_chunk_is_not_short() {
        let mut src: &[u8] = b"hello world";
        let mut dst = TrickleWriter(Vec::new());
        let mut copier = ByteCopier::new("test");

        assert_eq!(copier.copy(&mut src, &mut dst).await.unwrap(), 11);
        assert_eq!(dst.0, b"hello world");
    }

    #[tokio::test]
    async fn test_short_write_stops_copy() {
        let data = payload(100);
        let mut src = std::io::Cursor::new(data.clone());
        let mut dst = StallingWriter {
            accepted: Vec::new(),
            limit: 10,
        };
        let mut copier = ByteCopier::new("test");

        let err = copier.copy(&mut src, &mut dst).await.unwrap_err();
        assert!(matches!(
            err,
            CopyError::ShortWrite {
                written: 10,
                expected: 100
            }
        ));
        assert_eq!(copier.bytes_written(), 10);
        assert_eq!(dst.accepted, &data[..10]);
    }

    #[tokio::test]
    async fn test_short_write_does_not_read_further() {
        // Source larger than one buffer: only the first chunk may be consumed
        let data = payload(COPY_BUFFER_SIZE * 3);
        let mut src = std::io::Cursor::new(data);
        let mut dst = StallingWriter {
            accepted: Vec::new(),
            limit: 1,
        };
        let mut copier = ByteCopier::new("test");

        assert!(copier.copy(&mut src, &mut dst).await.is_err());
        assert_eq!(src.position(), COPY_BUFFER_SIZE as u64);
    }

    #[tokio::test]
    async fn test_write_error_surfaces() {
        let mut src: &[u8] = b"data";
        let mut copier = ByteCopier::new("test");
        let err = copier.copy(&mut src, &mut BrokenWriter).await.unwrap_err();
        assert!(matches!(err, CopyError::Write(e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(copier.bytes_written(), 0);
    }

    #[tokio::test]
    async fn test_read_error_surfaces() {
        let mut out = Vec::new();
        let mut copier = ByteCopier::new("test");
        let err = copier.copy(&mut BrokenReader, &mut out).await.unwrap_err();
        assert!(matches!(err, CopyError::Read(e) if e.kind() == io::ErrorKind::ConnectionReset));
    }
}
