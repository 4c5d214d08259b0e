//! Bidirectional relay between two connections
//!
//! Both directions run concurrently inside the caller's task. The pipe is
//! done as soon as either direction finishes: when one side hangs up or
//! fails the whole relay winds down. The unfinished direction is dropped
//! with the pipe, so it cannot outlive it.

use tokio::io::{AsyncRead, AsyncWrite};

use super::copier::ByteCopier;
use super::error::CopyError;

/// Which copy direction ended the pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A -> B (local -> remote)
    Forward,
    /// B -> A (remote -> local)
    Backward,
}

/// Summary of a finished pipe
#[derive(Debug)]
pub struct PipeResult {
    /// Bytes written A -> B
    pub bytes_forward: u64,
    /// Bytes written B -> A
    pub bytes_backward: u64,
    /// Direction whose completion ended the pipe
    pub finished: Direction,
    /// Error of that direction, `None` on clean EOF
    pub terminal_error: Option<CopyError>,
}

impl PipeResult {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_forward + self.bytes_backward
    }
}

/// Relay between `a` and `b` until one direction finishes
pub struct Pipe {
    forward: ByteCopier,
    backward: ByteCopier,
}

impl Pipe {
    /// `a_label`/`b_label` name the two endpoints in logs
    pub fn new(a_label: &str, b_label: &str) -> Self {
        Self {
            forward: ByteCopier::new(format!("{} -> {}", a_label, b_label)),
            backward: ByteCopier::new(format!("{} -> {}", b_label, a_label)),
        }
    }

    /// Run both directions; returns once the first one ends
    ///
    /// The connections are borrowed, not consumed: closing them afterwards
    /// is the caller's job.
    pub async fn forward<A, B>(mut self, a: &mut A, b: &mut B) -> PipeResult
    where
        A: AsyncRead + AsyncWrite + Unpin + ?Sized,
        B: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let (mut a_read, mut a_write) = tokio::io::split(a);
        let (mut b_read, mut b_write) = tokio::io::split(b);

        let (finished, result) = tokio::select! {
            r = self.forward.copy(&mut a_read, &mut b_write) => (Direction::Forward, r),
            r = self.backward.copy(&mut b_read, &mut a_write) => (Direction::Backward, r),
        };

        PipeResult {
            bytes_forward: self.forward.bytes_written(),
            bytes_backward: self.backward.bytes_written(),
            finished,
            terminal_error: result.err(),
        }
    }
}
