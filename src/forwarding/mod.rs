//! Port forwarding module
//!
//! One [`ListenerWorker`] per transport accepts local connections; each one
//! is handed to a [`ConnectionHandler`] which dials the remote through the
//! overlay and relays bytes with a [`Pipe`] of two [`ByteCopier`]s.
//! [`ForwarderSupervisor`] starts the workers and waits for all of them.

mod copier;
mod error;
mod handler;
mod listener;
mod pipe;
mod supervisor;

pub use copier::{ByteCopier, COPY_BUFFER_SIZE};
pub use error::{CopyError, DialError, ListenError};
pub use handler::{ConnectionHandler, ConnectionState, HandleOutcome};
pub use listener::{ListenerState, ListenerWorker, WorkerExit};
pub use pipe::{Direction, Pipe, PipeResult};
pub use supervisor::{
    ForwarderSupervisor, RunningForwarder, ShutdownHandle, SupervisorReport, WorkerHandle,
};
