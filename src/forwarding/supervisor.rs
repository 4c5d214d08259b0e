//! Forwarder supervisor
//!
//! Starts one [`ListenerWorker`] task per transport and waits on their join
//! handles. Each handle resolves exactly once, when its transport has
//! permanently stopped; per-connection completion never reaches this level.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::handler::ConnectionHandler;
use super::listener::{ListenerState, ListenerWorker, WorkerExit};
use crate::config::{ForwarderConfig, TransportSpec};
use crate::overlay::Overlay;

/// Requests every worker of a supervisor to stop accepting
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // No receivers left means every worker already stopped
        let _ = self.tx.send(());
    }
}

/// Outcome of a full supervisor run
#[derive(Debug)]
pub struct SupervisorReport {
    /// Number of transports started
    pub total: usize,
    /// One exit per transport, in config order
    pub exits: Vec<(TransportSpec, WorkerExit)>,
}

impl SupervisorReport {
    /// Transports whose worker has exited
    pub fn completed(&self) -> usize {
        self.exits.len()
    }

    /// Transports that never got their listener up
    pub fn bind_failures(&self) -> usize {
        self.exits
            .iter()
            .filter(|(_, exit)| matches!(exit, WorkerExit::BindFailed(_)))
            .count()
    }
}

/// A started transport
pub struct WorkerHandle {
    pub spec: TransportSpec,
    pub state: watch::Receiver<ListenerState>,
    join: JoinHandle<WorkerExit>,
}

/// Supervisor after `start`
pub struct RunningForwarder {
    workers: Vec<WorkerHandle>,
    shutdown: ShutdownHandle,
}

impl RunningForwarder {
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Block until every worker has permanently stopped
    pub async fn wait(self) -> SupervisorReport {
        let total = self.workers.len();
        let (specs, joins): (Vec<_>, Vec<_>) = self
            .workers
            .into_iter()
            .map(|worker| (worker.spec, worker.join))
            .unzip();

        let exits = join_all(joins)
            .await
            .into_iter()
            .zip(specs)
            .map(|(joined, spec)| {
                let exit = joined.unwrap_or_else(|e| {
                    error!("Worker for {} panicked: {}", spec.local_port, e);
                    WorkerExit::Panicked(e.to_string())
                });
                (spec, exit)
            })
            .collect::<Vec<_>>();

        let report = SupervisorReport { total, exits };
        warn!(
            "All {} transport(s) stopped ({} failed to bind)",
            report.completed(),
            report.bind_failures()
        );
        report
    }
}

/// Owns the transports of one config
pub struct ForwarderSupervisor {
    transports: Vec<TransportSpec>,
    overlay: Arc<dyn Overlay>,
    dial_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl ForwarderSupervisor {
    pub fn new(config: &ForwarderConfig, overlay: Arc<dyn Overlay>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            transports: config.transports.clone(),
            overlay,
            dial_timeout: config.dial_timeout(),
            shutdown_tx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Spawn one listener task per transport
    pub fn start(self) -> RunningForwarder {
        let workers = self
            .transports
            .iter()
            .map(|spec| self.spawn_worker(spec.clone()))
            .collect();

        RunningForwarder {
            workers,
            shutdown: ShutdownHandle {
                tx: self.shutdown_tx,
            },
        }
    }

    /// Start every transport and wait for all of them to stop
    pub async fn run_all(self) -> SupervisorReport {
        self.start().wait().await
    }

    fn spawn_worker(&self, spec: TransportSpec) -> WorkerHandle {
        info!(
            "Starting transport {} -> {} via {} overlay",
            spec.local_port,
            spec.remote_port,
            self.overlay.name()
        );

        let (state_tx, state_rx) = watch::channel(ListenerState::Starting);
        let worker = ListenerWorker::new(spec.clone(), state_tx, self.shutdown_tx.subscribe());
        let handler =
            ConnectionHandler::new(spec.remote_port.as_str(), self.overlay.clone(), self.dial_timeout);

        let join = tokio::spawn(worker.run(move |stream, peer| {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler.handle(stream, peer).await;
            });
        }));

        WorkerHandle {
            spec,
            state: state_rx,
            join,
        }
    }
}
