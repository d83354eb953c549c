//! Subsystem supervision.
//!
//! The [`Supervisor`] starts every registered [`Subsystem`] on its own task
//! and waits for the first of them to finish (or for an external
//! [`Supervisor::stop`]). It then tears everything down in a fixed order:
//!
//! 1. cancel the watch-manager token,
//! 2. ask every other subsystem to stop, once each, in registration order,
//! 3. join every task, bounded by the shutdown grace period.
//!
//! The error of the subsystem that ended the run is returned; errors
//! reported by subsystems during teardown are only logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DaemonError, Result};

/// A long-running part of the daemon (a server loop, a watcher, ...).
#[async_trait]
pub trait Subsystem: Send + Sync {
    fn name(&self) -> &str;

    /// Serve until stopped or failed.
    async fn run(&self) -> Result<()>;

    /// Ask a running `run` to return. Called at most once per run.
    async fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct Entry {
    subsystem: Arc<dyn Subsystem>,
    state: SubsystemState,
}

type Report = (usize, Result<()>);

/// Completion report for one subsystem task. A task that unwinds before
/// reporting still reports, as a subsystem failure.
struct Reporter {
    idx: usize,
    name: String,
    tx: Option<mpsc::Sender<Report>>,
}

impl Reporter {
    fn report(mut self, result: Result<()>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send((self.idx, result));
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let reason = if std::thread::panicking() {
                "panicked"
            } else {
                "terminated without reporting"
            };
            let _ = tx.try_send((self.idx, Err(DaemonError::subsystem(&self.name, reason))));
        }
    }
}

pub struct Supervisor {
    grace: Duration,
    entries: Mutex<Vec<Entry>>,
    /// Handed to the watch manager; cancelled first on shutdown.
    watch_token: CancellationToken,
    /// External stop request.
    stop_token: CancellationToken,
    phase: watch::Sender<Phase>,
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            grace,
            entries: Mutex::new(Vec::new()),
            watch_token: CancellationToken::new(),
            stop_token: CancellationToken::new(),
            phase,
        }
    }

    /// Cancellation context for the watch manager.
    pub fn cancellation(&self) -> CancellationToken {
        self.watch_token.clone()
    }

    /// Add a subsystem. Only allowed before `run`.
    pub async fn register(&self, subsystem: Arc<dyn Subsystem>) -> Result<()> {
        if *self.phase.borrow() != Phase::Idle {
            return Err(DaemonError::AlreadyRunning);
        }
        debug!(subsystem = subsystem.name(), "Registered subsystem");
        self.entries.lock().await.push(Entry {
            subsystem,
            state: SubsystemState::NotStarted,
        });
        Ok(())
    }

    /// Current state of every registered subsystem, in registration order.
    pub async fn states(&self) -> Vec<(String, SubsystemState)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| (e.subsystem.name().to_string(), e.state))
            .collect()
    }

    async fn set_state(&self, idx: usize, state: SubsystemState) {
        if let Some(entry) = self.entries.lock().await.get_mut(idx) {
            debug!(subsystem = entry.subsystem.name(), from = ?entry.state, to = ?state, "Subsystem state");
            entry.state = state;
        }
    }

    /// Run every registered subsystem until the first one finishes or
    /// [`stop`](Self::stop) is called, then shut the rest down.
    pub async fn run(&self) -> Result<()> {
        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == Phase::Idle {
                *phase = Phase::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(DaemonError::AlreadyRunning);
        }

        let subsystems: Vec<Arc<dyn Subsystem>> = {
            let mut entries = self.entries.lock().await;
            for entry in entries.iter_mut() {
                entry.state = SubsystemState::Starting;
            }
            entries.iter().map(|e| Arc::clone(&e.subsystem)).collect()
        };

        // Each task reports at most once, so the queue never fills.
        let (done_tx, mut done_rx) = mpsc::channel::<Report>(subsystems.len().max(1));
        let mut handles = Vec::with_capacity(subsystems.len());
        for (idx, subsystem) in subsystems.iter().enumerate() {
            let reporter = Reporter {
                idx,
                name: subsystem.name().to_string(),
                tx: Some(done_tx.clone()),
            };
            let subsystem = Arc::clone(subsystem);
            handles.push(tokio::spawn(async move {
                let result = subsystem.run().await;
                reporter.report(result);
            }));
            self.set_state(idx, SubsystemState::Running).await;
        }
        drop(done_tx);
        info!(count = subsystems.len(), "Subsystems started");

        let trigger = tokio::select! {
            Some(done) = done_rx.recv() => Some(done),
            _ = self.stop_token.cancelled() => None,
        };

        let (trigger_idx, outcome) = match trigger {
            Some((idx, result)) => {
                let name = subsystems[idx].name();
                match &result {
                    Ok(()) => info!(subsystem = name, "Subsystem finished, shutting down"),
                    Err(e) => error!(subsystem = name, error = %e, "Subsystem failed, shutting down"),
                }
                (Some(idx), result)
            }
            None => {
                info!("Stop requested, shutting down");
                (None, Ok(()))
            }
        };

        self.watch_token.cancel();

        let deadline = Instant::now() + self.grace;
        for (idx, subsystem) in subsystems.iter().enumerate() {
            if Some(idx) == trigger_idx {
                continue;
            }
            self.set_state(idx, SubsystemState::Stopping).await;
            if timeout_at(deadline, subsystem.stop()).await.is_err() {
                warn!(subsystem = subsystem.name(), "Stop request did not complete in time");
            }
        }

        for (idx, mut handle) in handles.into_iter().enumerate() {
            let name = subsystems[idx].name();
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(subsystem = name, error = %e, "Subsystem task failed"),
                Err(_) => {
                    let err = DaemonError::ShutdownTimeout {
                        subsystem: name.to_string(),
                        grace: self.grace,
                    };
                    error!(error = %err, "Aborting subsystem");
                    handle.abort();
                }
            }
            self.set_state(idx, SubsystemState::Stopped).await;
        }

        while let Ok((idx, result)) = done_rx.try_recv() {
            if let Err(e) = result {
                warn!(subsystem = subsystems[idx].name(), error = %e, "Subsystem error during shutdown");
            }
        }

        info!("All subsystems stopped");
        self.phase.send_replace(Phase::Stopped);
        outcome
    }

    /// Request shutdown and wait until a run has started and fully stopped.
    ///
    /// Safe to call any number of times, before or after `run`. When called
    /// before `run`, it returns once that run has gone through startup and
    /// teardown.
    pub async fn stop(&self) {
        self.stop_token.cancel();
        let mut phase = self.phase.subscribe();
        let _ = phase.wait_for(|p| *p == Phase::Stopped).await;
    }
}
