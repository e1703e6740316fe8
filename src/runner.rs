//! Execution context for a single collector.
//!
//! A [`Runner`] owns one collector and drives its sampling loop on a
//! dedicated OS thread. A loop that fails or panics marks only its own runner
//! dead; siblings keep running. There is no restart: a dead runner answers
//! [`Runner::pop`] with [`DEAD_VALUE`] until the process exits.

use crate::cancel::CancelToken;
use crate::collector::{Collector, Snapshot, DEAD_VALUE};
use crate::error::{CollectorError, RunnerError};
use crate::stats::SharedStats;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl RunnerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// How a [`Runner::stop`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The sampling thread exited within the timeout.
    Finished,
    /// The thread is still running and has been detached.
    TimedOut,
}

/// Serializable view of a runner for status reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub name: String,
    pub state: RunnerState,
    pub dead: bool,
}

pub struct Runner {
    name: String,
    collector: Arc<dyn Collector>,
    shutdown: CancelToken,
    state: AtomicU8,
    dead: Arc<AtomicBool>,
    pop_lock: Mutex<()>,
    done: Mutex<Option<Receiver<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: Option<SharedStats>,
}

impl Runner {
    /// Wrap `collector`; `shutdown` is the supervisor-wide cancellation token.
    pub fn new(collector: Arc<dyn Collector>, shutdown: CancelToken) -> Self {
        Self {
            name: collector.name().to_string(),
            collector,
            shutdown,
            state: AtomicU8::new(RunnerState::Created as u8),
            dead: Arc::new(AtomicBool::new(false)),
            pop_lock: Mutex::new(()),
            done: Mutex::new(None),
            handle: Mutex::new(None),
            stats: None,
        }
    }

    /// Count this runner's death in `stats`.
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RunnerStatus {
        RunnerStatus {
            name: self.name.clone(),
            state: self.state(),
            dead: self.is_dead(),
        }
    }

    /// Spawn the sampling thread.
    pub fn start(&self) -> Result<(), RunnerError> {
        if self
            .state
            .compare_exchange(
                RunnerState::Created as u8,
                RunnerState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(RunnerError::AlreadyStarted(self.name.clone()));
        }

        let (done_tx, done_rx) = bounded(1);
        let collector = Arc::clone(&self.collector);
        let shutdown = self.shutdown.clone();
        let dead = Arc::clone(&self.dead);
        let name = self.name.clone();
        let stats = self.stats.clone();

        let spawned = thread::Builder::new()
            .name(format!("collector-{name}"))
            .spawn(move || {
                tracing::debug!(collector = %name, "sampling loop started");
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| collector.start_collect(&shutdown)))
                        .unwrap_or_else(|payload| {
                            Err(CollectorError::Panicked(panic_message(payload.as_ref())))
                        });

                match outcome {
                    Ok(()) => tracing::debug!(collector = %name, "sampling loop exited"),
                    Err(e) => {
                        dead.store(true, Ordering::SeqCst);
                        if let Some(stats) = &stats {
                            stats.record_runner_death();
                        }
                        tracing::error!(collector = %name, error = %e, "collector died");
                    }
                }
                collector.stop_collect();
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.done) = Some(done_rx);
                *lock(&self.handle) = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.dead.store(true, Ordering::SeqCst);
                self.state
                    .store(RunnerState::Stopped as u8, Ordering::SeqCst);
                Err(RunnerError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Ask the collector to stop and wait up to `timeout` for its thread.
    ///
    /// Always returns; a thread that does not finish in time is detached and
    /// may keep running in the background.
    pub fn stop(&self, timeout: Duration) -> StopOutcome {
        let previous = self
            .state
            .swap(RunnerState::Stopping as u8, Ordering::SeqCst);
        if RunnerState::from_u8(previous) == RunnerState::Created {
            self.state
                .store(RunnerState::Stopped as u8, Ordering::SeqCst);
            return StopOutcome::Finished;
        }

        self.collector.stop_collect();

        let finished = match lock(&self.done).as_ref() {
            Some(done) => !matches!(done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        };

        let outcome = if finished {
            if let Some(handle) = lock(&self.handle).take() {
                let _ = handle.join();
            }
            StopOutcome::Finished
        } else {
            tracing::warn!(
                collector = %self.name,
                timeout_ms = timeout.as_millis() as u64,
                "collector did not stop in time, detaching its thread"
            );
            lock(&self.handle).take();
            StopOutcome::TimedOut
        };

        self.state
            .store(RunnerState::Stopped as u8, Ordering::SeqCst);
        outcome
    }

    /// Read the collector's value and reset it.
    pub fn pop(&self) -> Snapshot {
        let _guard = lock(&self.pop_lock);
        if self.is_dead() {
            return Snapshot::new(self.name.clone(), DEAD_VALUE);
        }
        self.collector.take_state()
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("dead", &self.is_dead())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
