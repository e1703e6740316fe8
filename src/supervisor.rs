//! Top-level orchestration.
//!
//! The [`Supervisor`] owns the configuration and every collaborator. Its
//! lifecycle is `configure` once, `run` until the shutdown token fires, then
//! `stop`. All three take `&self` so a status surface can share it behind an
//! `Arc` while the run loop is active.

use crate::aggregate::Aggregator;
use crate::cancel::CancelToken;
use crate::collector::{Collector, Registration, Registry, MANIFEST};
use crate::config::Config;
use crate::control::{
    CommandModeSetter, ControlLoop, Decision, FocusMode, LogModeSetter, LogisticPredictor,
    ModeSetter, Predictor,
};
use crate::error::SupervisorError;
use crate::runner::{Runner, RunnerStatus, StopOutcome};
use crate::stats::{SessionStats, SharedStats, StatsSnapshot};
use crate::storage::{Clock, LogStore, PivotHistory};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Pivot rows kept in memory, at least the prediction window.
const MIN_HISTORY_ROWS: usize = 60;

/// Everything `configure` freezes.
struct Wiring {
    collectors: Vec<Arc<dyn Collector>>,
    columns: Vec<String>,
    pipeline: Option<Pipeline>,
}

/// Storage and control, present only when at least one collector exists.
struct Pipeline {
    store: LogStore,
    history: Arc<PivotHistory>,
    clock: Clock,
    control: Arc<ControlLoop>,
}

/// Serializable view of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub instance_id: Uuid,
    pub hostname: String,
    pub version: String,
    pub configured: bool,
    pub running: bool,
    pub columns: Vec<String>,
    pub runners: Vec<RunnerStatus>,
    pub applied_mode: Option<FocusMode>,
    pub last_decision: Option<Decision>,
    pub stats: StatsSnapshot,
}

/// Outcome of [`Supervisor::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    pub finished: Vec<String>,
    pub timed_out: Vec<String>,
}

pub struct Supervisor {
    config: Config,
    manifest: Vec<Registration>,
    predictor: Mutex<Option<Box<dyn Predictor>>>,
    mode_setter: Mutex<Option<Box<dyn ModeSetter>>>,
    shutdown: CancelToken,
    stats: SharedStats,
    instance_id: Uuid,
    hostname: String,
    configure_lock: Mutex<()>,
    wiring: OnceLock<Wiring>,
    runners: Mutex<Vec<Arc<Runner>>>,
    running: AtomicBool,
}

impl Supervisor {
    /// Supervisor with the built-in manifest and collaborators from `config`.
    pub fn new(config: Config) -> Self {
        let stats = Arc::new(SessionStats::with_persistence(config.stats_path()));
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let predictor: Box<dyn Predictor> = Box::new(LogisticPredictor::from_config(&config));

        Self {
            manifest: MANIFEST.to_vec(),
            predictor: Mutex::new(Some(predictor)),
            mode_setter: Mutex::new(Some(mode_setter_from_config(&config))),
            shutdown: CancelToken::new(),
            stats,
            instance_id: Uuid::new_v4(),
            hostname,
            configure_lock: Mutex::new(()),
            wiring: OnceLock::new(),
            runners: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            config,
        }
    }

    pub fn with_manifest(mut self, manifest: &[Registration]) -> Self {
        self.manifest = manifest.to_vec();
        self
    }

    pub fn with_predictor(self, predictor: impl Predictor + 'static) -> Self {
        let predictor: Box<dyn Predictor> = Box::new(predictor);
        *lock(&self.predictor) = Some(predictor);
        self
    }

    pub fn with_mode_setter(self, setter: impl ModeSetter + 'static) -> Self {
        let setter: Box<dyn ModeSetter> = Box::new(setter);
        *lock(&self.mode_setter) = Some(setter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Clone of the shutdown signal, for wiring to OS signals.
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.wiring.get().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Frozen column order, empty before `configure`.
    pub fn columns(&self) -> Vec<String> {
        self.wiring
            .get()
            .map(|w| w.columns.clone())
            .unwrap_or_default()
    }

    /// Prepare storage, discover collectors and train the predictor.
    ///
    /// Calling it again after a successful call does nothing.
    pub fn configure(&self) -> Result<(), SupervisorError> {
        let _guard = lock(&self.configure_lock);
        if self.wiring.get().is_some() {
            return Ok(());
        }

        self.config.validate()?;
        self.config.ensure_directories()?;
        let clock = Clock::from_timezone(self.config.timezone.as_deref())?;

        let registry = Registry::discover(&self.manifest, &self.config);
        let columns = registry.names();
        let collectors = registry.into_collectors();

        let pipeline = if collectors.is_empty() {
            tracing::error!("no collectors discovered, storage left untouched");
            None
        } else {
            Some(self.build_pipeline(&columns, clock)?)
        };

        tracing::info!(
            collectors = ?columns,
            data_path = %self.config.data_path.display(),
            "supervisor configured"
        );

        // Only this call, under the configure lock, ever sets the cell.
        let _ = self.wiring.set(Wiring {
            collectors,
            columns,
            pipeline,
        });
        Ok(())
    }

    fn build_pipeline(
        &self,
        columns: &[String],
        clock: Clock,
    ) -> Result<Pipeline, SupervisorError> {
        let store = LogStore::open(
            self.config.long_log_path(),
            self.config.pivot_log_path(),
            self.config.decision_log_path(),
            columns.to_vec(),
        )?;

        let history = Arc::new(PivotHistory::new(
            self.config.window_size.max(MIN_HISTORY_ROWS),
        ));
        match store.read_pivot_tail(history.capacity()) {
            Ok(rows) => {
                if !rows.is_empty() {
                    tracing::info!(rows = rows.len(), "restored pivot history");
                }
                history.extend(rows);
            }
            Err(e) => tracing::warn!(error = %e, "could not read pivot history"),
        }

        let mut predictor: Box<dyn Predictor> = match lock(&self.predictor).take() {
            Some(predictor) => predictor,
            None => Box::new(LogisticPredictor::from_config(&self.config)),
        };
        if let Err(e) = predictor.train(columns) {
            tracing::warn!(error = %e, "predictor training failed, decisions will be skipped");
        }

        let setter = lock(&self.mode_setter)
            .take()
            .unwrap_or_else(|| mode_setter_from_config(&self.config));

        let control = Arc::new(ControlLoop::new(
            predictor,
            setter,
            self.config.threshold,
            self.config.window_size,
            store.clone(),
            Arc::clone(&history),
            clock,
            Arc::clone(&self.stats),
        ));

        Ok(Pipeline {
            store,
            history,
            clock,
            control,
        })
    }

    /// Start one runner per collector and tick until shutdown.
    pub fn run(&self) -> Result<(), SupervisorError> {
        let wiring = self.wiring.get().ok_or(SupervisorError::NotConfigured)?;
        let pipeline = match &wiring.pipeline {
            Some(pipeline) => pipeline,
            None => {
                tracing::error!("no collectors to run");
                return Err(SupervisorError::NoCollectors);
            }
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning);
        }

        let runners: Vec<Arc<Runner>> = wiring
            .collectors
            .iter()
            .map(|c| {
                Arc::new(
                    Runner::new(Arc::clone(c), self.shutdown.clone())
                        .with_stats(Arc::clone(&self.stats)),
                )
            })
            .collect();
        {
            // `stop` cancels before taking this lock, so either it sees every
            // started runner or we see the cancellation here.
            let mut slot = lock(&self.runners);
            if self.shutdown.is_cancelled() {
                tracing::info!("shutdown requested before start, not starting runners");
                return Ok(());
            }
            *slot = runners.clone();
            for runner in &runners {
                if let Err(e) = runner.start() {
                    tracing::error!(collector = %runner.name(), error = %e, "runner failed to start");
                }
            }
        }

        let aggregator = Arc::new(Aggregator::new(
            runners,
            pipeline.store.clone(),
            Arc::clone(&pipeline.history),
            pipeline.clock,
            Arc::clone(&self.stats),
        ));

        tracing::info!(
            collectors = wiring.collectors.len(),
            interval_ms = self.config.collect_interval.as_millis() as u64,
            control_every = self.config.control_every,
            "supervisor running"
        );

        let control_every = u64::from(self.config.control_every);
        let mut tick: u64 = 0;
        while !self.shutdown.wait_timeout(self.config.collect_interval) {
            tick += 1;
            let run_control = tick % control_every == 0;
            let aggregator = Arc::clone(&aggregator);
            let control = Arc::clone(&pipeline.control);

            // Each tick logs its own failures.
            let spawned = thread::Builder::new()
                .name("flowd-tick".into())
                .spawn(move || {
                    let _ = aggregator.tick();
                    if run_control {
                        let _ = control.tick();
                    }
                });
            if let Err(e) = spawned {
                tracing::error!(tick, error = %e, "could not spawn tick thread, tick lost");
            }
        }

        tracing::info!(ticks = tick, "shutdown observed, run loop exiting");
        Ok(())
    }

    /// Signal shutdown and stop every runner, waiting up to `timeout` each.
    pub fn stop(&self, timeout: Duration) -> StopReport {
        self.shutdown.cancel();

        let runners = lock(&self.runners).clone();
        let mut report = StopReport::default();
        for runner in &runners {
            match runner.stop(timeout) {
                StopOutcome::Finished => report.finished.push(runner.name().to_string()),
                StopOutcome::TimedOut => {
                    self.stats.record_shutdown_timeout();
                    report.timed_out.push(runner.name().to_string());
                }
            }
        }

        if let Err(e) = self.stats.save() {
            tracing::warn!(error = %e, "could not save session stats");
        }
        tracing::info!(
            finished = report.finished.len(),
            timed_out = report.timed_out.len(),
            "supervisor stopped"
        );
        report
    }

    pub fn status(&self) -> SupervisorStatus {
        let control = self
            .wiring
            .get()
            .and_then(|w| w.pipeline.as_ref())
            .map(|p| &p.control);

        SupervisorStatus {
            instance_id: self.instance_id,
            hostname: self.hostname.clone(),
            version: crate::VERSION.to_string(),
            configured: self.is_configured(),
            running: self.is_running(),
            columns: self.columns(),
            runners: lock(&self.runners).iter().map(|r| r.status()).collect(),
            applied_mode: control.and_then(|c| c.applied_mode()),
            last_decision: control.and_then(|c| c.last_decision()),
            stats: self.stats.snapshot(),
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("instance_id", &self.instance_id)
            .field("configured", &self.is_configured())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// `CommandModeSetter` when a command is configured, else `LogModeSetter`.
pub fn mode_setter_from_config(config: &Config) -> Box<dyn ModeSetter> {
    match config.mode_command.as_deref() {
        Some(command) => match CommandModeSetter::new(command) {
            Ok(setter) => Box::new(setter.with_timeout(config.mode_timeout())),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring mode_command");
                Box::new(LogModeSetter)
            }
        },
        None => Box::new(LogModeSetter),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
