//! Session statistics for the daemon.
//!
//! Counters are updated from the tick threads and read by the status
//! surfaces. Totals are persisted to `stats.json` on shutdown and picked up
//! again on the next start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct SessionStats {
    /// Aggregation ticks whose rows reached the logs
    ticks_completed: AtomicU64,
    /// Aggregation ticks that lost their write
    ticks_failed: AtomicU64,
    /// Long-form metric lines written
    metrics_written: AtomicU64,
    /// Decisions applied through the mode setter
    decisions_applied: AtomicU64,
    /// Control ticks that produced no decision
    decisions_skipped: AtomicU64,
    /// Runners that died
    runner_deaths: AtomicU64,
    /// Runners that did not stop within their timeout
    shutdown_timeouts: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            ticks_completed: AtomicU64::new(0),
            ticks_failed: AtomicU64::new(0),
            metrics_written: AtomicU64::new(0),
            decisions_applied: AtomicU64::new(0),
            decisions_skipped: AtomicU64::new(0),
            runner_deaths: AtomicU64::new(0),
            shutdown_timeouts: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that load from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous session stats");
        }

        stats
    }

    pub fn record_tick(&self, metrics: u64) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        self.metrics_written.fetch_add(metrics, Ordering::Relaxed);
    }

    pub fn record_tick_failed(&self) {
        self.ticks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self) {
        self.decisions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision_skipped(&self) {
        self.decisions_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_runner_death(&self) {
        self.runner_deaths.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shutdown_timeout(&self) {
        self.shutdown_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_failed: self.ticks_failed.load(Ordering::Relaxed),
            metrics_written: self.metrics_written.load(Ordering::Relaxed),
            decisions_applied: self.decisions_applied.load(Ordering::Relaxed),
            decisions_skipped: self.decisions_skipped.load(Ordering::Relaxed),
            runner_deaths: self.runner_deaths.load(Ordering::Relaxed),
            shutdown_timeouts: self.shutdown_timeouts.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Aggregation ticks: {} ({} failed)\n\
             - Metric rows written: {}\n\
             - Decisions applied: {} ({} skipped)\n\
             - Collector deaths: {}\n\
             - Shutdown timeouts: {}\n\
             - Session duration: {} seconds",
            s.ticks_completed,
            s.ticks_failed,
            s.metrics_written,
            s.decisions_applied,
            s.decisions_skipped,
            s.runner_deaths,
            s.shutdown_timeouts,
            s.session_duration_secs
        )
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let s = self.snapshot();
            let persisted = PersistedStats {
                ticks_completed: s.ticks_completed,
                ticks_failed: s.ticks_failed,
                metrics_written: s.metrics_written,
                decisions_applied: s.decisions_applied,
                decisions_skipped: s.decisions_skipped,
                runner_deaths: s.runner_deaths,
                shutdown_timeouts: s.shutdown_timeouts,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let p: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.ticks_completed.store(p.ticks_completed, Ordering::Relaxed);
                self.ticks_failed.store(p.ticks_failed, Ordering::Relaxed);
                self.metrics_written.store(p.metrics_written, Ordering::Relaxed);
                self.decisions_applied.store(p.decisions_applied, Ordering::Relaxed);
                self.decisions_skipped.store(p.decisions_skipped, Ordering::Relaxed);
                self.runner_deaths.store(p.runner_deaths, Ordering::Relaxed);
                self.shutdown_timeouts.store(p.shutdown_timeouts, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub metrics_written: u64,
    pub decisions_applied: u64,
    pub decisions_skipped: u64,
    pub runner_deaths: u64,
    pub shutdown_timeouts: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// On-disk format.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub metrics_written: u64,
    pub decisions_applied: u64,
    pub decisions_skipped: u64,
    pub runner_deaths: u64,
    pub shutdown_timeouts: u64,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedStats = Arc<SessionStats>;
