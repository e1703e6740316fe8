//! Periodic aggregation of runner values into the logs.
//!
//! The [`Aggregator`] is the only writer of the metric logs. Each tick pops
//! every runner in frozen column order and appends one long-form line per
//! metric plus one pivot line. Ticks are serialized by a mutex held for the
//! whole tick, so two triggers never interleave their lines.

use crate::error::AggregationError;
use crate::runner::Runner;
use crate::stats::SharedStats;
use crate::storage::{Clock, LogStore, PivotHistory, SnapshotRow};
use std::sync::{Arc, Mutex};

pub struct Aggregator {
    runners: Vec<Arc<Runner>>,
    store: LogStore,
    history: Arc<PivotHistory>,
    clock: Clock,
    stats: SharedStats,
    tick_lock: Mutex<()>,
}

impl Aggregator {
    /// `runners` must already be in the store's column order.
    pub fn new(
        runners: Vec<Arc<Runner>>,
        store: LogStore,
        history: Arc<PivotHistory>,
        clock: Clock,
        stats: SharedStats,
    ) -> Self {
        debug_assert!(runners
            .iter()
            .map(|r| r.name())
            .eq(store.columns().iter().map(String::as_str)));

        Self {
            runners,
            store,
            history,
            clock,
            stats,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn history(&self) -> &Arc<PivotHistory> {
        &self.history
    }

    /// Run one aggregation tick.
    pub fn tick(&self) -> Result<SnapshotRow, AggregationError> {
        let _guard = self.tick_lock.lock().unwrap_or_else(|p| p.into_inner());

        let row = SnapshotRow {
            timestamp: self.clock.now(),
            values: self.runners.iter().map(|r| r.pop()).collect(),
        };

        match self.store.append_row(&row) {
            Ok(()) => {
                self.history.push(row.to_pivot());
                self.stats.record_tick(row.values.len() as u64);
                tracing::info!(
                    timestamp = %row.timestamp,
                    metrics = row.values.len(),
                    "aggregation tick written"
                );
                Ok(row)
            }
            Err(e) => {
                self.stats.record_tick_failed();
                tracing::error!(error = %e, timestamp = %row.timestamp, "aggregation tick lost");
                Err(e)
            }
        }
    }
}
