//! The capability contract every sensing unit implements.

use crate::cancel::CancelToken;
use crate::error::CollectorError;
use serde::{Deserialize, Serialize};

/// Value recorded for a collector whose runner has died.
pub const DEAD_VALUE: f64 = -1.0;

/// A (name, value) pair read from a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub value: f64,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A sensing unit driven by a [`Runner`](crate::runner::Runner).
///
/// All methods take `&self`: the runner thread blocks inside
/// [`start_collect`](Collector::start_collect) while the aggregation thread
/// calls [`get_current_state`](Collector::get_current_state) and
/// [`cleanup`](Collector::cleanup) on the same instance, so the accumulator
/// must live behind atomics or a lock.
///
/// # Cancellation
///
/// Cancellation is cooperative. A loop must check both its own stop flag
/// (set by [`stop_collect`](Collector::stop_collect)) and the shared
/// `shutdown` token once per iteration. Collectors built around a primitive
/// that blocks without a timeout cannot be interrupted; the runner gives up
/// waiting for them after its stop timeout and leaves the thread detached.
pub trait Collector: Send + Sync + 'static {
    /// Stable name, used as the log column.
    fn name(&self) -> &str;

    /// Run the sampling loop until stopped. Blocking.
    fn start_collect(&self, shutdown: &CancelToken) -> Result<(), CollectorError>;

    /// Ask the loop to end at its next check. Idempotent, never blocks.
    fn stop_collect(&self);

    /// Current accumulator; may lag by one sampling interval.
    fn get_current_state(&self) -> Snapshot;

    /// Reset the accumulator to zero.
    fn cleanup(&self);

    /// Read the accumulator and reset it.
    ///
    /// The default reads then resets, so an update landing in between is
    /// dropped. Collectors backed by an [`Accumulator`](super::Accumulator)
    /// override this with [`Accumulator::take`](super::Accumulator::take).
    fn take_state(&self) -> Snapshot {
        let snapshot = self.get_current_state();
        self.cleanup();
        snapshot
    }
}
