//! Daemon liveness signal: one unit per sampling interval.

use crate::cancel::CancelToken;
use crate::collector::accumulator::Accumulator;
use crate::collector::traits::{Collector, Snapshot};
use crate::error::CollectorError;
use std::time::Duration;

pub struct HeartbeatCollector {
    interval: Duration,
    beats: Accumulator,
    stop: CancelToken,
}

impl HeartbeatCollector {
    pub const NAME: &'static str = "heartbeat";

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            beats: Accumulator::new(),
            stop: CancelToken::new(),
        }
    }
}

impl Default for HeartbeatCollector {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Collector for HeartbeatCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_collect(&self, shutdown: &CancelToken) -> Result<(), CollectorError> {
        while !shutdown.is_cancelled() {
            if self.stop.wait_timeout(self.interval) {
                break;
            }
            self.beats.add(1.0);
        }
        Ok(())
    }

    fn stop_collect(&self) {
        self.stop.cancel();
    }

    fn get_current_state(&self) -> Snapshot {
        Snapshot::new(Self::NAME, self.beats.get())
    }

    fn cleanup(&self) {
        self.beats.reset();
    }

    fn take_state(&self) -> Snapshot {
        Snapshot::new(Self::NAME, self.beats.take())
    }
}
