//! Time spent away from keyboard.

use crate::cancel::CancelToken;
use crate::collector::accumulator::Accumulator;
use crate::collector::traits::{Collector, Snapshot};
use crate::error::CollectorError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Source of "seconds since the last user input".
pub trait IdleClock: Send + Sync + 'static {
    fn seconds_since_input(&self) -> Result<f64, CollectorError>;
}

/// Clock for hosts without an idle query; the user always looks present.
#[derive(Debug, Default)]
pub struct NoopIdleClock;

impl IdleClock for NoopIdleClock {
    fn seconds_since_input(&self) -> Result<f64, CollectorError> {
        Ok(0.0)
    }
}

/// Counts sampling intervals during which the user was away.
///
/// The user becomes away once idle time reaches the timeout and is present
/// again on the first sample below it. With the default one-second sampling
/// interval the value is seconds away.
pub struct AfkCollector<C: IdleClock = NoopIdleClock> {
    clock: C,
    timeout_secs: f64,
    sample_interval: Duration,
    away: AtomicBool,
    count: Accumulator,
    stop: CancelToken,
}

impl<C: IdleClock> AfkCollector<C> {
    pub const NAME: &'static str = "afk";

    pub fn new(clock: C, timeout: Duration) -> Self {
        Self::with_sample_interval(clock, timeout, Duration::from_secs(1))
    }

    pub fn with_sample_interval(clock: C, timeout: Duration, sample_interval: Duration) -> Self {
        Self {
            clock,
            timeout_secs: timeout.as_secs_f64(),
            sample_interval,
            away: AtomicBool::new(false),
            count: Accumulator::new(),
            stop: CancelToken::new(),
        }
    }

    fn sample(&self) -> Result<(), CollectorError> {
        let idle = self.clock.seconds_since_input()?;
        let was_away = self.away.load(Ordering::Relaxed);

        if was_away && idle < self.timeout_secs {
            tracing::info!("no longer away");
            self.away.store(false, Ordering::Relaxed);
        } else if !was_away && idle >= self.timeout_secs {
            tracing::info!(idle_secs = idle, "became away");
            self.away.store(true, Ordering::Relaxed);
            self.count.add(1.0);
        } else if was_away {
            self.count.add(1.0);
        }
        Ok(())
    }

    pub fn is_away(&self) -> bool {
        self.away.load(Ordering::Relaxed)
    }
}

impl<C: IdleClock> Collector for AfkCollector<C> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_collect(&self, shutdown: &CancelToken) -> Result<(), CollectorError> {
        while !self.stop.is_cancelled() && !shutdown.is_cancelled() {
            self.sample()?;
            if self.stop.wait_timeout(self.sample_interval) {
                break;
            }
        }
        Ok(())
    }

    fn stop_collect(&self) {
        self.stop.cancel();
    }

    fn get_current_state(&self) -> Snapshot {
        Snapshot::new(Self::NAME, self.count.get())
    }

    fn cleanup(&self) {
        self.count.reset();
    }

    fn take_state(&self) -> Snapshot {
        Snapshot::new(Self::NAME, self.count.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedClock(Mutex<Vec<f64>>);

    impl IdleClock for ScriptedClock {
        fn seconds_since_input(&self) -> Result<f64, CollectorError> {
            let mut script = self.0.lock().unwrap();
            if script.is_empty() {
                return Err(CollectorError::Sensing("script exhausted".into()));
            }
            Ok(script.remove(0))
        }
    }

    #[test]
    fn test_away_transitions() {
        let clock = ScriptedClock(Mutex::new(vec![5.0, 31.0, 32.0, 33.0, 1.0, 2.0]));
        let collector = AfkCollector::new(clock, Duration::from_secs(30));

        collector.sample().unwrap();
        assert!(!collector.is_away());
        collector.sample().unwrap();
        assert!(collector.is_away());
        collector.sample().unwrap();
        collector.sample().unwrap();
        collector.sample().unwrap();
        assert!(!collector.is_away());
        collector.sample().unwrap();

        assert_eq!(collector.get_current_state(), Snapshot::new("afk", 3.0));

        collector.cleanup();
        assert_eq!(collector.get_current_state().value, 0.0);
    }

    #[test]
    fn test_clock_error_escapes_loop() {
        let clock = ScriptedClock(Mutex::new(vec![40.0]));
        let collector =
            AfkCollector::with_sample_interval(clock, Duration::from_secs(30), Duration::ZERO);

        let result = collector.start_collect(&CancelToken::new());
        assert!(matches!(result, Err(CollectorError::Sensing(_))));
        assert_eq!(collector.get_current_state().value, 1.0);
    }

    #[test]
    fn test_noop_clock_never_away() {
        let collector = AfkCollector::new(NoopIdleClock, Duration::from_secs(30));
        for _ in 0..5 {
            collector.sample().unwrap();
        }
        assert!(!collector.is_away());
        assert_eq!(collector.get_current_state().value, 0.0);
    }
}
