//! Input-activity collectors fed by a channel of [`SensorEvent`]s.
//!
//! The event source itself (an OS keyboard/mouse hook) sits outside the
//! daemon. A collector only sees an [`InputFeed`]; the built-in registry wires
//! a noop feed that never emits, so on a host without a hook these collectors
//! report zero.

use crate::cancel::CancelToken;
use crate::collector::accumulator::Accumulator;
use crate::collector::traits::{Collector, Snapshot};
use crate::collector::types::{MouseEventType, SensorEvent};
use crate::error::CollectorError;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// How long a loop blocks on the feed before re-checking its stop flags.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receiving end of an input event channel.
pub struct InputFeed {
    // Held so a noop feed never reports disconnection.
    _sender: Option<Sender<SensorEvent>>,
    receiver: Receiver<SensorEvent>,
}

impl InputFeed {
    /// A feed with no producer; it never emits and never disconnects.
    pub fn noop() -> Self {
        let (sender, receiver) = bounded(1);
        Self {
            _sender: Some(sender),
            receiver,
        }
    }

    /// A bounded feed plus the sender a hook (or a test) pushes into.
    pub fn channel() -> (Sender<SensorEvent>, Self) {
        // Bounded to prevent unbounded memory growth
        let (sender, receiver) = bounded(10_000);
        (
            sender,
            Self {
                _sender: None,
                receiver,
            },
        )
    }

    fn next(&self) -> Result<Option<SensorEvent>, CollectorError> {
        match self.receiver.recv_timeout(POLL_INTERVAL) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CollectorError::Disconnected),
        }
    }
}

/// Counts key presses.
pub struct KeystrokeCollector {
    feed: InputFeed,
    count: Accumulator,
    stop: CancelToken,
}

impl KeystrokeCollector {
    pub const NAME: &'static str = "keystrokes";

    pub fn new(feed: InputFeed) -> Self {
        Self {
            feed,
            count: Accumulator::new(),
            stop: CancelToken::new(),
        }
    }
}

impl Collector for KeystrokeCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_collect(&self, shutdown: &CancelToken) -> Result<(), CollectorError> {
        while !self.stop.is_cancelled() && !shutdown.is_cancelled() {
            if let Some(SensorEvent::Keyboard(event)) = self.feed.next()? {
                if event.is_key_down {
                    self.count.add(1.0);
                }
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

/// Seconds the mouse was in use.
///
/// The time between two consecutive mouse events counts as use when it is
/// shorter than the idle gap.
pub struct MouseUsedCollector {
    feed: InputFeed,
    idle_gap: Duration,
    seconds: Accumulator,
    last_event: Mutex<Option<DateTime<Utc>>>,
    stop: CancelToken,
}

impl MouseUsedCollector {
    pub const NAME: &'static str = "mouse_used";

    pub fn new(feed: InputFeed, idle_gap: Duration) -> Self {
        Self {
            feed,
            idle_gap,
            seconds: Accumulator::new(),
            last_event: Mutex::new(None),
            stop: CancelToken::new(),
        }
    }

    fn record(&self, timestamp: DateTime<Utc>, event_type: MouseEventType) {
        let mut last = self
            .last_event
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = *last {
            if let Ok(gap) = (timestamp - previous).to_std() {
                if gap < self.idle_gap {
                    self.seconds.add(gap.as_secs_f64());
                }
            }
        }
        tracing::trace!(?event_type, "mouse event");
        *last = Some(timestamp);
    }
}

impl Collector for MouseUsedCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_collect(&self, shutdown: &CancelToken) -> Result<(), CollectorError> {
        while !self.stop.is_cancelled() && !shutdown.is_cancelled() {
            if let Some(SensorEvent::Mouse(event)) = self.feed.next()? {
                self.record(event.timestamp, event.event_type);
            }
        }
        Ok(())
    }

    fn stop_collect(&self) {
        self.stop.cancel();
    }

    fn get_current_state(&self) -> Snapshot {
        Snapshot::new(Self::NAME, self.seconds.get())
    }

    fn cleanup(&self) {
        self.seconds.reset();
    }

    fn take_state(&self) -> Snapshot {
        Snapshot::new(Self::NAME, self.seconds.take())
    }
}
