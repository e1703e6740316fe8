//! The closed prediction to action loop.

use crate::control::mode::{FocusMode, ModeSetter};
use crate::control::predictor::Predictor;
use crate::error::{ControlError, PredictorError};
use crate::stats::SharedStats;
use crate::storage::{Clock, LogStore, PivotHistory};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A decision that reached the mode setter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: String,
    pub score: f64,
    pub mode: FocusMode,
}

#[derive(Debug, Default)]
struct ControlState {
    applied: Option<FocusMode>,
    last: Option<Decision>,
}

pub struct ControlLoop {
    predictor: Box<dyn Predictor>,
    setter: Box<dyn ModeSetter>,
    threshold: f64,
    window_size: usize,
    store: LogStore,
    history: Arc<PivotHistory>,
    clock: Clock,
    stats: SharedStats,
    state: Mutex<ControlState>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when a tick ends, panics included.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        predictor: Box<dyn Predictor>,
        setter: Box<dyn ModeSetter>,
        threshold: f64,
        window_size: usize,
        store: LogStore,
        history: Arc<PivotHistory>,
        clock: Clock,
        stats: SharedStats,
    ) -> Self {
        Self {
            predictor,
            setter,
            threshold,
            window_size,
            store,
            history,
            clock,
            stats,
            state: Mutex::new(ControlState::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// The mode most recently applied, `None` before the first decision.
    pub fn applied_mode(&self) -> Option<FocusMode> {
        self.lock().applied
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.lock().last.clone()
    }

    /// Score the recent history and apply the resulting mode.
    ///
    /// On any error the previously applied mode is left in place. A tick that
    /// starts while the previous one is still inside the mode setter is
    /// skipped with [`ControlError::Busy`]. The state lock is never held
    /// across the predictor or the setter, so status reads stay responsive.
    pub fn tick(&self) -> Result<Decision, ControlError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.stats.record_decision_skipped();
            tracing::warn!("previous control tick still running, skipping");
            return Err(ControlError::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        let rows = self.history.recent(self.window_size);
        let score = match self.predictor.predict(&rows, self.window_size) {
            Ok(score) => score,
            Err(e) => {
                self.stats.record_decision_skipped();
                match e {
                    PredictorError::InsufficientHistory { .. } | PredictorError::Untrained => {
                        tracing::debug!(reason = %e, "control tick skipped")
                    }
                    _ => tracing::warn!(error = %e, "control tick skipped"),
                }
                return Err(e.into());
            }
        };

        let mode = FocusMode::decide(score, self.threshold);
        if let Err(e) = self.setter.set_external_mode(mode) {
            self.stats.record_decision_skipped();
            tracing::warn!(error = %e, mode = %mode, score, "could not apply focus mode");
            return Err(e.into());
        }

        let decision = Decision {
            timestamp: self.clock.now(),
            score,
            mode,
        };
        {
            let mut state = self.lock();
            if state.applied != Some(mode) {
                tracing::info!(from = ?state.applied, to = %mode, score, "focus mode changed");
            }
            state.applied = Some(mode);
            state.last = Some(decision.clone());
        }
        self.stats.record_decision();

        if let Err(e) = self.store.append_decision(&decision.timestamp, score) {
            tracing::error!(error = %e, "decision applied but not recorded");
            return Err(e.into());
        }
        tracing::debug!(score, mode = %mode, "decision recorded");
        Ok(decision)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("threshold", &self.threshold)
            .field("window_size", &self.window_size)
            .field("applied", &self.applied_mode())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModeError;
    use crate::stats::SessionStats;
    use crate::storage::PivotRow;

    struct FixedScore(Result<f64, fn() -> PredictorError>);

    impl Predictor for FixedScore {
        fn train(&mut self, _columns: &[String]) -> Result<(), PredictorError> {
            Ok(())
        }
        fn predict(&self, _rows: &[PivotRow], _window: usize) -> Result<f64, PredictorError> {
            self.0.map_err(|make| make())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<FocusMode>>>,
        fail: bool,
    }

    impl ModeSetter for Recorder {
        fn set_external_mode(&self, mode: FocusMode) -> Result<(), ModeError> {
            if self.fail {
                return Err(ModeError::ExitStatus("exit status: 1".into()));
            }
            self.calls.lock().unwrap().push(mode);
            Ok(())
        }
    }

    /// Signals on `entered`, then blocks until `release` fires.
    struct Blocking {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl ModeSetter for Blocking {
        fn set_external_mode(&self, _mode: FocusMode) -> Result<(), ModeError> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Ok(())
        }
    }

    fn control(
        dir: &tempfile::TempDir,
        predictor: FixedScore,
        setter: impl ModeSetter + 'static,
    ) -> ControlLoop {
        let store = LogStore::open(
            dir.path().join("data.csv"),
            dir.path().join("data_pivot.csv"),
            dir.path().join("decisions.csv"),
            vec!["afk".into()],
        )
        .unwrap();
        ControlLoop::new(
            Box::new(predictor),
            Box::new(setter),
            0.70,
            15,
            store,
            Arc::new(PivotHistory::new(15)),
            Clock::Local,
            Arc::new(SessionStats::new()),
        )
    }

    #[test]
    fn test_high_score_turns_focus_on_once() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let control = control(&dir, FixedScore(Ok(0.81)), recorder.clone());

        let decision = control.tick().unwrap();
        assert_eq!(decision.mode, FocusMode::Focus);
        assert_eq!(*recorder.calls.lock().unwrap(), vec![FocusMode::Focus]);
        assert_eq!(control.applied_mode(), Some(FocusMode::Focus));

        let decisions = std::fs::read_to_string(dir.path().join("decisions.csv")).unwrap();
        let lines: Vec<_> = decisions.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(",0.8100"));
    }

    #[test]
    fn test_low_score_turns_focus_off_every_tick() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let control = control(&dir, FixedScore(Ok(0.50)), recorder.clone());

        control.tick().unwrap();
        control.tick().unwrap();
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![FocusMode::Off, FocusMode::Off]
        );
    }

    #[test]
    fn test_predictor_error_skips_tick() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let control = control(
            &dir,
            FixedScore(Err(|| PredictorError::InsufficientHistory { have: 3, need: 15 })),
            recorder.clone(),
        );

        assert!(matches!(control.tick(), Err(ControlError::Predictor(_))));
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert_eq!(control.applied_mode(), None);
        assert_eq!(control.stats.snapshot().decisions_skipped, 1);

        let decisions = std::fs::read_to_string(dir.path().join("decisions.csv")).unwrap();
        assert_eq!(decisions, "timestamp,score\n");
    }

    #[test]
    fn test_setter_failure_keeps_previous_mode() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(&dir, FixedScore(Ok(0.9)), Recorder::default());
        control.tick().unwrap();

        let failing = ControlLoop {
            setter: Box::new(Recorder {
                fail: true,
                ..Recorder::default()
            }),
            predictor: Box::new(FixedScore(Ok(0.1))),
            ..control
        };
        assert!(matches!(failing.tick(), Err(ControlError::Mode(_))));
        assert_eq!(failing.applied_mode(), Some(FocusMode::Focus));
        assert_eq!(failing.last_decision().unwrap().score, 0.9);
    }

    #[test]
    fn test_slow_setter_does_not_block_status_or_pile_up() {
        use crossbeam_channel::bounded;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let control = Arc::new(control(
            &dir,
            FixedScore(Ok(0.9)),
            Blocking {
                entered: entered_tx,
                release: release_rx,
            },
        ));

        let first = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || control.tick())
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Status reads return while the setter is stuck.
        let (status_tx, status_rx) = bounded(1);
        {
            let control = Arc::clone(&control);
            std::thread::spawn(move || {
                let _ = status_tx.send((control.applied_mode(), control.last_decision()));
            });
        }
        let (applied, last) = status_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(applied, None);
        assert!(last.is_none());

        // A second tick is skipped instead of queueing behind the first.
        assert!(matches!(control.tick(), Err(ControlError::Busy)));
        assert_eq!(control.stats.snapshot().decisions_skipped, 1);

        release_tx.send(()).unwrap();
        assert_eq!(first.join().unwrap().unwrap().mode, FocusMode::Focus);
        assert_eq!(control.applied_mode(), Some(FocusMode::Focus));
    }
}
