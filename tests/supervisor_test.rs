//! End-to-end tests for the supervisor, runners and aggregation.

use flowd::cancel::CancelToken;
use flowd::collector::{Accumulator, Collector, Registration, Snapshot};
use flowd::config::Config;
use flowd::control::{FocusMode, ModeSetter, Predictor};
use flowd::error::{CollectorError, DiscoveryError, ModeError, PredictorError};
use flowd::storage::{Clock, LogStore, PivotHistory, PivotRow};
use flowd::{Aggregator, Runner, SessionStats, Supervisor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

static ALPHA_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Adds one every few milliseconds until cancelled.
struct Counting {
    name: &'static str,
    value: Accumulator,
    total: Option<&'static AtomicU64>,
    stop: CancelToken,
}

impl Counting {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            value: Accumulator::new(),
            total: None,
            stop: CancelToken::new(),
        }
    }
}

impl Collector for Counting {
    fn name(&self) -> &str {
        self.name
    }

    fn start_collect(&self, shutdown: &CancelToken) -> Result<(), CollectorError> {
        while !shutdown.is_cancelled() && !self.stop.wait_timeout(Duration::from_millis(5)) {
            self.value.add(1.0);
            if let Some(total) = self.total {
                total.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn stop_collect(&self) {
        self.stop.cancel();
    }

    fn get_current_state(&self) -> Snapshot {
        Snapshot::new(self.name, self.value.get())
    }

    fn cleanup(&self) {
        self.value.reset();
    }
}

/// Fails on its first iteration.
struct Broken;

impl Collector for Broken {
    fn name(&self) -> &str {
        "beta"
    }
    fn start_collect(&self, _shutdown: &CancelToken) -> Result<(), CollectorError> {
        Err(CollectorError::Sensing("device unavailable".into()))
    }
    fn stop_collect(&self) {}
    fn get_current_state(&self) -> Snapshot {
        Snapshot::new("beta", 0.0)
    }
    fn cleanup(&self) {}
}

fn build_alpha(_config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    let mut collector = Counting::new("alpha");
    collector.total = Some(&ALPHA_TOTAL);
    Ok(Box::new(collector))
}

fn build_beta(_config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    Ok(Box::new(Broken))
}

fn build_gamma(_config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    Ok(Box::new(Counting::new("gamma")))
}

fn build_misnamed(_config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    Ok(Box::new(Counting::new("something_else")))
}

/// Registered out of order; discovery sorts them.
const MANIFEST: &[Registration] = &[
    Registration {
        name: "gamma",
        build: build_gamma,
    },
    Registration {
        name: "alpha",
        build: build_alpha,
    },
    Registration {
        name: "beta",
        build: build_beta,
    },
    Registration {
        name: "delta",
        build: build_misnamed,
    },
];

struct ConstantScore(f64);

impl Predictor for ConstantScore {
    fn train(&mut self, _columns: &[String]) -> Result<(), PredictorError> {
        Ok(())
    }

    fn predict(&self, rows: &[PivotRow], window_size: usize) -> Result<f64, PredictorError> {
        if rows.len() < window_size {
            return Err(PredictorError::InsufficientHistory {
                have: rows.len(),
                need: window_size,
            });
        }
        Ok(self.0)
    }
}

#[derive(Clone, Default)]
struct RecordingSetter {
    calls: Arc<Mutex<Vec<FocusMode>>>,
}

impl ModeSetter for RecordingSetter {
    fn set_external_mode(&self, mode: FocusMode) -> Result<(), ModeError> {
        self.calls.lock().unwrap().push(mode);
        Ok(())
    }
}

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        data_path: dir.path().to_path_buf(),
        training_data: None,
        collect_interval: Duration::from_millis(50),
        window_size: 2,
        stop_timeout_ms: 500,
        ..Config::default()
    }
}

#[test]
fn test_end_to_end_run() {
    let dir = tempfile::tempdir().unwrap();
    let setter = RecordingSetter::default();

    let supervisor = Arc::new(
        Supervisor::new(test_config(&dir))
            .with_manifest(MANIFEST)
            .with_predictor(ConstantScore(0.81))
            .with_mode_setter(setter.clone()),
    );
    supervisor.configure().unwrap();
    assert_eq!(supervisor.columns(), vec!["alpha", "beta", "gamma"]);

    let handle = {
        let supervisor = Arc::clone(&supervisor);
        thread::spawn(move || supervisor.run())
    };
    thread::sleep(Duration::from_millis(600));
    supervisor.shutdown_token().cancel();
    handle.join().unwrap().unwrap();
    // Let in-flight tick threads finish their writes.
    thread::sleep(Duration::from_millis(100));

    let report = supervisor.stop(Duration::from_millis(500));
    assert!(report.timed_out.is_empty(), "{report:?}");
    assert_eq!(report.finished.len(), 3);

    let pivot = std::fs::read_to_string(dir.path().join("data_pivot.csv")).unwrap();
    let mut lines = pivot.lines();
    assert_eq!(lines.next(), Some("timestamp,alpha,beta,gamma"));
    let rows: Vec<Vec<&str>> = lines.map(|l| l.split(',').collect()).collect();
    assert!(rows.len() >= 3, "only {} rows", rows.len());

    let mut alpha_sum = 0.0;
    for row in &rows {
        assert_eq!(row.len(), 4);
        assert_eq!(row[2], "-1", "dead collector must report -1");
        alpha_sum += row[1].parse::<f64>().unwrap();
    }
    // Popped counts never exceed what the collector produced.
    assert!(alpha_sum > 0.0);
    assert!(alpha_sum <= ALPHA_TOTAL.load(Ordering::SeqCst) as f64);

    let long = std::fs::read_to_string(dir.path().join("data.csv")).unwrap();
    assert_eq!(long.lines().count(), rows.len() * 3);

    let calls = setter.calls.lock().unwrap().clone();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|m| *m == FocusMode::Focus));

    let decisions = std::fs::read_to_string(dir.path().join("decisions.csv")).unwrap();
    let mut decision_lines = decisions.lines();
    assert_eq!(decision_lines.next(), Some("timestamp,score"));
    assert_eq!(decision_lines.count(), calls.len());

    let status = supervisor.status();
    assert_eq!(status.applied_mode, Some(FocusMode::Focus));
    assert_eq!(status.stats.runner_deaths, 1);
    assert!(status.runners.iter().any(|r| r.name == "beta" && r.dead));
}

#[test]
fn test_restart_keeps_single_header_and_counters() {
    let dir = tempfile::tempdir().unwrap();

    for _ in 0..2 {
        let supervisor = Arc::new(
            Supervisor::new(test_config(&dir))
                .with_manifest(&MANIFEST[..1])
                .with_predictor(ConstantScore(0.5))
                .with_mode_setter(RecordingSetter::default()),
        );
        supervisor.configure().unwrap();

        let handle = {
            let supervisor = Arc::clone(&supervisor);
            thread::spawn(move || supervisor.run())
        };
        thread::sleep(Duration::from_millis(200));
        supervisor.shutdown_token().cancel();
        handle.join().unwrap().unwrap();
        thread::sleep(Duration::from_millis(100));
        supervisor.stop(Duration::from_millis(500));
    }

    let pivot = std::fs::read_to_string(dir.path().join("data_pivot.csv")).unwrap();
    let headers = pivot.lines().filter(|l| l.starts_with("timestamp")).count();
    assert_eq!(headers, 1);

    // Counters carry over between sessions.
    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("stats.json")).unwrap())
            .unwrap();
    let ticks = stats["ticks_completed"].as_u64().unwrap();
    assert_eq!(ticks as usize, pivot.lines().count() - 1);
}

#[test]
fn test_concurrent_ticks_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = CancelToken::new();
    let names = ["a", "b", "c"];

    let runners: Vec<Arc<Runner>> = names
        .iter()
        .map(|&name| {
            let collector = Counting::new(name);
            collector.value.add(1.0);
            Arc::new(Runner::new(Arc::new(collector), shutdown.clone()))
        })
        .collect();
    let columns = names.iter().map(|n| n.to_string()).collect();
    let store = LogStore::open(
        dir.path().join("data.csv"),
        dir.path().join("data_pivot.csv"),
        dir.path().join("decisions.csv"),
        columns,
    )
    .unwrap();
    let aggregator = Arc::new(Aggregator::new(
        runners,
        store,
        Arc::new(PivotHistory::new(500)),
        Clock::Local,
        Arc::new(SessionStats::new()),
    ));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                for _ in 0..25 {
                    aggregator.tick().unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let long = std::fs::read_to_string(dir.path().join("data.csv")).unwrap();
    let lines: Vec<&str> = long.lines().collect();
    assert_eq!(lines.len(), 200 * 3);
    for group in lines.chunks(3) {
        let fields: Vec<Vec<&str>> = group.iter().map(|l| l.split(',').collect()).collect();
        let group_names: Vec<&str> = fields.iter().map(|f| f[0]).collect();
        assert_eq!(group_names, names);
        assert!(fields.iter().all(|f| f[2] == fields[0][2]));
    }

    let pivot = std::fs::read_to_string(dir.path().join("data_pivot.csv")).unwrap();
    assert_eq!(pivot.lines().count(), 201);
    assert_eq!(aggregator.history().len(), 200);

    // Only the first tick saw the seeded value.
    let ones = pivot.lines().skip(1).filter(|l| l.ends_with(",1,1,1")).count();
    assert_eq!(ones, 1);
}

#[test]
fn test_blocked_collector_does_not_delay_stop() {
    struct Stuck;

    impl Collector for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }
        fn start_collect(&self, _shutdown: &CancelToken) -> Result<(), CollectorError> {
            // Never checks for cancellation.
            thread::sleep(Duration::from_secs(5));
            Ok(())
        }
        fn stop_collect(&self) {}
        fn get_current_state(&self) -> Snapshot {
            Snapshot::new("stuck", 0.0)
        }
        fn cleanup(&self) {}
    }

    fn build_stuck(_config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
        Ok(Box::new(Stuck))
    }

    let dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(
        Supervisor::new(test_config(&dir))
            .with_manifest(&[Registration {
                name: "stuck",
                build: build_stuck,
            }])
            .with_mode_setter(RecordingSetter::default()),
    );
    supervisor.configure().unwrap();

    let handle = {
        let supervisor = Arc::clone(&supervisor);
        thread::spawn(move || supervisor.run())
    };
    thread::sleep(Duration::from_millis(100));
    supervisor.shutdown_token().cancel();
    handle.join().unwrap().unwrap();

    let started = std::time::Instant::now();
    let report = supervisor.stop(Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(report.timed_out, vec!["stuck".to_string()]);
    assert_eq!(supervisor.stats().snapshot().shutdown_timeouts, 1);
}
