//! flowd - a flow-state daemon.
//!
//! flowd samples a set of independent behavioral signals, aggregates them
//! into a time series at a fixed interval, and feeds the recent series to a
//! predictor whose score toggles the system focus mode.
//!
//! # Guarantees
//!
//! - **Failure isolation**: a collector that errors or panics only marks its
//!   own runner dead; its column reads `-1` from then on
//! - **Stable columns**: the pivot log's column order is frozen at startup
//! - **Serialized ticks**: no two aggregation ticks ever interleave their lines
//! - **Bounded shutdown**: stopping never waits longer than the configured
//!   timeout per collector
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Supervisor                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐    ┌──────────┐    ┌────────────┐              │
//! │  │ Registry │──▶│ Runners  │──▶│ Aggregator │──▶ data.csv   │
//! │  │(manifest)│    │(1 thread │    │ (per tick) │   data_pivot │
//! │  └──────────┘    │ each)    │    └────────────┘              │
//! │                  └──────────┘          │                     │
//! │                                        ▼                     │
//! │                 ┌───────────┐    ┌────────────┐              │
//! │                 │ModeSetter │◀──│ ControlLoop│──▶ decisions │
//! │                 └───────────┘    │ (Predictor)│              │
//! │                                  └────────────┘              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use flowd::{Config, Supervisor};
//! use std::time::Duration;
//!
//! let supervisor = Supervisor::new(Config::load().unwrap_or_default());
//! supervisor.configure().expect("configure");
//!
//! let token = supervisor.shutdown_token();
//! ctrlc::set_handler(move || token.cancel()).expect("signal handler");
//!
//! supervisor.run().expect("run");
//! supervisor.stop(Duration::from_secs(2));
//! ```

pub mod aggregate;
pub mod cancel;
pub mod collector;
pub mod config;
pub mod control;
pub mod error;
pub mod runner;
pub mod stats;
pub mod storage;
pub mod supervisor;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use aggregate::Aggregator;
pub use cancel::CancelToken;
pub use collector::{Collector, Registration, Registry, Snapshot, DEAD_VALUE, MANIFEST};
pub use config::Config;
pub use control::{ControlLoop, Decision, FocusMode, LogisticPredictor, ModeSetter, Predictor};
pub use error::{
    AggregationError, CollectorError, ConfigError, ControlError, DiscoveryError, ModeError,
    PredictorError, RunnerError, SupervisorError,
};
pub use runner::{Runner, RunnerState, RunnerStatus, StopOutcome};
pub use stats::{SessionStats, SharedStats, StatsSnapshot};
pub use storage::{Clock, LogStore, PivotHistory, PivotRow, SnapshotRow};
pub use supervisor::{StopReport, Supervisor, SupervisorStatus};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
