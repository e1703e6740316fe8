//! Error types for the flowd daemon.
//!
//! Every failure a single collector, tick or decision can produce is
//! represented here. None of them is allowed to take the process down; the
//! only fatal startup conditions are a bad configuration and an empty
//! collector set.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialize error: {0}")]
    Serialize(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A collector implementation failed its contract check at discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("collector '{name}' failed to construct: {reason}")]
    Construct { name: String, reason: String },

    #[error("collector name {0:?} is not usable as a log column")]
    InvalidName(String),

    #[error("collector registered as '{expected}' reports name '{actual}'")]
    NameMismatch { expected: String, actual: String },

    #[error("collector '{0}' is registered more than once")]
    Duplicate(String),
}

/// Errors escaping a collector's sampling loop.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("sensing failed: {0}")]
    Sensing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input source disconnected")]
    Disconnected,

    #[error("collector panicked: {0}")]
    Panicked(String),
}

/// Runner lifecycle misuse.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner '{0}' was already started")]
    AlreadyStarted(String),

    #[error("failed to spawn thread for runner '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A log write failed during an aggregation tick.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("failed to write {log} log: {source}")]
    Io {
        log: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// The predictor could not produce a score.
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("model is not trained")]
    Untrained,

    #[error("insufficient history: have {have} rows, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid score {0}")]
    InvalidScore(f64),

    #[error("training failed: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The external mode mutator failed.
#[derive(Debug, Error)]
pub enum ModeError {
    #[error("failed to launch mode command: {0}")]
    Launch(#[from] std::io::Error),

    #[error("mode command exited with {0}")]
    ExitStatus(String),

    #[error("mode command is empty")]
    EmptyCommand,

    #[error("mode command did not finish within {0:?}")]
    TimedOut(std::time::Duration),
}

/// A control-loop tick did not apply a decision.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("prediction skipped: {0}")]
    Predictor(#[from] PredictorError),

    #[error("failed to apply mode: {0}")]
    Mode(#[from] ModeError),

    #[error("failed to record decision: {0}")]
    Record(#[from] AggregationError),

    #[error("previous control tick is still running")]
    Busy,
}

/// Supervisor-level failures.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare storage: {0}")]
    Storage(#[from] std::io::Error),

    #[error("configure() must be called before run()")]
    NotConfigured,

    #[error("no collector implementations were discovered")]
    NoCollectors,

    #[error("supervisor is already running")]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PredictorError::InsufficientHistory { have: 3, need: 15 };
        assert_eq!(err.to_string(), "insufficient history: have 3 rows, need 15");

        let err = ControlError::from(PredictorError::Untrained);
        assert!(err.to_string().contains("not trained"));

        let err = DiscoveryError::NameMismatch {
            expected: "afk".into(),
            actual: "idle".into(),
        };
        assert!(err.to_string().contains("'afk'"));
    }
}
