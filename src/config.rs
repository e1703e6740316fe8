//! Configuration for the flowd daemon.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Period of the aggregation tick, in (fractional) seconds
    #[serde(with = "duration_serde")]
    pub collect_interval: Duration,

    /// Run the control loop every N aggregation ticks
    pub control_every: u32,

    /// Number of most recent pivot rows handed to the predictor
    pub window_size: usize,

    /// Scores strictly above this value switch focus mode on
    pub threshold: f64,

    /// How long `stop` waits for each runner, in milliseconds
    pub stop_timeout_ms: u64,

    /// Directory holding the metric, pivot and decision logs
    pub data_path: PathBuf,

    /// Labelled pivot history used to train the model
    pub training_data: Option<PathBuf>,

    /// IANA timezone for log timestamps (local time when unset)
    pub timezone: Option<String>,

    /// Collector names that are never instantiated
    pub disabled_collectors: Vec<String>,

    /// Program and arguments invoked with the focus level appended
    pub mode_command: Option<Vec<String>>,

    /// How long the mode command may run before it is killed, in milliseconds
    pub mode_timeout_ms: u64,

    /// Seconds without input before the user counts as away
    pub afk_timeout_secs: u64,

    /// Gaps between mouse events longer than this do not count as use
    pub mouse_idle_gap_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowd");

        Self {
            collect_interval: Duration::from_secs(60),
            control_every: 1,
            window_size: 15,
            threshold: 0.70,
            stop_timeout_ms: 2_000,
            training_data: Some(data_dir.join("training.csv")),
            data_path: data_dir,
            timezone: None,
            disabled_collectors: Vec::new(),
            mode_command: None,
            mode_timeout_ms: 5_000,
            afk_timeout_secs: 30,
            mouse_idle_gap_secs: 3.0,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowd")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Check value ranges that would make the daemon misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collect_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "collect_interval must be positive".into(),
            ));
        }
        if self.control_every == 0 {
            return Err(ConfigError::Invalid("control_every must be at least 1".into()));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        if !self.mouse_idle_gap_secs.is_finite() || self.mouse_idle_gap_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "mouse_idle_gap_secs must be positive".into(),
            ));
        }
        if let Some(tz) = &self.timezone {
            tz.parse::<chrono_tz::Tz>()
                .map_err(|e| ConfigError::Invalid(format!("timezone {tz:?}: {e}")))?;
        }
        if self.mode_timeout_ms == 0 {
            return Err(ConfigError::Invalid("mode_timeout_ms must be positive".into()));
        }
        if matches!(&self.mode_command, Some(cmd) if cmd.is_empty()) {
            return Err(ConfigError::Invalid("mode_command must not be empty".into()));
        }
        Ok(())
    }

    /// Timeout handed to every runner on shutdown.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn mode_timeout(&self) -> Duration {
        Duration::from_millis(self.mode_timeout_ms)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_collectors.iter().any(|d| d == name)
    }

    pub fn long_log_path(&self) -> PathBuf {
        self.data_path.join("data.csv")
    }

    pub fn pivot_log_path(&self) -> PathBuf {
        self.data_path.join("data_pivot.csv")
    }

    pub fn decision_log_path(&self) -> PathBuf {
        self.data_path.join("decisions.csv")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    pub fn model_path(&self) -> PathBuf {
        self.data_path.join("model.json")
    }
}

/// Serde support for Duration as seconds, fractions allowed.
mod duration_serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
