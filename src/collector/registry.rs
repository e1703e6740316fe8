//! Compile-time collector manifest and discovery.
//!
//! Adding a collector means writing a type that implements [`Collector`] and
//! listing it in [`MANIFEST`]. Discovery instantiates every entry exactly once,
//! drops entries that fail their contract check, and returns the survivors in
//! byte-wise lexicographic name order. That order becomes the frozen column
//! order of the pivot log.

use crate::collector::afk::{AfkCollector, NoopIdleClock};
use crate::collector::heartbeat::HeartbeatCollector;
use crate::collector::input::{InputFeed, KeystrokeCollector, MouseUsedCollector};
use crate::collector::traits::Collector;
use crate::config::Config;
use crate::error::DiscoveryError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Constructor for one collector implementation.
pub type BuildFn = fn(&Config) -> Result<Box<dyn Collector>, DiscoveryError>;

/// A manifest entry.
#[derive(Clone, Copy)]
pub struct Registration {
    pub name: &'static str,
    pub build: BuildFn,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Collectors compiled into the daemon.
pub const MANIFEST: &[Registration] = &[
    Registration {
        name: AfkCollector::<NoopIdleClock>::NAME,
        build: build_afk,
    },
    Registration {
        name: HeartbeatCollector::NAME,
        build: build_heartbeat,
    },
    Registration {
        name: KeystrokeCollector::NAME,
        build: build_keystrokes,
    },
    Registration {
        name: MouseUsedCollector::NAME,
        build: build_mouse_used,
    },
];

fn build_afk(config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    Ok(Box::new(AfkCollector::new(
        NoopIdleClock,
        Duration::from_secs(config.afk_timeout_secs),
    )))
}

fn build_heartbeat(_config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    Ok(Box::new(HeartbeatCollector::default()))
}

fn build_keystrokes(_config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    Ok(Box::new(KeystrokeCollector::new(InputFeed::noop())))
}

fn build_mouse_used(config: &Config) -> Result<Box<dyn Collector>, DiscoveryError> {
    let gap = Duration::try_from_secs_f64(config.mouse_idle_gap_secs).map_err(|e| {
        DiscoveryError::Construct {
            name: MouseUsedCollector::NAME.into(),
            reason: e.to_string(),
        }
    })?;
    Ok(Box::new(MouseUsedCollector::new(InputFeed::noop(), gap)))
}

/// Whether `name` can be written as a CSV column without quoting.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains([',', '\r', '\n'])
}

/// Result of running discovery over a manifest.
pub struct Registry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl Registry {
    /// Instantiate every usable entry of `manifest`.
    ///
    /// Failures are logged and skipped; discovery itself never fails.
    pub fn discover(manifest: &[Registration], config: &Config) -> Self {
        let mut seen = HashSet::new();
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

        for registration in manifest {
            if config.is_disabled(registration.name) {
                tracing::info!(collector = registration.name, "collector disabled by config");
                continue;
            }

            match Self::instantiate(registration, &seen, config) {
                Ok(collector) => {
                    seen.insert(registration.name);
                    tracing::info!(collector = registration.name, "found a metric collector");
                    collectors.push(Arc::from(collector));
                }
                Err(e) => {
                    tracing::warn!(collector = registration.name, error = %e, "skipping collector");
                }
            }
        }

        collectors.sort_by(|a, b| a.name().cmp(b.name()));
        Self { collectors }
    }

    fn instantiate(
        registration: &Registration,
        seen: &HashSet<&'static str>,
        config: &Config,
    ) -> Result<Box<dyn Collector>, DiscoveryError> {
        if !is_valid_name(registration.name) {
            return Err(DiscoveryError::InvalidName(registration.name.to_string()));
        }
        if seen.contains(registration.name) {
            return Err(DiscoveryError::Duplicate(registration.name.to_string()));
        }

        let collector = (registration.build)(config)?;
        if collector.name() != registration.name {
            return Err(DiscoveryError::NameMismatch {
                expected: registration.name.to_string(),
                actual: collector.name().to_string(),
            });
        }
        Ok(collector)
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        &self.collectors
    }

    pub fn into_collectors(self) -> Vec<Arc<dyn Collector>> {
        self.collectors
    }

    /// Column names in frozen order.
    pub fn names(&self) -> Vec<String> {
        self.collectors.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
