//! The external focus-mode mutator.

use crate::error::ModeError;
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Default limit on how long the mode command may run.
pub const DEFAULT_MODE_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// System focus level. The numeric values are what the OS expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    Off = 0,
    Focus = 2,
}

impl FocusMode {
    pub fn level(self) -> u8 {
        self as u8
    }

    /// `Focus` when `score` is strictly above `threshold`.
    pub fn decide(score: f64, threshold: f64) -> Self {
        if score > threshold {
            Self::Focus
        } else {
            Self::Off
        }
    }
}

impl std::fmt::Display for FocusMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Focus => write!(f, "focus"),
        }
    }
}

/// Applies a focus mode to the system.
pub trait ModeSetter: Send + Sync {
    fn set_external_mode(&self, mode: FocusMode) -> Result<(), ModeError>;
}

/// Only logs the requested mode.
#[derive(Debug, Default)]
pub struct LogModeSetter;

impl ModeSetter for LogModeSetter {
    fn set_external_mode(&self, mode: FocusMode) -> Result<(), ModeError> {
        tracing::info!(mode = %mode, level = mode.level(), "focus mode requested");
        Ok(())
    }
}

/// Runs a command with the numeric level appended as its last argument.
///
/// A command still running after the timeout is killed and reported as
/// [`ModeError::TimedOut`].
#[derive(Debug, Clone)]
pub struct CommandModeSetter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandModeSetter {
    pub fn new(command: &[String]) -> Result<Self, ModeError> {
        let (program, args) = command.split_first().ok_or(ModeError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: DEFAULT_MODE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ModeSetter for CommandModeSetter {
    fn set_external_mode(&self, mode: FocusMode) -> Result<(), ModeError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(mode.level().to_string())
            .stdin(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    tracing::warn!(error = %e, program = %self.program, "could not kill mode command");
                }
                // Reap so the child does not linger as a zombie.
                let _ = child.wait();
                return Err(ModeError::TimedOut(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(ModeError::ExitStatus(status.to_string()));
        }
        tracing::info!(mode = %mode, program = %self.program, "focus mode applied");
        Ok(())
    }
}
