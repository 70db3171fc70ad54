// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scheduler configuration (JSON, serde defaults for every field).

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for loading a [`SchedulerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Tunables for a [`crate::Scheduler`] generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest the waiter sleeps between scans, even with nothing scheduled.
    pub wait_ceiling_ms: u64,
    /// Freeze all timers while the host is paused. Desktop-style hosts keep
    /// timers running in the background and set this to `false`.
    pub suspend_on_pause: bool,
    /// Name prefix for the waiter thread; the generation is appended.
    pub thread_name: String,
}

impl SchedulerConfig {
    /// Default [`SchedulerConfig::wait_ceiling_ms`].
    pub const DEFAULT_WAIT_CEILING_MS: u64 = 5000;
    /// Default [`SchedulerConfig::thread_name`].
    pub const DEFAULT_THREAD_NAME: &'static str = "echo-timer";

    /// Defaults for hosts whose timers keep running while paused.
    pub fn desktop() -> Self {
        Self {
            suspend_on_pause: false,
            ..Self::default()
        }
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Loads `path`. Returns `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Self::from_json_slice(&bytes).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// [`SchedulerConfig::wait_ceiling_ms`] as a `Duration`.
    pub fn wait_ceiling(&self) -> Duration {
        Duration::from_millis(self.wait_ceiling_ms)
    }

    /// Clamps values the waiter cannot honor: a zero ceiling would spin and a
    /// thread name may not contain NUL.
    pub(crate) fn normalized(mut self) -> Self {
        self.wait_ceiling_ms = self.wait_ceiling_ms.max(1);
        self.thread_name.retain(|c| c != '\0');
        if self.thread_name.is_empty() {
            self.thread_name = Self::DEFAULT_THREAD_NAME.to_string();
        }
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wait_ceiling_ms: Self::DEFAULT_WAIT_CEILING_MS,
            suspend_on_pause: true,
            thread_name: Self::DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = SchedulerConfig::from_json_slice(br#"{"suspend_on_pause": false}"#).unwrap();
        assert!(!cfg.suspend_on_pause);
        assert_eq!(cfg.wait_ceiling_ms, 5000);
        assert_eq!(cfg.thread_name, "echo-timer");
        assert_eq!(cfg, SchedulerConfig::desktop());
    }

    #[test]
    fn malformed_json_is_a_serde_error() {
        let err = SchedulerConfig::from_json_slice(b"{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Serde(_)));
    }

    #[test]
    fn missing_file_loads_as_none() {
        let path = std::env::temp_dir().join("echo-timer-config-does-not-exist.json");
        assert!(SchedulerConfig::load(&path).unwrap().is_none());
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!(
            "echo-timer-config-{}.json",
            std::process::id()
        ));
        fs::write(&path, br#"{"wait_ceiling_ms": 250, "thread_name": "bg"}"#).unwrap();
        let cfg = SchedulerConfig::load(&path).unwrap().unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(cfg.wait_ceiling(), Duration::from_millis(250));
        assert_eq!(cfg.thread_name, "bg");
        assert!(cfg.suspend_on_pause);
    }

    #[test]
    fn normalized_clamps_ceiling_and_name() {
        let cfg = SchedulerConfig {
            wait_ceiling_ms: 0,
            suspend_on_pause: true,
            thread_name: "\0".into(),
        }
        .normalized();
        assert_eq!(cfg.wait_ceiling_ms, 1);
        assert_eq!(cfg.thread_name, "echo-timer");
    }
}
