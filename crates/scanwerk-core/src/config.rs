// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Result, ScanwerkError};

/// Persistent client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Delay before the next read after a read that produced data.
    pub fast_poll_ms: u64,
    /// Delay before the next read after an idle read.
    pub slow_poll_ms: u64,
    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Trace-level logging for the engine crate.
    pub debug_engine: bool,
    /// Log every serialized engine call with its outcome.
    pub debug_calls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fast_poll_ms: 10,
            slow_poll_ms: 200,
            log_filter: "info".into(),
            debug_engine: false,
            debug_calls: false,
        }
    }
}

impl ClientConfig {
    pub fn fast_poll(&self) -> Duration {
        Duration::from_millis(self.fast_poll_ms)
    }

    pub fn slow_poll(&self) -> Duration {
        Duration::from_millis(self.slow_poll_ms)
    }

    /// Load settings from a JSON file. Missing fields take their defaults.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ScanwerkError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ScanwerkError::Config(format!("parse {}: {e}", path.display())))?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Write settings as pretty-printed JSON.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ScanwerkError::Config(format!("serialize: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| ScanwerkError::Config(format!("write {}: {e}", path.display())))?;
        info!("configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_protocol_poll_intervals() {
        let config = ClientConfig::default();
        assert_eq!(config.fast_poll(), Duration::from_millis(10));
        assert_eq!(config.slow_poll(), Duration::from_millis(200));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scanwerk.json");
        let config = ClientConfig {
            slow_poll_ms: 500,
            debug_calls: true,
            ..Default::default()
        };
        config.save(&path).expect("save");

        let loaded = ClientConfig::load(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "fast_poll_ms": 5 }"#).expect("write");

        let loaded = ClientConfig::load(&path).expect("load");
        assert_eq!(loaded.fast_poll_ms, 5);
        assert_eq!(loaded.slow_poll_ms, 200);
        assert_eq!(loaded.log_filter, "info");
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = ClientConfig::load(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ScanwerkError::Config(_))));
    }
}
