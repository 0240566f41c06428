//! Runtime configuration.
//!
//! Loaded from YAML with strict key checking: a typo in a config file is a
//! startup error, never a silently-applied default.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use driftsync_core::{DriftError, Result};

/// Timeouts and capacity limits for the runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Deadline for an outbound connect, handshake included (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Deadline for one awaited call (milliseconds).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Interval between transport-level pings (milliseconds).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// A peer silent this long is disconnected (milliseconds).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Upper bound on concurrently executing request dispatches.
    #[serde(default = "default_max_inflight_dispatch")]
    pub max_inflight_dispatch: usize,
    /// Per-session outbound frame queue depth.
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_max_inflight_dispatch() -> usize {
    256
}

fn default_outbound_queue_depth() -> usize {
    1_024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_inflight_dispatch: default_max_inflight_dispatch(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DriftError::Config(format!("read {}: {e}", path.as_ref().display())))?;
        let cfg: Self = serde_yaml::from_str(&raw)
            .map_err(|e| DriftError::Config(format!("parse {}: {e}", path.as_ref().display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(DriftError::Config("connect_timeout_ms must be > 0".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(DriftError::Config("call_timeout_ms must be > 0".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(DriftError::Config(
                "heartbeat_interval_ms must be > 0".into(),
            ));
        }
        if self.idle_timeout_ms <= self.heartbeat_interval_ms {
            return Err(DriftError::Config(
                "idle_timeout_ms must exceed heartbeat_interval_ms".into(),
            ));
        }
        if self.max_inflight_dispatch == 0 {
            return Err(DriftError::Config(
                "max_inflight_dispatch must be >= 1".into(),
            ));
        }
        if self.outbound_queue_depth == 0 {
            return Err(DriftError::Config(
                "outbound_queue_depth must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RuntimeConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.call_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_inflight_dispatch, 256);
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg: RuntimeConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.heartbeat_interval_ms, 10_000);
        assert_eq!(cfg.outbound_queue_depth, 1_024);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let res: std::result::Result<RuntimeConfig, _> =
            serde_yaml::from_str("call_timout_ms: 100\n");
        assert!(res.is_err());
    }

    #[test]
    fn idle_must_exceed_heartbeat() {
        let cfg: RuntimeConfig = serde_yaml::from_str(
            "heartbeat_interval_ms: 10000\nidle_timeout_ms: 5000\n",
        )
        .unwrap();
        assert!(matches!(cfg.validate(), Err(DriftError::Config(_))));
    }

    #[test]
    fn zero_inflight_is_rejected() {
        let cfg: RuntimeConfig = serde_yaml::from_str("max_inflight_dispatch: 0\n").unwrap();
        assert!(matches!(cfg.validate(), Err(DriftError::Config(_))));
    }
}
