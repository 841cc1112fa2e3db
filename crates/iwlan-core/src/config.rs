//! Configuration resolution for the IWLAN service.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/iwlan/settings.json`)
//! 3. Explicit config file (JSON, or TOML by extension)
//! 4. Environment variables
//! 5. CLI arguments (applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub dispatcher: DispatcherConfig,
    pub policy: PolicyConfig,
    pub tunnel: TunnelConfig,
    pub stats: StatsConfig,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            policy: PolicyConfig::default(),
            tunnel: TunnelConfig::default(),
            stats: StatsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Event queue sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Bounded capacity of the worker's event queue.
    pub queue_capacity: usize,
    /// Capacity of each slot's data-call-list-changed broadcast.
    pub list_changed_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            list_changed_capacity: 32,
        }
    }
}

/// Error policy sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Replaces the bundled default policy document when set.
    pub default_policy_path: Option<PathBuf>,
}

/// Values reported in data call responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub link_mtu: u32,
    /// MTU used when the default transport is cellular (cross-SIM).
    pub cellular_link_mtu: u32,
    /// Retry hint for a bring-up that closed without a recorded error.
    pub closed_without_error_retry_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            link_mtu: 1280,
            cellular_link_mtu: 1200,
            closed_without_error_retry_ms: 5000,
        }
    }
}

/// Bounds on in-memory statistics before they are reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub max_apns: usize,
    pub max_samples: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_apns: 10,
            max_samples: 1000,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<ServiceConfig> {
    let mut config = match global_config_path() {
        Some(path) if path.exists() => load_config_file(&path)?,
        _ => ServiceConfig::default(),
    };

    if let Some(path) = explicit {
        config = load_config_file(path)?;
    }

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("iwlan").join("settings.json"))
}

/// Read one config file. `.toml` files are parsed as TOML, anything else as
/// JSON.
pub fn load_config_file(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    if is_toml {
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    } else {
        serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }
}

/// Apply `IWLAN_*` overrides read through `lookup`.
pub fn apply_overrides(config: &mut ServiceConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("IWLAN_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
        config.dispatcher.queue_capacity = n;
    }
    if let Some(level) = lookup("IWLAN_LOG_LEVEL") {
        config.log_level = level;
    }
    if let Some(path) = lookup("IWLAN_DEFAULT_POLICY_PATH") {
        config.policy.default_policy_path = Some(PathBuf::from(path));
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_link_constants() {
        let config = ServiceConfig::default();
        assert_eq!(config.tunnel.link_mtu, 1280);
        assert_eq!(config.tunnel.cellular_link_mtu, 1200);
        assert_eq!(config.stats.max_samples, 1000);
        assert_eq!(config.policy.default_policy_path, None);
    }

    #[test]
    fn partial_json_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"dispatcher": {"queue_capacity": 8}, "log_level": "debug"}"#)
            .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.dispatcher.queue_capacity, 8);
        assert_eq!(config.dispatcher.list_changed_capacity, 32);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.tunnel, TunnelConfig::default());
    }

    #[test]
    fn toml_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[stats]\nmax_apns = 3\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.stats.max_apns, 3);
        assert_eq!(config.stats.max_samples, 1000);
    }

    #[test]
    fn unreadable_or_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config_file(&dir.path().join("absent.json")),
            Err(Error::Config(_))
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let mut config = ServiceConfig::default();
        apply_overrides(&mut config, |key| match key {
            "IWLAN_QUEUE_CAPACITY" => Some("not-a-number".to_string()),
            "IWLAN_LOG_LEVEL" => Some("trace".to_string()),
            "IWLAN_DEFAULT_POLICY_PATH" => Some("/etc/iwlan/defaults.json".to_string()),
            _ => None,
        });
        assert_eq!(config.dispatcher.queue_capacity, 256);
        assert_eq!(config.log_level, "trace");
        assert_eq!(
            config.policy.default_policy_path,
            Some(PathBuf::from("/etc/iwlan/defaults.json"))
        );
    }
}
