//! Runtime configuration.
//!
//! Built-in defaults, then an optional YAML file, then `FLEET_*` environment
//! variables. The kind registry travels inside the config and is handed to
//! the services that need it; nothing reads it from global state.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleet_core::KindRegistry;
use fleet_persist::StoreConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub db_path: PathBuf,
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
    /// Deadline applied to every API call.
    pub request_timeout_ms: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub kinds: KindRegistry,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: 4,
            busy_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            default_page_size: 20,
            max_page_size: 500,
            kinds: KindRegistry::reference(),
        }
    }
}

impl FleetConfig {
    /// Defaults, overlaid with `path` (if any), overlaid with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|source| ConfigError::Io { path: p.to_path_buf(), source })?;
                Self::from_yaml_str(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(raw)?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(p) = lookup("FLEET_DB_PATH").filter(|s| !s.trim().is_empty()) {
            self.db_path = PathBuf::from(p);
        }
        if let Some(v) = lookup("FLEET_POOL_SIZE") {
            self.pool_size = parse_env("FLEET_POOL_SIZE", v)?;
        }
        if let Some(v) = lookup("FLEET_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env("FLEET_REQUEST_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("FLEET_MANDATORY_CONDITIONS") {
            let types: BTreeSet<String> =
                v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
            self.kinds
                .set_mandatory_everywhere(&types)
                .map_err(|_| ConfigError::InvalidEnv { var: "FLEET_MANDATORY_CONDITIONS", value: v })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size {} must be between 1 and max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.kinds.is_empty() {
            return Err(ConfigError::Invalid("at least one resource kind must be configured".into()));
        }
        self.kinds.validate().map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.db_path.clone(),
            pool_size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv { var, value })
}

fn default_db_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".fleet");
        p.push("fleet.db");
        return p;
    }
    // Fallback to current directory
    PathBuf::from("fleet.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = FleetConfig::default();
        cfg.validate().unwrap();
        let cluster = cfg.kinds.resolve("Cluster").unwrap();
        assert!(cluster.mandatory_conditions.contains("Health"));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let cfg = FleetConfig::from_yaml_str(
            "db_path: /tmp/x.db\nrequest_timeout_ms: 100\nkinds:\n  Cluster:\n    mandatoryConditions: [Ready]\n",
        )
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.request_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.pool_size, 4);
        assert!(cfg.kinds.resolve("NodePool").is_err());
        assert!(cfg.kinds.resolve("Cluster").unwrap().mandatory_conditions.contains("Ready"));
    }

    #[test]
    fn env_overrides_yaml() {
        let mut cfg = FleetConfig::default();
        cfg.apply_env(env(&[
            ("FLEET_DB_PATH", "/var/lib/fleet.db"),
            ("FLEET_POOL_SIZE", "8"),
            ("FLEET_MANDATORY_CONDITIONS", "Ready, Healthy"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/fleet.db"));
        assert_eq!(cfg.pool_size, 8);
        let m = &cfg.kinds.resolve("NodePool").unwrap().mandatory_conditions;
        assert_eq!(m.iter().map(String::as_str).collect::<Vec<_>>(), vec!["Healthy", "Ready"]);
    }

    #[test]
    fn bad_env_is_reported() {
        let mut cfg = FleetConfig::default();
        assert!(matches!(
            cfg.apply_env(env(&[("FLEET_POOL_SIZE", "many")])),
            Err(ConfigError::InvalidEnv { var: "FLEET_POOL_SIZE", .. })
        ));
        assert!(cfg.apply_env(env(&[("FLEET_MANDATORY_CONDITIONS", "ready")])).is_err());
    }

    #[test]
    fn validation_catches_nonsense() {
        let cfg = FleetConfig { default_page_size: 1_000, ..FleetConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = FleetConfig { kinds: KindRegistry::new(), ..FleetConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
