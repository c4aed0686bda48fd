//! Persisted configuration: providers, runtime thresholds and transport
//! endpoints. Writes are atomic (temp file + rename), matching the
//! teacher's `config.rs`; env vars seed the transport section on first
//! boot and are overridden by whatever is already on disk (spec.md §6).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no such provider: {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Remote,
}

/// A registered detector, persisted so the active provider survives a
/// restart (spec.md §3: ProviderRegistration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistration {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub connection_address: Option<String>,
    /// PEM-encoded pinned server certificate, embedded.
    #[serde(default)]
    pub server_certificate: Option<String>,
    pub active: bool,
}

/// Hot-reloadable scoring/routing knobs (spec.md §3: RuntimeConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub suspicion_threshold: i64,
    /// class-id -> weight, default 1.0 for unlisted classes.
    pub class_weights: HashMap<u32, f64>,
    pub active_provider: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let mut class_weights = HashMap::new();
        class_weights.insert(0, 1.6); // person
        class_weights.insert(1, 0.6); // bicycle
        class_weights.insert(2, 1.0); // car
        class_weights.insert(3, 1.0); // motorcycle
        class_weights.insert(5, 1.4); // bus
        class_weights.insert(7, 1.4); // truck
        Self {
            suspicion_threshold: 75,
            class_weights,
            active_provider: "local".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn class_weight(&self, class_id: Option<u32>) -> f64 {
        class_id
            .and_then(|id| self.class_weights.get(&id).copied())
            .unwrap_or(1.0)
    }

    /// Clamp and apply a SuspicionConfig control message (spec.md §4.6).
    pub fn apply_suspicion_config(&mut self, threshold: i64, class_weights: &HashMap<String, f64>) {
        self.suspicion_threshold = threshold.clamp(0, 100);
        if !class_weights.is_empty() {
            for (k, v) in class_weights {
                if let Ok(id) = k.parse::<u32>() {
                    self.class_weights.insert(id, *v);
                }
            }
        }
    }
}

/// Transport endpoints: camera address, control-API port, broker URL,
/// queue/topic names (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub camera_ip: String,
    pub camera_video_port: u16,
    pub camera_control_port: u16,
    pub broker_url: String,
    pub frame_mirror_ttl_ms: u64,
    pub web_port: u16,
}

impl TransportConfig {
    fn from_env() -> Self {
        Self {
            camera_ip: env_or("CAMERA_IP", "127.0.0.1"),
            camera_video_port: env_or("CAMERA_VIDEO_PORT", "9443").parse().unwrap_or(9443),
            camera_control_port: env_or("CAMERA_CONTROL_PORT", "8080")
                .parse()
                .unwrap_or(8080),
            broker_url: env_or("BROKER_URL", "mqtt://localhost:1883"),
            frame_mirror_ttl_ms: 100,
            web_port: 8088,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub providers: HashMap<String, ProviderRegistration>,
    pub runtime: RuntimeConfig,
    pub transport: TransportConfig,
    #[serde(skip, default = "default_config_path")]
    path: PathBuf,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config.json")
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "local".to_string(),
            ProviderRegistration {
                name: "local".to_string(),
                kind: ProviderKind::Local,
                connection_address: None,
                server_certificate: None,
                active: true,
            },
        );
        Self {
            providers,
            runtime: RuntimeConfig::default(),
            transport: TransportConfig::from_env(),
            path: default_config_path(),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Ok(contents) = fs::read_to_string(&path) {
            let mut config: AppConfig =
                serde_json::from_str(&contents).context("parsing config.json")?;
            config.path = path;
            return Ok(config);
        }
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(AppConfig {
            path,
            ..AppConfig::default()
        })
    }

    /// Atomic write: write to a temp file, then rename over the target
    /// (spec.md §5: "No globals except the persisted config file;
    /// updates are atomic-rename").
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} -> {}", tmp.display(), self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_provider(&mut self, provider: ProviderRegistration) {
        self.providers.insert(provider.name.clone(), provider);
    }

    pub fn remove_provider(&mut self, name: &str) {
        self.providers.remove(name);
    }

    /// Errors with `ConfigError::UnknownProvider` (and leaves state
    /// untouched) if `name` is not a registered provider, rather than
    /// silently pointing `active_provider` at a name nothing backs.
    pub fn set_active_provider(&mut self, name: &str) -> Result<(), ConfigError> {
        if !self.providers.contains_key(name) {
            return Err(ConfigError::UnknownProvider(name.to_string()));
        }
        for (p_name, provider) in self.providers.iter_mut() {
            provider.active = p_name == name;
        }
        self.runtime.active_provider = name.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_local_provider_active() {
        let config = AppConfig::default();
        assert!(config.providers["local"].active);
        assert_eq!(config.runtime.active_provider, "local");
    }

    #[test]
    fn set_active_provider_rejects_unknown_name() {
        let mut config = AppConfig::default();
        let err = config.set_active_provider("does-not-exist").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(name) if name == "does-not-exist"));
        assert_eq!(config.runtime.active_provider, "local");
    }

    #[test]
    fn atomic_save_and_reload_round_trips() {
        let dir = std::env::temp_dir().join(format!("roadwatch-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut config = AppConfig {
            path: path.clone(),
            ..AppConfig::default()
        };
        config.runtime.suspicion_threshold = 42;
        config.save().unwrap();

        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded.runtime.suspicion_threshold, 42);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn suspicion_config_clamps_threshold() {
        let mut runtime = RuntimeConfig::default();
        runtime.apply_suspicion_config(150, &HashMap::new());
        assert_eq!(runtime.suspicion_threshold, 100);
        runtime.apply_suspicion_config(-10, &HashMap::new());
        assert_eq!(runtime.suspicion_threshold, 0);
    }

    #[test]
    fn suspicion_config_updates_class_weights() {
        let mut runtime = RuntimeConfig::default();
        let mut weights = HashMap::new();
        weights.insert("0".to_string(), 2.0);
        runtime.apply_suspicion_config(50, &weights);
        assert_eq!(runtime.class_weight(Some(0)), 2.0);
    }
}
