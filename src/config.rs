use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatcher::DEFAULT_CALL_TIMEOUT;
use crate::logger::LogLevel;
use crate::registry::DEFAULT_CHANNEL_PREFIX;

pub const KEY_CHANNEL_PREFIX: &str = "BRIDGE_CHANNEL_PREFIX";
pub const KEY_CALL_TIMEOUT_MS: &str = "BRIDGE_CALL_TIMEOUT_MS";
pub const KEY_ENGINE_EXE: &str = "BRIDGE_ENGINE_EXE";
pub const KEY_LOG_LEVEL: &str = "BRIDGE_LOG_LEVEL";
pub const KEY_LOG_DIR: &str = "BRIDGE_LOG_DIR";
pub const KEY_OTEL_ENDPOINT: &str = "BRIDGE_OTEL_ENDPOINT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid { key: String, value: String, reason: String },

    #[error("could not update {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str) -> Result<(), ConfigError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn into_inner(self) -> Box<dyn ConfigManagerType> {
        self.0
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded from and persisted to a `.env` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("loaded {}", env_file.display()),
                Err(err) => warn!("could not parse {}: {err}", env_file.display()),
            }
        } else {
            debug!("no env file at {}", env_file.display());
        }
        Box::new(Self { env_file })
    }

    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    fn persist(&self, key: &str, value: Option<&str>) -> Result<(), ConfigError> {
        let existing = match fs::read_to_string(&self.env_file) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.env_file.clone(),
                    source,
                });
            }
        };
        let io_err = |source| ConfigError::Io {
            path: self.env_file.clone(),
            source,
        };
        if let Some(parent) = self.env_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&self.env_file, rewrite_env(&existing, key, value)).map_err(io_err)
    }
}

/// Replace, append or drop `key` in dotenv text. Comments and other keys are
/// kept in place.
fn rewrite_env(text: &str, key: &str, value: Option<&str>) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut written = false;
    for line in text.lines() {
        let is_key = line
            .split_once('=')
            .is_some_and(|(k, _)| k.trim().trim_start_matches("export ").trim() == key);
        if !is_key {
            out.push(line.to_string());
        } else if let (Some(v), false) = (value, written) {
            out.push(format!("{key}={v}"));
            written = true;
        }
    }
    if let (Some(v), false) = (value, written) {
        out.push(format!("{key}={v}"));
    }
    let mut joined = out.join("\n");
    if !joined.is_empty() {
        joined.push('\n');
    }
    joined
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        // only the `config` subcommand writes here, before any task that
        // reads the environment has been spawned
        unsafe { env::set_var(key, value) };
        self.persist(key, Some(value))
    }

    async fn del(&self, key: &str) -> Result<(), ConfigError> {
        unsafe { env::remove_var(key) };
        if self.env_file.exists() {
            self.persist(key, None)?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory settings, for embedding and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Box<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mgr = Self::default();
        for (k, v) in pairs {
            mgr.map.insert(k.into(), v.into());
        }
        Box::new(mgr)
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ConfigError> {
        self.map.remove(key);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Everything a bridge and its binary can be tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BridgeConfig {
    pub channel_prefix: String,
    pub call_timeout_ms: u64,
    pub engine_exe: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT.as_millis() as u64,
            engine_exe: None,
            log_level: LogLevel::Info,
            log_dir: None,
            otel_endpoint: None,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by whatever `BRIDGE_*` keys `config` holds.
    /// Empty values count as unset.
    pub async fn load(config: &ConfigManager) -> Result<Self, ConfigError> {
        let mgr = &config.0;
        let mut out = Self::default();

        if let Some(prefix) = non_empty(mgr.get(KEY_CHANNEL_PREFIX).await) {
            out.channel_prefix = prefix;
        }
        if let Some(raw) = non_empty(mgr.get(KEY_CALL_TIMEOUT_MS).await) {
            out.call_timeout_ms = match raw.trim().parse::<u64>() {
                Ok(0) => return Err(invalid(KEY_CALL_TIMEOUT_MS, &raw, "must be greater than zero")),
                Ok(ms) => ms,
                Err(err) => return Err(invalid(KEY_CALL_TIMEOUT_MS, &raw, &err.to_string())),
            };
        }
        if let Some(exe) = non_empty(mgr.get(KEY_ENGINE_EXE).await) {
            out.engine_exe = Some(PathBuf::from(exe));
        }
        if let Some(raw) = non_empty(mgr.get(KEY_LOG_LEVEL).await) {
            out.log_level = raw
                .parse()
                .map_err(|err: String| invalid(KEY_LOG_LEVEL, &raw, &err))?;
        }
        if let Some(dir) = non_empty(mgr.get(KEY_LOG_DIR).await) {
            out.log_dir = Some(PathBuf::from(dir));
        }
        out.otel_endpoint = non_empty(mgr.get(KEY_OTEL_ENDPOINT).await);

        Ok(out)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn map_config_manager_set_get_del() {
        let mgr = MapConfigManager::new();

        mgr.set("foo", "bar").await.unwrap();
        mgr.set("foo", "baz").await.unwrap();
        assert_eq!(mgr.get("foo").await, Some("baz".to_string()));
        assert_eq!(mgr.keys().await, vec!["foo".to_string()]);

        mgr.del("foo").await.unwrap();
        assert_eq!(mgr.get("foo").await, None);
        assert!(mgr.as_vec().await.is_empty());
    }

    #[tokio::test]
    async fn load_uses_defaults_when_nothing_is_set() {
        let cfg = BridgeConfig::load(&ConfigManager(MapConfigManager::new())).await.unwrap();
        assert_eq!(cfg, BridgeConfig::default());
        assert_eq!(cfg.channel_prefix, "engine_bridge/instance_");
        assert_eq!(cfg.call_timeout(), DEFAULT_CALL_TIMEOUT);
    }

    #[tokio::test]
    async fn load_reads_every_key() {
        let mgr = MapConfigManager::from_pairs([
            (KEY_CHANNEL_PREFIX, "demo/view_"),
            (KEY_CALL_TIMEOUT_MS, "250"),
            (KEY_ENGINE_EXE, "/opt/engine/bin/engine"),
            (KEY_LOG_LEVEL, "debug"),
            (KEY_LOG_DIR, "/tmp/bridge-logs"),
            (KEY_OTEL_ENDPOINT, "http://localhost:4318"),
        ]);
        let cfg = BridgeConfig::load(&ConfigManager(mgr)).await.unwrap();

        assert_eq!(cfg.channel_prefix, "demo/view_");
        assert_eq!(cfg.call_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.engine_exe, Some(PathBuf::from("/opt/engine/bin/engine")));
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/tmp/bridge-logs")));
        assert_eq!(cfg.otel_endpoint.as_deref(), Some("http://localhost:4318"));
    }

    #[tokio::test]
    async fn load_rejects_bad_numbers_and_levels() {
        for (key, value) in [
            (KEY_CALL_TIMEOUT_MS, "soon"),
            (KEY_CALL_TIMEOUT_MS, "0"),
            (KEY_LOG_LEVEL, "loud"),
        ] {
            let mgr = MapConfigManager::from_pairs([(key, value)]);
            let err = BridgeConfig::load(&ConfigManager(mgr)).await.unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: ref k, .. } if k == key), "{key}={value}");
        }
    }

    #[test]
    fn rewrite_env_replaces_appends_and_drops() {
        let text = "# bridge\nBRIDGE_LOG_LEVEL=info\nOTHER=1\n";
        assert_eq!(
            rewrite_env(text, "BRIDGE_LOG_LEVEL", Some("debug")),
            "# bridge\nBRIDGE_LOG_LEVEL=debug\nOTHER=1\n"
        );
        assert_eq!(
            rewrite_env(text, "BRIDGE_LOG_DIR", Some("logs")),
            "# bridge\nBRIDGE_LOG_LEVEL=info\nOTHER=1\nBRIDGE_LOG_DIR=logs\n"
        );
        assert_eq!(rewrite_env(text, "OTHER", None), "# bridge\nBRIDGE_LOG_LEVEL=info\n");
        assert_eq!(rewrite_env("", "A", None), "");
    }

    #[tokio::test]
    async fn env_config_manager_persists_to_file() {
        let key = "BRIDGE_TEST_ENV_CONFIG_PERSIST";
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");

        let mgr = EnvConfigManager::new(path.clone());
        mgr.set(key, "on").await.unwrap();
        assert_eq!(mgr.get(key).await, Some("on".to_string()));
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{key}=on\n"));

        mgr.del(key).await.unwrap();
        assert_eq!(std::env::var(key).ok(), None);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn env_config_manager_loads_existing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        fs::write(&path, "BRIDGE_TEST_ENV_CONFIG_LOAD=from-file\n").unwrap();

        let mgr = EnvConfigManager::new(path);
        assert_eq!(
            mgr.get("BRIDGE_TEST_ENV_CONFIG_LOAD").await,
            Some("from-file".to_string())
        );
    }
}
