//! Service Configuration
//!
//! Configuration is layered:
//! 1. compiled-in defaults (see [`crate::constants`])
//! 2. an optional YAML file: `ORDERFLOW_CONFIG`, or `config.<ORDERFLOW_ENV|local>.yaml`
//!    in the working directory when it exists
//! 3. `ORDERFLOW_*` environment variables
//!
//! Values that fail to parse are a [`ConfigError`], never silently defaulted.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use orderflow_core::ConfigError;
use orderflow_ingest::PipelineConfig;
use serde::Deserialize;

use crate::constants::*;

// ============================================================================
// SECTIONS
// ============================================================================

/// PostgreSQL connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Pool wait timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout_secs: DEFAULT_DB_TIMEOUT_SECS,
        }
    }
}

impl DbConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which cache backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Lmdb,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackendKind::Memory),
            "lmdb" => Ok(CacheBackendKind::Lmdb),
            other => Err(format!("expected 'memory' or 'lmdb', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    /// Entry capacity of the in-memory backend
    pub capacity: usize,
    /// Entries older than this read as misses. Unset means no expiry.
    pub ttl_secs: Option<u64>,
    pub lmdb_path: PathBuf,
    pub lmdb_max_size_mb: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl_secs: None,
            lmdb_path: PathBuf::from(DEFAULT_LMDB_PATH),
            lmdb_max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub store_timeout_ms: u64,
    pub cache_timeout_ms: u64,
    /// Directory of bootstrap orders; `None` skips bootstrap.
    pub bootstrap_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            cache_timeout_ms: DEFAULT_CACHE_TIMEOUT_MS,
            bootstrap_dir: Some(PathBuf::from(DEFAULT_BOOTSTRAP_DIR)),
        }
    }
}

impl PipelineSettings {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            cache_timeout: Duration::from_millis(self.cache_timeout_ms),
        }
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "server.host".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Append JSON log lines to this file as well as stdout.
    pub log_file: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_file: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            metrics_enabled: true,
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db: DbConfig,
    pub cache: CacheSettings,
    pub pipeline: PipelineSettings,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load defaults, then the YAML file if any, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |name: &str| std::env::var(name).ok();

        let mut config = match config_file_path(&lookup) {
            Some(path) => Self::from_yaml_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&contents).map_err(|e| match e {
            ConfigError::InvalidValue { reason, .. } => ConfigError::InvalidValue {
                field: "config".to_string(),
                value: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            value: "<yaml>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply `ORDERFLOW_*` overrides read through `lookup`.
    ///
    /// Environment variables:
    /// - `ORDERFLOW_DB_HOST`, `ORDERFLOW_DB_PORT`, `ORDERFLOW_DB_NAME`,
    ///   `ORDERFLOW_DB_USER`, `ORDERFLOW_DB_PASSWORD`, `ORDERFLOW_DB_POOL_SIZE`,
    ///   `ORDERFLOW_DB_TIMEOUT_SECS`
    /// - `ORDERFLOW_CACHE_BACKEND` (`memory` | `lmdb`), `ORDERFLOW_CACHE_CAPACITY`,
    ///   `ORDERFLOW_CACHE_TTL_SECS`, `ORDERFLOW_LMDB_PATH`, `ORDERFLOW_LMDB_MAX_SIZE_MB`
    /// - `ORDERFLOW_STORE_TIMEOUT_MS`, `ORDERFLOW_CACHE_TIMEOUT_MS`,
    ///   `ORDERFLOW_BOOTSTRAP_DIR` (empty disables bootstrap)
    /// - `ORDERFLOW_BIND`, `PORT` or `ORDERFLOW_PORT`, `ORDERFLOW_REQUEST_TIMEOUT_SECS`
    /// - `ORDERFLOW_SERVICE_NAME`, `ORDERFLOW_LOG_FILE`, `ORDERFLOW_METRICS_ENABLED`
    pub fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_string(lookup, "ORDERFLOW_DB_HOST", &mut self.db.host);
        override_parsed(lookup, "ORDERFLOW_DB_PORT", &mut self.db.port)?;
        override_string(lookup, "ORDERFLOW_DB_NAME", &mut self.db.dbname);
        override_string(lookup, "ORDERFLOW_DB_USER", &mut self.db.user);
        override_string(lookup, "ORDERFLOW_DB_PASSWORD", &mut self.db.password);
        override_parsed(lookup, "ORDERFLOW_DB_POOL_SIZE", &mut self.db.max_size)?;
        override_parsed(lookup, "ORDERFLOW_DB_TIMEOUT_SECS", &mut self.db.timeout_secs)?;

        override_parsed(lookup, "ORDERFLOW_CACHE_BACKEND", &mut self.cache.backend)?;
        override_parsed(lookup, "ORDERFLOW_CACHE_CAPACITY", &mut self.cache.capacity)?;
        if let Some(raw) = lookup("ORDERFLOW_CACHE_TTL_SECS") {
            self.cache.ttl_secs = if raw.trim().is_empty() {
                None
            } else {
                Some(parse_value("ORDERFLOW_CACHE_TTL_SECS", &raw)?)
            };
        }
        if let Some(path) = lookup("ORDERFLOW_LMDB_PATH") {
            self.cache.lmdb_path = PathBuf::from(path);
        }
        override_parsed(lookup, "ORDERFLOW_LMDB_MAX_SIZE_MB", &mut self.cache.lmdb_max_size_mb)?;

        override_parsed(lookup, "ORDERFLOW_STORE_TIMEOUT_MS", &mut self.pipeline.store_timeout_ms)?;
        override_parsed(lookup, "ORDERFLOW_CACHE_TIMEOUT_MS", &mut self.pipeline.cache_timeout_ms)?;
        if let Some(dir) = lookup("ORDERFLOW_BOOTSTRAP_DIR") {
            self.pipeline.bootstrap_dir = if dir.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }

        override_string(lookup, "ORDERFLOW_BIND", &mut self.server.host);
        // PORT wins over ORDERFLOW_PORT for container platforms that inject it.
        if let Some(port) = lookup("PORT").or_else(|| lookup("ORDERFLOW_PORT")) {
            self.server.port = parse_value("PORT", &port)?;
        }
        override_parsed(
            lookup,
            "ORDERFLOW_REQUEST_TIMEOUT_SECS",
            &mut self.server.request_timeout_secs,
        )?;

        override_string(lookup, "ORDERFLOW_SERVICE_NAME", &mut self.telemetry.service_name);
        if let Some(file) = lookup("ORDERFLOW_LOG_FILE") {
            self.telemetry.log_file = if file.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(file))
            };
        }
        if let Some(raw) = lookup("ORDERFLOW_METRICS_ENABLED") {
            self.telemetry.metrics_enabled = raw == "true" || raw == "1";
        }

        Ok(())
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "db.host".to_string(),
            });
        }
        if self.db.dbname.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "db.dbname".to_string(),
            });
        }
        for (field, value) in [
            ("db.max_size", self.db.max_size as u64),
            ("cache.capacity", self.cache.capacity as u64),
            ("pipeline.store_timeout_ms", self.pipeline.store_timeout_ms),
            ("pipeline.cache_timeout_ms", self.pipeline.cache_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.cache.backend == CacheBackendKind::Lmdb && self.cache.lmdb_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.lmdb_max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        self.server.bind_addr()?;
        Ok(())
    }
}

/// `ORDERFLOW_CONFIG` if set, else `config.<env>.yaml` when it exists.
fn config_file_path<F>(lookup: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup("ORDERFLOW_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let env = lookup("ORDERFLOW_ENV").unwrap_or_else(|| DEFAULT_CONFIG_ENV.to_string());
    let candidate = PathBuf::from(format!("config.{}.yaml", env));
    candidate.exists().then_some(candidate)
}

fn override_string<F>(lookup: &F, name: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = value;
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(name) {
        *target = parse_value(name, &raw)?;
    }
    Ok(())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        field: name.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, DEFAULT_HTTP_PORT);
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(
            config.pipeline.pipeline_config().store_timeout,
            Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_yaml_partial_sections_keep_defaults() {
        let yaml = r#"
db:
  host: db.internal
  port: 6432
  password: secret
cache:
  backend: lmdb
  ttl_secs: 600
"#;
        let config = AppConfig::from_yaml_str(yaml).expect("valid yaml");
        assert_eq!(config.db.host, "db.internal");
        assert_eq!(config.db.port, 6432);
        assert_eq!(config.db.dbname, DEFAULT_DB_NAME);
        assert_eq!(config.cache.backend, CacheBackendKind::Lmdb);
        assert_eq!(config.cache.ttl(), Some(Duration::from_secs(600)));
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = AppConfig::from_yaml_str("db: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_env_overrides_yaml() {
        let mut config = AppConfig::from_yaml_str("db:\n  host: from-file\n").expect("yaml");
        config
            .apply_env(&env(&[
                ("ORDERFLOW_DB_HOST", "from-env"),
                ("ORDERFLOW_DB_POOL_SIZE", "4"),
                ("ORDERFLOW_CACHE_BACKEND", "LMDB"),
                ("ORDERFLOW_BOOTSTRAP_DIR", ""),
                ("PORT", "9000"),
            ]))
            .expect("overrides");
        assert_eq!(config.db.host, "from-env");
        assert_eq!(config.db.max_size, 4);
        assert_eq!(config.cache.backend, CacheBackendKind::Lmdb);
        assert_eq!(config.pipeline.bootstrap_dir, None);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_unparseable_env_value_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(&env(&[("ORDERFLOW_DB_PORT", "not-a-port")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { field, value, .. } => {
                assert_eq!(field, "ORDERFLOW_DB_PORT");
                assert_eq!(value, "not-a-port");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_timeouts_and_blank_host() {
        let mut config = AppConfig::default();
        config.pipeline.store_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = AppConfig::default();
        config.db.host = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = AppConfig::from_yaml_file(Path::new("/nonexistent/orderflow.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileUnreadable { .. }));
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("config.test.yaml");
        std::fs::write(&path, "server:\n  port: 8181\n").expect("write");
        let config = AppConfig::from_yaml_file(&path).expect("load");
        assert_eq!(config.server.port, 8181);
    }
}
