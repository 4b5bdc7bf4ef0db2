use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HEADER_NAME: &str = "X-Reqscope";
pub const DEFAULT_ID_HEADER_NAME: &str = "X-Reqscope-Id";
pub const DEFAULT_MAX_REQUESTS: usize = 200;
pub const DEFAULT_MAX_STORAGE_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_MAX_REQUEST_PAYLOAD_BYTES: usize = 256 * 1024;
pub const DEFAULT_MAX_DATABASE_QUERIES: usize = 100;
pub const DEFAULT_MAX_CACHE_QUERIES: usize = 200;
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 150;
pub const DEFAULT_MAX_TIMELINE_EVENTS: usize = 200;
pub const DEFAULT_MAX_STRING_LENGTH: usize = 2048;
pub const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 100;
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_REQUEST_RETENTION_SECONDS: u64 = 3600;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub profiler: ProfilerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// `text` or `json`
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

/// Profiler knobs. Numeric zeros are replaced by defaults in [`ProfilerConfig::normalize`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub enabled: bool,
    /// Presence of this request header turns capture on
    pub header_name: String,
    /// Response header carrying the record id
    pub id_header_name: String,

    pub max_requests: usize,
    pub max_storage_bytes: usize,
    pub max_request_payload_bytes: usize,
    pub max_database_queries: usize,
    pub max_cache_queries: usize,
    pub max_log_entries: usize,
    pub max_timeline_events: usize,
    pub max_string_length: usize,

    pub slow_query_threshold_ms: u64,
    pub cleanup_interval_seconds: u64,
    pub request_retention_seconds: u64,
    /// Capture a call stack for log entries recorded without one
    pub capture_log_stacks: bool,

    pub storage: StorageConfig,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_name: DEFAULT_HEADER_NAME.to_string(),
            id_header_name: DEFAULT_ID_HEADER_NAME.to_string(),
            max_requests: DEFAULT_MAX_REQUESTS,
            max_storage_bytes: DEFAULT_MAX_STORAGE_BYTES,
            max_request_payload_bytes: DEFAULT_MAX_REQUEST_PAYLOAD_BYTES,
            max_database_queries: DEFAULT_MAX_DATABASE_QUERIES,
            max_cache_queries: DEFAULT_MAX_CACHE_QUERIES,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            max_timeline_events: DEFAULT_MAX_TIMELINE_EVENTS,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
            cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECONDS,
            request_retention_seconds: DEFAULT_REQUEST_RETENTION_SECONDS,
            capture_log_stacks: false,
            storage: StorageConfig::default(),
        }
    }
}

impl ProfilerConfig {
    /// Replace empty strings and zero numbers with their defaults
    pub fn normalize(&mut self) {
        fn or_default<T: PartialEq + Default>(value: &mut T, default: T) {
            if *value == T::default() {
                *value = default;
            }
        }

        if self.header_name.trim().is_empty() {
            self.header_name = DEFAULT_HEADER_NAME.to_string();
        }
        if self.id_header_name.trim().is_empty() {
            self.id_header_name = DEFAULT_ID_HEADER_NAME.to_string();
        }
        or_default(&mut self.max_requests, DEFAULT_MAX_REQUESTS);
        or_default(&mut self.max_storage_bytes, DEFAULT_MAX_STORAGE_BYTES);
        or_default(&mut self.max_request_payload_bytes, DEFAULT_MAX_REQUEST_PAYLOAD_BYTES);
        or_default(&mut self.max_database_queries, DEFAULT_MAX_DATABASE_QUERIES);
        or_default(&mut self.max_cache_queries, DEFAULT_MAX_CACHE_QUERIES);
        or_default(&mut self.max_log_entries, DEFAULT_MAX_LOG_ENTRIES);
        or_default(&mut self.max_timeline_events, DEFAULT_MAX_TIMELINE_EVENTS);
        or_default(&mut self.max_string_length, DEFAULT_MAX_STRING_LENGTH);
        or_default(&mut self.slow_query_threshold_ms, DEFAULT_SLOW_QUERY_THRESHOLD_MS);
        or_default(&mut self.cleanup_interval_seconds, DEFAULT_CLEANUP_INTERVAL_SECONDS);
        or_default(&mut self.request_retention_seconds, DEFAULT_REQUEST_RETENTION_SECONDS);
        if self.storage.key_prefix.trim().is_empty() {
            self.storage.key_prefix = "reqscope".to_string();
        }
        or_default(&mut self.storage.operation_timeout_ms, DEFAULT_OPERATION_TIMEOUT_MS);
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn request_retention(&self) -> Duration {
        Duration::from_secs(self.request_retention_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// Bounded LRU-style store inside this process
    #[default]
    Memory,
    /// Key/value records plus a recency index, backed by the in-process KV store
    IndexedMemory,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub key_prefix: String,
    pub operation_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            key_prefix: "reqscope".to_string(),
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
        }
    }
}

impl StorageConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Load configuration from an optional TOML file, overlaid with `REQSCOPE__*` env vars
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    } else {
        builder = builder.add_source(config::File::with_name("reqscope").required(false));
    }
    let config = builder
        .add_source(config::Environment::with_prefix("REQSCOPE").separator("__"))
        .build()?;

    let mut cfg: Config = config.try_deserialize()?;
    cfg.profiler.normalize();
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    let profiler = &cfg.profiler;

    for (field, value) in [
        ("header_name", &profiler.header_name),
        ("id_header_name", &profiler.id_header_name),
    ] {
        if value.trim().is_empty() {
            anyhow::bail!("profiler.{} cannot be empty", field);
        }
        if HeaderName::from_bytes(value.as_bytes()).is_err() {
            anyhow::bail!("profiler.{} is not a valid header name: {}", field, value);
        }
    }

    if profiler.header_name.eq_ignore_ascii_case(&profiler.id_header_name) {
        anyhow::bail!("profiler.header_name and profiler.id_header_name must differ");
    }

    if profiler.storage.key_prefix.trim().is_empty() {
        anyhow::bail!("profiler.storage.key_prefix cannot be empty");
    }

    if profiler.storage.operation_timeout_ms == 0 {
        anyhow::bail!("profiler.storage.operation_timeout_ms must be greater than zero");
    }

    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("server.log_format must be 'text' or 'json', got '{}'", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_restores_defaults() {
        let mut cfg = ProfilerConfig {
            header_name: "  ".to_string(),
            max_requests: 0,
            max_string_length: 0,
            slow_query_threshold_ms: 0,
            ..Default::default()
        };
        cfg.storage.operation_timeout_ms = 0;
        cfg.normalize();

        assert_eq!(cfg.header_name, DEFAULT_HEADER_NAME);
        assert_eq!(cfg.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(cfg.max_string_length, DEFAULT_MAX_STRING_LENGTH);
        assert_eq!(cfg.slow_query_threshold(), Duration::from_millis(100));
        assert_eq!(cfg.storage.operation_timeout_ms, DEFAULT_OPERATION_TIMEOUT_MS);
    }

    #[test]
    fn test_normalize_keeps_explicit_values() {
        let mut cfg = ProfilerConfig {
            max_log_entries: 3,
            ..Default::default()
        };
        cfg.normalize();
        assert_eq!(cfg.max_log_entries, 3);
    }

    #[test]
    fn test_validate_config_rejects_bad_header() {
        let mut cfg = Config::default();
        cfg.profiler.header_name = "bad header".to_string();

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not a valid header name"));
    }

    #[test]
    fn test_validate_config_rejects_same_headers() {
        let mut cfg = Config::default();
        cfg.profiler.id_header_name = cfg.profiler.header_name.to_lowercase();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_rejects_log_format() {
        let mut cfg = Config::default();
        cfg.server.log_format = "xml".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[profiler]
max_log_entries = 5
max_requests = 0

[profiler.storage]
kind = "indexed-memory"
key_prefix = "app"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.profiler.max_log_entries, 5);
        assert_eq!(cfg.profiler.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(cfg.profiler.storage.kind, StorageKind::IndexedMemory);
        assert_eq!(cfg.profiler.storage.key_prefix, "app");
        assert!(cfg.profiler.enabled);
    }

    #[test]
    fn test_load_config_rejects_unknown_storage_kind() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[profiler.storage]\nkind = \"carrier-pigeon\"").unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }
}
