use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "FINADVISE_CONFIG";
pub const ANY_ORIGIN: &str = "*";
const MAX_TOKEN_TTL_MINUTES: i64 = 365 * 24 * 60;
const MAX_RETENTION_DAYS: u64 = 3650;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub bind: String,
    pub data_dir: PathBuf,
    pub jwt_secret: Option<String>,
    pub token_ttl_minutes: i64,
    pub allowed_origins: Vec<String>,
    pub memory: MemoryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            data_dir: PathBuf::from("./data"),
            jwt_secret: None,
            token_ttl_minutes: 30,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub max_memory_mb: u64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub exit_threshold: f64,
    pub poll_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub retention_days: u64,
    /// Defaults to `<dataDir>/logs/memory`.
    pub log_dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memory_mb: 4096,
            warning_threshold: 0.8,
            critical_threshold: 0.9,
            exit_threshold: 0.95,
            poll_interval_secs: 5 * 60,
            cleanup_interval_secs: 30 * 60,
            retention_days: 7,
            log_dir: None,
        }
    }
}

impl MemoryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn limit_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}

impl AppConfig {
    /// Defaults, then the YAML file (explicit path or `FINADVISE_CONFIG`), then environment overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_yaml_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|error| AppError::Io(format!("failed to read config {}: {}", path.display(), error)))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(bind) = non_empty("FINADVISE_BIND") {
            self.bind = bind;
        } else if let Some(port) = non_empty("PORT").and_then(|raw| raw.parse::<u16>().ok()) {
            self.bind = format!("0.0.0.0:{}", port);
        }
        if let Some(data_dir) = non_empty("FINADVISE_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Some(secret) = non_empty("JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
        if let Some(ttl) = non_empty("TOKEN_TTL_MINUTES").and_then(|raw| raw.parse::<i64>().ok()) {
            self.token_ttl_minutes = ttl;
        }
        if let Some(origins) = non_empty("ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(enabled) = non_empty("MEMORY_MONITOR_ENABLED") {
            self.memory.enabled = !matches!(enabled.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no");
        }
        if let Some(limit) = non_empty("MAX_MEMORY_SIZE").and_then(|raw| raw.parse::<u64>().ok()) {
            self.memory.max_memory_mb = limit;
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        self.bind_addr()?;
        if self.token_ttl_minutes <= 0 || self.token_ttl_minutes > MAX_TOKEN_TTL_MINUTES {
            return Err(AppError::Validation(format!(
                "tokenTtlMinutes must be between 1 and {}",
                MAX_TOKEN_TTL_MINUTES
            )));
        }
        if self.allows_any_origin() && self.allowed_origins.len() > 1 {
            return Err(AppError::Validation(
                "allowedOrigins cannot mix '*' with explicit origins".to_string(),
            ));
        }
        let memory = &self.memory;
        let ordered = memory.warning_threshold > 0.0
            && memory.warning_threshold < memory.critical_threshold
            && memory.critical_threshold <= memory.exit_threshold
            && memory.exit_threshold <= 1.0;
        if !ordered {
            return Err(AppError::Validation(
                "memory thresholds must satisfy 0 < warning < critical <= exit <= 1".to_string(),
            ));
        }
        if memory.max_memory_mb == 0 || memory.poll_interval_secs == 0 || memory.cleanup_interval_secs == 0 {
            return Err(AppError::Validation(
                "memory limit and intervals must be positive".to_string(),
            ));
        }
        if memory.retention_days == 0 || memory.retention_days > MAX_RETENTION_DAYS {
            return Err(AppError::Validation(format!(
                "memory retentionDays must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        Ok(())
    }

    /// `allowedOrigins: ["*"]` opens CORS to every origin, without credentials.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == ANY_ORIGIN)
    }

    pub fn bind_addr(&self) -> AppResult<SocketAddr> {
        self.bind
            .parse()
            .map_err(|_| AppError::Validation(format!("invalid bind address '{}'", self.bind)))
    }

    pub fn require_jwt_secret(&self) -> AppResult<&str> {
        self.jwt_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| AppError::Validation("JWT secret is required".to_string()))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("finadvise.sqlite")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn memory_log_dir(&self) -> PathBuf {
        self.memory
            .log_dir
            .clone()
            .unwrap_or_else(|| self.log_dir().join("memory"))
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.bind_addr().expect("addr").port(), 8000);
        assert!(config.require_jwt_secret().is_err());
    }

    #[test]
    fn yaml_overrides_only_given_keys() {
        let config = AppConfig::from_yaml_str(
            "bind: 127.0.0.1:9000\nmemory:\n  maxMemoryMb: 512\n  pollIntervalSecs: 10\n",
        )
        .expect("yaml");
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.memory.max_memory_mb, 512);
        assert_eq!(config.memory.poll_interval_secs, 10);
        assert_eq!(config.memory.retention_days, 7);
        assert_eq!(config.token_ttl_minutes, 30);
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9100"),
            ("JWT_SECRET", "s3cret"),
            ("ALLOWED_ORIGINS", "https://app.example.com, http://localhost:5173"),
            ("MAX_MEMORY_SIZE", "2048"),
            ("FINADVISE_DATA_DIR", "/var/lib/finadvise"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.bind, "0.0.0.0:9100");
        assert_eq!(config.require_jwt_secret().expect("secret"), "s3cret");
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.memory.max_memory_mb, 2048);
        assert_eq!(config.memory_log_dir(), PathBuf::from("/var/lib/finadvise/logs/memory"));
    }

    #[test]
    fn wildcard_origin_validates_alone_but_not_mixed() {
        let mut config = AppConfig::default();
        config.apply_env(|key| (key == "ALLOWED_ORIGINS").then(|| "*".to_string()));
        config.validate().expect("wildcard alone is valid");
        assert!(config.allows_any_origin());

        config.allowed_origins.push("https://app.example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_ttl_and_retention_are_rejected() {
        let mut config = AppConfig::default();
        config.apply_env(|key| (key == "TOKEN_TTL_MINUTES").then(|| i64::MAX.to_string()));
        assert_eq!(config.token_ttl_minutes, i64::MAX);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.memory.retention_days = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn misordered_thresholds_are_rejected() {
        let mut config = AppConfig::default();
        config.memory.warning_threshold = 0.95;
        assert!(config.validate().is_err());
    }
}
