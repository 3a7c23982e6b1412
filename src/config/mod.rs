use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of a login session in seconds (default: 1 day)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Administrator account created at startup when both fields are set
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    /// Mark the session cookie as Secure (enable behind HTTPS)
    #[serde(default)]
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl(),
            admin_email: None,
            admin_password: None,
            secure_cookies: false,
        }
    }
}

fn default_session_ttl() -> u64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    /// Base URL of the observation data API
    #[serde(default = "default_weather_url")]
    pub base_url: String,
    /// Stations requested per upstream call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Age after which a stored observation is refetched
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    /// How long a station with no upstream data is left alone
    #[serde(default = "default_negative_cache")]
    pub negative_cache_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Superseded observations older than this are deleted by maintenance
    #[serde(default = "default_history_retention")]
    pub history_retention_seconds: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_url(),
            chunk_size: default_chunk_size(),
            stale_after_seconds: default_stale_after(),
            negative_cache_seconds: default_negative_cache(),
            request_timeout_seconds: default_request_timeout(),
            history_retention_seconds: default_history_retention(),
        }
    }
}

fn default_weather_url() -> String {
    "https://aviationweather.gov/api/data".to_string()
}

fn default_chunk_size() -> usize {
    10
}

fn default_stale_after() -> u64 {
    3600
}

fn default_negative_cache() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    30
}

fn default_history_retention() -> u64 {
    7 * 86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Periodically refresh observations for every stored airport
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches in milliseconds
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_min_interval")]
    pub min_interval_seconds: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_seconds: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            min_interval_seconds: default_min_interval(),
            max_interval_seconds: default_max_interval(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_min_interval() -> u64 {
    1
}

fn default_max_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: default_window_seconds(),
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_window_seconds() -> u64 {
    60
}

fn default_api_requests() -> u32 {
    600
}

fn default_auth_requests() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Upper bound for any configured lifetime (ten years)
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 86_400;

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Apply `AVIATION_*` overrides from the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("AVIATION_DATA_DIR") {
            self.server.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup("AVIATION_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid AVIATION_PORT value: {}", port))?;
        }
        if let Some(url) = lookup("AVIATION_WEATHER_URL") {
            self.weather.base_url = url;
        }
        Ok(())
    }

    /// Sanity checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.weather.chunk_size == 0 {
            anyhow::bail!("weather.chunk_size must be at least 1");
        }
        if self.refresh.batch_size == 0 {
            anyhow::bail!("refresh.batch_size must be at least 1");
        }
        if self.refresh.min_interval_seconds > self.refresh.max_interval_seconds {
            anyhow::bail!(
                "refresh.min_interval_seconds ({}) exceeds refresh.max_interval_seconds ({})",
                self.refresh.min_interval_seconds,
                self.refresh.max_interval_seconds
            );
        }
        for (key, value) in [
            ("auth.session_ttl_seconds", self.auth.session_ttl_seconds),
            ("weather.stale_after_seconds", self.weather.stale_after_seconds),
            ("weather.negative_cache_seconds", self.weather.negative_cache_seconds),
            (
                "weather.history_retention_seconds",
                self.weather.history_retention_seconds,
            ),
        ] {
            if value > MAX_DURATION_SECONDS {
                anyhow::bail!("{} ({}) exceeds {}", key, value, MAX_DURATION_SECONDS);
            }
        }
        if self.auth.admin_email.is_some() != self.auth.admin_password.is_some() {
            anyhow::bail!("auth.admin_email and auth.admin_password must be set together");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.weather.chunk_size, 10);
        assert_eq!(config.weather.stale_after_seconds, 3600);
        assert_eq!(config.auth.session_ttl_seconds, 86_400);
        assert!(!config.refresh.enabled);
        assert!(config.rate_limit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
[server]
port = 8081

[weather]
chunk_size = 25
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.weather.chunk_size, 25);
        assert_eq!(config.weather.negative_cache_seconds, 3600);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("AVIATION_PORT", "9000"),
            ("AVIATION_DATA_DIR", "/var/lib/aviation"),
            ("AVIATION_WEATHER_URL", "http://localhost:1234"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.data_dir, PathBuf::from("/var/lib/aviation"));
        assert_eq!(config.weather.base_url, "http://localhost:1234");
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|key| {
            (key == "AVIATION_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_half_admin() {
        let mut config = Config::default();
        config.auth.admin_email = Some("admin@example.com".to_string());
        assert!(config.validate().is_err());

        config.auth.admin_password = Some("correct horse".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_interval_order() {
        let mut config = Config::default();
        config.refresh.min_interval_seconds = 10;
        config.refresh.max_interval_seconds = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_lifetimes() {
        let mut config = Config::default();
        config.auth.session_ttl_seconds = u64::MAX;
        assert!(config.validate().is_err());

        config.auth.session_ttl_seconds = MAX_DURATION_SECONDS;
        assert!(config.validate().is_ok());

        config.weather.negative_cache_seconds = MAX_DURATION_SECONDS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.weather.chunk_size, 10);
    }
}
