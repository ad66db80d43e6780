//! Gateway configuration, loaded from a TOML file. Every option has a
//! documented default; only `auth.api_key` is mandatory.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub timeout: TimeoutConfig,
    pub media_store: MediaStoreConfig,
    pub log: LogConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Development,
    #[default]
    Production,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub env: Env,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            env: Env::Production,
        }
    }
}

impl ServerConfig {
    pub fn is_development(&self) -> bool {
        self.env == Env::Development
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub sslmode: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    /// Seconds a pooled connection may live.
    pub conn_max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: String::new(),
            name: "whatsapp_gateway".into(),
            sslmode: "disable".into(),
            max_open_conns: 10,
            max_idle_conns: 5,
            conn_max_lifetime_secs: 1800,
        }
    }
}

impl DatabaseConfig {
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.sslmode
        )
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime_secs)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub api_key: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Admissions per window per caller.
    pub requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            methods: vec!["GET".into(), "POST".into(), "DELETE".into()],
            headers: vec!["Content-Type".into(), "X-Api-Key".into(), "Authorization".into()],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Deadline for every inbound request, seconds.
    pub request_secs: u64,
    /// Grace period for draining on shutdown, seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaStoreConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub tls: bool,
    pub default_bucket: String,
    /// Days a stored media file lives before the sweep removes it.
    pub ttl_days: u32,
}

impl Default for MediaStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            tls: false,
            default_bucket: "media".into(),
            ttl_days: 7,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup fails on an unusable config.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.api_key.is_empty() {
            anyhow::bail!("auth.api_key must be set");
        }
        if self.rate_limit.requests == 0 {
            anyhow::bail!("rate_limit.requests must be positive");
        }
        if self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.window_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_once_keyed() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
        config.auth.api_key = "secret".into();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.requests, 100);
        assert_eq!(config.timeout.request(), Duration::from_secs(30));
        assert_eq!(config.media_store.ttl_days, 7);
    }

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            [server]
            port = 9090
            env = "development"

            [auth]
            api_key = "secret"

            [rate_limit]
            requests = 3
            window_secs = 60

            [database]
            host = "db.internal"
            password = "pw"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(config.server.is_development());
        assert_eq!(config.rate_limit.requests, 3);
        let db = config.database.unwrap();
        assert_eq!(db.dsn(), "postgres://postgres:pw@db.internal:5432/whatsapp_gateway?sslmode=disable");
    }

    #[test]
    fn unknown_keys_rejected() {
        let raw = r#"
            [server]
            prot = 1
        "#;
        assert!(toml::from_str::<Config>(raw).is_err());
    }
}
