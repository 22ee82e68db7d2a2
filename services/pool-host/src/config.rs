//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Pool sizing can be overridden with `CLIENT_POOL_TTL_SECS` and
//! `CLIENT_POOL_MAX_ENTRIES`. Provider credentials never appear here; they
//! arrive per call from the application layer.

use client_pool::PoolConfig;
use provider::HttpFactoryConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// HTTP listener for health and metrics
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Client pool sizing
#[derive(Debug, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// 0 disables the background sweeper
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Upstream provider endpoints and client construction options
#[derive(Debug, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderEndpoint,
    #[serde(default)]
    pub anthropic: ProviderEndpoint,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub verify_credentials: bool,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderEndpoint::default(),
            anthropic: ProviderEndpoint::default(),
            timeout_secs: default_timeout(),
            verify_credentials: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_ttl() -> u64 {
    900
}

fn default_max_entries() -> usize {
    128
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    256
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Some(ttl) = env_number::<u64>("CLIENT_POOL_TTL_SECS")? {
            config.pool.ttl_secs = ttl;
        }
        if let Some(max) = env_number::<usize>("CLIENT_POOL_MAX_ENTRIES")? {
            config.pool.max_entries = max;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.pool.ttl_secs == 0 {
            return Err(common::Error::Config(
                "ttl_secs must be greater than 0".into(),
            ));
        }

        if self.pool.max_entries == 0 {
            return Err(common::Error::Config(
                "max_entries must be greater than 0".into(),
            ));
        }

        if self.providers.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        for (name, endpoint) in [
            ("openai", &self.providers.openai),
            ("anthropic", &self.providers.anthropic),
        ] {
            if let Some(url) = &endpoint.base_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(common::Error::Config(format!(
                        "providers.{name}.base_url must start with http:// or https://, got: {url}"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            ttl: Duration::from_secs(self.pool.ttl_secs),
            max_entries: self.pool.max_entries,
        }
    }

    pub fn factory_config(&self) -> HttpFactoryConfig {
        let defaults = HttpFactoryConfig::default();
        HttpFactoryConfig {
            openai_base_url: self
                .providers
                .openai
                .base_url
                .clone()
                .unwrap_or(defaults.openai_base_url),
            anthropic_base_url: self
                .providers
                .anthropic
                .base_url
                .clone()
                .unwrap_or(defaults.anthropic_base_url),
            timeout: Duration::from_secs(self.providers.timeout_secs),
            verify_credentials: self.providers.verify_credentials,
        }
    }

    /// Sweeper period, or None when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.pool.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.pool.sweep_interval_secs))
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("client-pool.toml")
    }
}

/// Parse a numeric env override; unset or empty means no override.
fn env_number<T: std::str::FromStr>(key: &str) -> common::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| common::Error::Config(format!("{key} must be a number, got: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_overrides() {
        unsafe {
            remove_env("CLIENT_POOL_TTL_SECS");
            remove_env("CLIENT_POOL_MAX_ENTRIES");
        }
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("client-pool.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn minimal_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:9090"
"#
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pool.ttl_secs, 900);
        assert_eq!(config.pool.max_entries, 128);
        assert_eq!(config.server.max_connections, 256);
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(60)));

        let pool = config.pool_config();
        assert_eq!(pool, PoolConfig::default());

        let factory = config.factory_config();
        assert_eq!(factory.openai_base_url, "https://api.openai.com");
        assert_eq!(factory.anthropic_base_url, "https://api.anthropic.com");
        assert_eq!(factory.timeout, Duration::from_secs(60));
        assert!(!factory.verify_credentials);
    }

    #[test]
    fn full_config_is_parsed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "0.0.0.0:8088"
max_connections = 32

[pool]
ttl_secs = 300
max_entries = 16
sweep_interval_secs = 0

[providers]
timeout_secs = 15
verify_credentials = true

[providers.openai]
base_url = "http://localhost:4000"

[providers.anthropic]
base_url = "https://anthropic.internal"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.max_connections, 32);
        assert_eq!(config.pool_config().ttl, Duration::from_secs(300));
        assert_eq!(config.pool_config().max_entries, 16);
        assert_eq!(config.sweep_interval(), None);

        let factory = config.factory_config();
        assert_eq!(factory.openai_base_url, "http://localhost:4000");
        assert_eq!(factory.anthropic_base_url, "https://anthropic.internal");
        assert_eq!(factory.timeout, Duration::from_secs(15));
        assert!(factory.verify_credentials);
    }

    #[test]
    fn env_overrides_pool_sizing() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());

        unsafe {
            set_env("CLIENT_POOL_TTL_SECS", "120");
            set_env("CLIENT_POOL_MAX_ENTRIES", "4");
        }
        let config = Config::load(&path).unwrap();
        clear_overrides();

        assert_eq!(config.pool.ttl_secs, 120);
        assert_eq!(config.pool.max_entries, 4);
    }

    #[test]
    fn non_numeric_env_override_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());

        unsafe { set_env("CLIENT_POOL_MAX_ENTRIES", "lots") };
        let result = Config::load(&path);
        clear_overrides();

        let err = result.unwrap_err().to_string();
        assert!(err.contains("CLIENT_POOL_MAX_ENTRIES"), "got: {err}");
    }

    #[test]
    fn zero_ttl_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:9090"

[pool]
ttl_secs = 0
"#,
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("ttl_secs must be greater than 0"), "got: {err}");
    }

    #[test]
    fn zero_max_entries_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:9090"

[pool]
max_entries = 0
"#,
        );

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn base_url_without_scheme_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:9090"

[providers.anthropic]
base_url = "api.anthropic.com"
"#,
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("providers.anthropic.base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn missing_file_is_error() {
        let result = Config::load(Path::new("/nonexistent/path/client-pool.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn resolve_path_env_then_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));

        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("client-pool.toml"));
    }
}
