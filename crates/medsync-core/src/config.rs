//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/medsync/config.toml)
//! 3. Environment variables (MEDSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "MEDSYNC";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the local database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL that queued endpoints are resolved against
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Bearer token attached to replayed requests
    #[serde(default)]
    pub api_token: Option<String>,

    /// Transport timeout for replayed requests (reqwest default when unset)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Live counter safety-net poll, 0 disables it
    #[serde(default = "default_counter_poll_secs")]
    pub counter_poll_secs: u64,

    /// Quiet period before a draft is written
    #[serde(default = "default_autosave_quiet_ms")]
    pub autosave_quiet_ms: u64,

    /// Connectivity probe interval used by `medsync watch`
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Log file (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_base_url: None,
            api_token: None,
            request_timeout_secs: None,
            counter_poll_secs: default_counter_poll_secs(),
            autosave_quiet_ms: default_autosave_quiet_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (MEDSYNC_DATA_DIR, MEDSYNC_API_URL, ...)
    /// 2. Config file (~/.config/medsync/config.toml or MEDSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_base_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_API_TOKEN", ENV_PREFIX)) {
            self.api_token = if val.is_empty() { None } else { Some(val) };
        }

        // Unparseable values are ignored rather than failing startup
        if let Ok(val) = std::env::var(format!("{}_COUNTER_POLL_SECS", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.counter_poll_secs = secs;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with MEDSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("medsync")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("medsync.db")
    }

    /// Live counter poll interval, `None` when disabled
    pub fn counter_poll_interval(&self) -> Option<Duration> {
        (self.counter_poll_secs > 0).then(|| Duration::from_secs(self.counter_poll_secs))
    }

    pub fn autosave_quiet_period(&self) -> Duration {
        Duration::from_millis(self.autosave_quiet_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medsync")
}

fn default_counter_poll_secs() -> u64 {
    15
}

fn default_autosave_quiet_ms() -> u64 {
    600
}

fn default_probe_interval_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "MEDSYNC_DATA_DIR",
        "MEDSYNC_API_URL",
        "MEDSYNC_API_TOKEN",
        "MEDSYNC_COUNTER_POLL_SECS",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.api_base_url.is_none());
        assert!(config.data_dir.ends_with("medsync"));
        assert_eq!(config.counter_poll_secs, 15);
        assert_eq!(config.autosave_quiet_period(), Duration::from_millis(600));
    }

    #[test]
    fn test_database_path() {
        let config = Config::default();
        assert!(config.database_path().ends_with("medsync.db"));
    }

    #[test]
    fn test_counter_poll_can_be_disabled() {
        let mut config = Config::default();
        assert_eq!(config.counter_poll_interval(), Some(Duration::from_secs(15)));

        config.counter_poll_secs = 0;
        assert!(config.counter_poll_interval().is_none());
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("MEDSYNC_DATA_DIR", "/tmp/medsync-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/medsync-test"));
    }

    #[test]
    fn test_env_override_api_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("MEDSYNC_API_URL", "https://hospital.example/api/");
        config.apply_env_overrides();
        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://hospital.example/api/")
        );

        // Empty string clears it
        env::set_var("MEDSYNC_API_URL", "");
        config.apply_env_overrides();
        assert!(config.api_base_url.is_none());
    }

    #[test]
    fn test_env_override_poll_ignores_garbage() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("MEDSYNC_COUNTER_POLL_SECS", "soon");
        config.apply_env_overrides();
        assert_eq!(config.counter_poll_secs, 15);

        env::set_var("MEDSYNC_COUNTER_POLL_SECS", "0");
        config.apply_env_overrides();
        assert_eq!(config.counter_poll_secs, 0);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            api_base_url = "https://hospital.example/api/"
            api_token = "secret"
            autosave_quiet_ms = 250
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.autosave_quiet_ms, 250);
        // Unspecified fields fall back to defaults
        assert_eq!(config.probe_interval_secs, 10);
    }

    #[test]
    fn test_serialization() {
        let config = Config {
            data_dir: PathBuf::from("/data/medsync"),
            api_base_url: Some("http://localhost:8080/".to_string()),
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("api_base_url"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.api_base_url, config.api_base_url);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("MEDSYNC_DATA_DIR", temp_dir.path());

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(config.api_base_url.is_none());
        assert_eq!(config.data_dir, temp_dir.path());
    }
}
