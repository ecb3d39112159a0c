use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides `security.master_key`.
pub const MASTER_KEY_ENV: &str = "LANWATCH_MASTER_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFailed(#[source] io::Error),
    #[error("failed to write config file: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
    pub discovery: DiscoveryConfig,
    pub security: SecurityConfig,
    pub notifications: NotificationConfig,
    pub traps: TrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "lanwatch.db".into(), max_connections: 8 }
    }
}

/// Timeouts and cadence for the monitoring scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_seconds: u64,
    pub tcp_timeout_ms: u64,
    pub banner_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub script_timeout_ms: u64,
    pub script_interpreter: String,
    pub snmp_timeout_ms: u64,
    pub ssh_timeout_ms: u64,
    pub heal_timeout_ms: u64,
    pub heal_cooldown_seconds: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 10,
            tcp_timeout_ms: 2000,
            banner_timeout_ms: 1000,
            http_timeout_ms: 5000,
            script_timeout_ms: 5000,
            script_interpreter: "python3".into(),
            snmp_timeout_ms: 1000,
            ssh_timeout_ms: 5000,
            heal_timeout_ms: 10_000,
            heal_cooldown_seconds: 900,
        }
    }
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }
}

/// Fan-out and timeouts for discovery scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_concurrent: usize,
    pub batch_size: usize,
    pub ping_timeout_ms: u64,
    pub ping_attempts: u32,
    pub port_timeout_ms: u64,
    pub dns_timeout_ms: u64,
    pub snmp_timeout_ms: u64,
    pub max_targets: usize,
    pub vendor_file: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            batch_size: 50,
            ping_timeout_ms: 2000,
            ping_attempts: 2,
            port_timeout_ms: 500,
            dns_timeout_ms: 2000,
            snmp_timeout_ms: 1000,
            max_targets: 4096,
            vendor_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub master_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { webhook_timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapConfig {
    /// Run the trap receiver alongside `monitor`
    pub enabled: bool,
    pub bind: String,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self { enabled: false, bind: "0.0.0.0:1162".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/lanwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("lanwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;

        write_title_1(f, "Monitor")?;
        write_1(f, "Tick (s)", &self.monitor.tick_seconds)?;
        write_1(f, "TCP Timeout (ms)", &self.monitor.tcp_timeout_ms)?;
        write_1(f, "HTTP Timeout (ms)", &self.monitor.http_timeout_ms)?;
        write_1(f, "Script Timeout (ms)", &self.monitor.script_timeout_ms)?;
        write_1(f, "Script Interpreter", &self.monitor.script_interpreter)?;
        write_1(f, "SNMP Timeout (ms)", &self.monitor.snmp_timeout_ms)?;
        write_1(f, "SSH Timeout (ms)", &self.monitor.ssh_timeout_ms)?;
        write_1(f, "Heal Cooldown (s)", &self.monitor.heal_cooldown_seconds)?;

        write_title_1(f, "Discovery")?;
        write_1(f, "Max Concurrent", &self.discovery.max_concurrent)?;
        write_1(f, "Batch Size", &self.discovery.batch_size)?;
        write_1(f, "Ping Timeout (ms)", &self.discovery.ping_timeout_ms)?;
        write_1(f, "Ping Attempts", &self.discovery.ping_attempts)?;
        write_1(f, "Port Timeout (ms)", &self.discovery.port_timeout_ms)?;
        write_1(f, "SNMP Timeout (ms)", &self.discovery.snmp_timeout_ms)?;
        write_1(f, "Max Targets", &self.discovery.max_targets)?;
        write_1(
            f,
            "Vendor File",
            &self.discovery.vendor_file.as_deref().unwrap_or("<none>"),
        )?;

        write_title_1(f, "Security")?;
        let key_state = if self.master_key().is_empty() { "<unset>" } else { "<set>" };
        write_1(f, "Master Key", &key_state)?;

        write_title_1(f, "Notifications")?;
        write_1(f, "Webhook Timeout (ms)", &self.notifications.webhook_timeout_ms)?;

        write_title_1(f, "Traps")?;
        write_1(f, "Enabled", &self.traps.enabled)?;
        write_1(f, "Bind", &self.traps.bind)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/lanwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// let cfg = lanwatch::config::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), lanwatch::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(ConfigError::ReadFailed)?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }

    /// Master key for the secret store, `LANWATCH_MASTER_KEY` wins over the file.
    pub fn master_key(&self) -> String {
        env::var(MASTER_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| self.security.master_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_engine_constants() {
        let config = Config::default();
        assert_eq!(config.monitor.tick_seconds, 10);
        assert_eq!(config.monitor.heal_cooldown_seconds, 900);
        assert_eq!(config.discovery.max_concurrent, 100);
        assert_eq!(config.discovery.batch_size, 50);
        assert_eq!(config.discovery.ping_attempts, 2);
        assert!(!config.traps.enabled);
        assert_eq!(config.traps.bind, "0.0.0.0:1162");
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lanwatch");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.database.path, "lanwatch.db");
        assert!(dir.path().join("lanwatch.toml").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[monitor]\ntick_seconds = 3\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.monitor.tick_seconds, 3);
        assert_eq!(config.monitor.http_timeout_ms, 5000);
        assert_eq!(config.discovery.max_targets, 4096);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[monitor\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn test_display_hides_master_key() {
        let mut config = Config::default();
        config.security.master_key = "hunter2".into();
        let rendered = config.to_string();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("Max Concurrent: 100"));
    }
}
