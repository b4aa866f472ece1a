//! Configuration management for CLI, environment variables, and config files.

use crate::counter::CounterConfig;
use crate::error::{RequestCounterError, ValidationIssue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "REQUEST_COUNTER_";

/// Main configuration for request-counter.
///
/// Files may use the `[server]`, `[counter]` and `[logging]` sections, the
/// flat option names (`host`, `interval-duration`, `log-level`, ...), or
/// both. Flat keys win over their sectioned counterparts. Unknown keys are
/// rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConfigFile")]
pub struct Config {
    pub server: ServerConfig,
    pub counter: CounterSection,
    pub logging: LoggingConfig,
}

/// HTTP listener address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Bucket layout and persistence of the windowed counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CounterSection {
    pub interval_count: usize,
    #[serde(alias = "interval-duration", deserialize_with = "deserialize_millis")]
    pub interval_duration_ms: u64,
    pub persistent: bool,
    pub filename: PathBuf,
    #[serde(alias = "persist-duration", deserialize_with = "deserialize_millis")]
    pub persist_duration_ms: u64,
}

/// Configuration for logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct LoggingConfig {
    #[serde(alias = "log-level")]
    pub level: String,
    /// Seconds between periodic metrics summaries; 0 disables them.
    pub metrics_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for CounterSection {
    fn default() -> Self {
        Self {
            interval_count: 100,
            interval_duration_ms: 600,
            persistent: false,
            filename: PathBuf::from("/tmp/requestcounter.dat"),
            persist_duration_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            metrics_interval_secs: 0,
        }
    }
}

/// On-disk shape of [`Config`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
struct ConfigFile {
    server: ServerConfig,
    counter: CounterSection,
    logging: LoggingConfig,
    host: Option<String>,
    port: Option<u16>,
    interval_count: Option<usize>,
    #[serde(deserialize_with = "deserialize_millis_opt")]
    interval_duration: Option<u64>,
    persistent: Option<bool>,
    filename: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_millis_opt")]
    persist_duration: Option<u64>,
    log_level: Option<String>,
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        let ConfigFile {
            mut server,
            mut counter,
            mut logging,
            host,
            port,
            interval_count,
            interval_duration,
            persistent,
            filename,
            persist_duration,
            log_level,
        } = file;

        if let Some(host) = host {
            server.host = host;
        }
        if let Some(port) = port {
            server.port = port;
        }
        if let Some(count) = interval_count {
            counter.interval_count = count;
        }
        if let Some(ms) = interval_duration {
            counter.interval_duration_ms = ms;
        }
        if let Some(persistent) = persistent {
            counter.persistent = persistent;
        }
        if let Some(filename) = filename {
            counter.filename = filename;
        }
        if let Some(ms) = persist_duration {
            counter.persist_duration_ms = ms;
        }
        if let Some(level) = log_level {
            logging.level = level;
        }

        Self {
            server,
            counter,
            logging,
        }
    }
}

/// A duration given either as whole milliseconds or as text like `600ms`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Millis(u64),
    Text(String),
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match DurationValue::deserialize(deserializer)? {
        DurationValue::Millis(ms) => Ok(ms),
        DurationValue::Text(text) => {
            let duration = humantime::parse_duration(text.trim()).map_err(|err| {
                serde::de::Error::custom(format!("invalid duration '{}': {}", text, err))
            })?;
            u64::try_from(duration.as_millis()).map_err(serde::de::Error::custom)
        }
    }
}

fn deserialize_millis_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_millis(deserializer).map(Some)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, RequestCounterError> {
    match env_var(name) {
        Some(val) => val.trim().parse().map(Some).map_err(|_| {
            RequestCounterError::InvalidArgument(format!(
                "{}{} has invalid format",
                ENV_PREFIX, name
            ))
        }),
        None => Ok(None),
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a log level name. Case-insensitive; `warning` is accepted for `warn`.
pub fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, RequestCounterError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RequestCounterError::IoError(format!("{}: {}", path.display(), e)))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Ok(toml::from_str(&content)?),
        }
    }

    /// Candidate config files, most specific first.
    pub fn default_locations() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|d| d.join("request-counter/config.toml")),
            Some(PathBuf::from("/etc/request-counter/config.toml")),
            Some(PathBuf::from("./request-counter.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn from_default_locations() -> Result<Self, RequestCounterError> {
        for path in Self::default_locations() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> Result<Self, RequestCounterError> {
        if let Some(val) = env_var("HOST") {
            self.server.host = val;
        }
        if let Some(val) = parse_env("PORT")? {
            self.server.port = val;
        }
        if let Some(val) = parse_env("INTERVAL_COUNT")? {
            self.counter.interval_count = val;
        }
        if let Some(val) = parse_env("INTERVAL_DURATION_MS")? {
            self.counter.interval_duration_ms = val;
        }
        if let Some(val) = env_var("PERSISTENT") {
            self.counter.persistent = parse_bool(&val).ok_or_else(|| {
                RequestCounterError::InvalidArgument(format!(
                    "{}PERSISTENT has invalid format",
                    ENV_PREFIX
                ))
            })?;
        }
        if let Some(val) = env_var("FILENAME") {
            self.counter.filename = PathBuf::from(val);
        }
        if let Some(val) = parse_env("PERSIST_DURATION_MS")? {
            self.counter.persist_duration_ms = val;
        }
        if let Some(val) = env_var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = parse_env("METRICS_INTERVAL_SECS")? {
            self.logging.metrics_interval_secs = val;
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(ref host) = cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(count) = cli.interval_count {
            self.counter.interval_count = count;
        }
        if let Some(ms) = cli.interval_duration_ms {
            self.counter.interval_duration_ms = ms;
        }
        if let Some(persistent) = cli.persistent {
            self.counter.persistent = persistent;
        }
        if let Some(ref filename) = cli.filename {
            self.counter.filename = filename.clone();
        }
        if let Some(ms) = cli.persist_duration_ms {
            self.counter.persist_duration_ms = ms;
        }
        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }

        self
    }

    /// Defaults, then the `--config` file or the first default location,
    /// then environment, then CLI flags.
    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, RequestCounterError> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> Result<(), RequestCounterError> {
        let mut issues = Vec::new();
        let mut require = |ok: bool, field: &str, message: &str| {
            if !ok {
                issues.push(ValidationIssue {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        require(self.server.port != 0, "server.port", "must not be zero");
        require(
            !self.server.host.trim().is_empty(),
            "server.host",
            "cannot be empty",
        );
        require(
            self.counter.interval_count > 0,
            "counter.interval-count",
            "must be greater than zero",
        );
        require(
            self.counter.interval_duration_ms > 0,
            "counter.interval-duration-ms",
            "must be greater than zero",
        );
        if self.counter.persistent {
            require(
                !self.counter.filename.as_os_str().is_empty(),
                "counter.filename",
                "cannot be empty when persistent",
            );
            require(
                self.counter.persist_duration_ms > 0,
                "counter.persist-duration-ms",
                "must be greater than zero",
            );
        }

        if parse_level(&self.logging.level).is_none() {
            issues.push(ValidationIssue {
                field: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.logging.level
                ),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(RequestCounterError::ValidationError(issues))
        }
    }

    /// Listener address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn log_level(&self) -> Result<tracing::Level, RequestCounterError> {
        parse_level(&self.logging.level).ok_or_else(|| {
            RequestCounterError::InvalidArgument(format!(
                "unknown log level '{}'",
                self.logging.level
            ))
        })
    }

    pub fn counter_config(&self) -> CounterConfig {
        CounterConfig {
            interval_count: self.counter.interval_count,
            interval_duration: Duration::from_millis(self.counter.interval_duration_ms),
            persistent: self.counter.persistent,
            filename: self.counter.filename.clone(),
            persist_duration: Duration::from_millis(self.counter.persist_duration_ms),
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub interval_count: Option<usize>,
    pub interval_duration_ms: Option<u64>,
    pub persistent: Option<bool>,
    pub filename: Option<PathBuf>,
    pub persist_duration_ms: Option<u64>,
    pub log_level: Option<String>,
}
