//! Configuration Module
//!
//! Bootstrap configuration is a small TOML file that only selects the
//! variant and says where the deployment parameters live. Supports:
//! - Variant selection (direction, pattern, topology)
//! - Parameter store backend and prefix
//! - Broker connection options
//! - Cloud polling options and endpoint overrides
//! - Environment variable overrides (MQBRIDGE__* prefix)
//!
//! Everything else (credentials, endpoints, destination names) comes from
//! the parameter store and is resolved once into [`BridgeSettings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::parameters::ParameterError;

pub use settings::{BridgeSettings, CloudOptions, DeploymentShape};
pub use variant::{Direction, Pattern, Topology, Variant};

mod settings;
mod variant;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
    /// Parameter store unreachable or unreadable
    Parameter(ParameterError),
    /// A parameter the variant needs is not in the store
    MissingParameter(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ConfigError::Parameter(e) => write!(f, "Parameter store error: {}", e),
            ConfigError::MissingParameter(name) => write!(f, "Missing parameter: {}", name),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Config(e) => Some(e),
            ConfigError::Parameter(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl From<ParameterError> for ConfigError {
    fn from(e: ParameterError) -> Self {
        ConfigError::Parameter(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Variant selection and identity overrides
    pub bridge: BridgeConfig,
    /// Where deployment parameters are read from
    pub parameters: ParametersConfig,
    /// Broker connection options
    pub broker: BrokerConfig,
    /// Cloud polling options
    pub cloud: CloudConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Variant selection
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub direction: Direction,
    pub pattern: Pattern,
    pub topology: Topology,
    /// Broker client identity (defaults to the variant's proxy name)
    pub client_id: Option<String>,
    /// Durable subscriber identity (defaults to the variant's subscriber name)
    pub subscriber_id: Option<String>,
}

impl BridgeConfig {
    pub fn variant(&self) -> Variant {
        Variant::new(self.direction, self.pattern, self.topology)
    }
}

/// Parameter store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterSource {
    /// Local TOML file
    File,
    /// Remote parameter service
    #[default]
    Ssm,
}

/// Parameter store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParametersConfig {
    pub source: ParameterSource,
    /// Parameter file (file source)
    pub file: Option<PathBuf>,
    /// Service endpoint override (ssm source)
    pub endpoint: Option<String>,
    /// Service region (ssm source, used when no endpoint is given)
    pub region: Option<String>,
    /// Path prefix every key is read under
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "/PROD/INTEGRATION-APP".to_string()
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            source: ParameterSource::default(),
            file: None,
            endpoint: None,
            region: None,
            prefix: default_prefix(),
        }
    }
}

/// Broker connection options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Bound on establishing the connection (default: 10s)
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Keep alive in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    /// Seconds the broker keeps the session after a disconnect
    #[serde(default = "default_session_expiry")]
    pub session_expiry: u32,
    /// CA bundle for verifying the broker (default: system bundle)
    pub ca_cert: Option<PathBuf>,
    /// Accept mqtt:// and tcp:// endpoints
    #[serde(default)]
    pub allow_plaintext: bool,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_keep_alive() -> u16 {
    60
}

fn default_session_expiry() -> u32 {
    u32::MAX
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            keep_alive: default_keep_alive(),
            session_expiry: default_session_expiry(),
            ca_cert: None,
            allow_plaintext: false,
        }
    }
}

/// Cloud polling options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Long-poll wait per receive (default: 20s, at most 20s)
    #[serde(default = "default_wait_time", with = "humantime_serde")]
    pub wait_time: Duration,
    /// Messages per receive, 1 to 10
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    /// Queue service endpoint override
    pub sqs_endpoint: Option<String>,
    /// Topic service endpoint override
    pub sns_endpoint: Option<String>,
}

fn default_wait_time() -> Duration {
    Duration::from_secs(20)
}

fn default_max_messages() -> u32 {
    1
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            wait_time: default_wait_time(),
            max_messages: default_max_messages(),
            sqs_endpoint: None,
            sns_endpoint: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable support.
    ///
    /// Supports:
    /// - `${VAR}` and `${VAR:-default}` substitution in the file
    /// - `MQBRIDGE__SECTION__KEY` overrides (e.g. `MQBRIDGE__BRIDGE__DIRECTION`)
    ///
    /// A missing file is not an error; defaults and the environment apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("parameters.prefix", default_prefix())?
            .set_default("broker.connect_timeout", "10s")?
            .set_default("broker.keep_alive", 60)?
            .set_default("broker.allow_plaintext", false)?
            .set_default("cloud.wait_time", "20s")?
            .set_default("cloud.max_messages", 1)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.parameters.prefix.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "parameters.prefix must start with '/': {}",
                self.parameters.prefix
            )));
        }

        match self.parameters.source {
            ParameterSource::File if self.parameters.file.is_none() => {
                return Err(ConfigError::Validation(
                    "parameters.file is required when parameters.source = \"file\"".to_string(),
                ));
            }
            ParameterSource::Ssm
                if self.parameters.endpoint.is_none() && self.parameters.region.is_none() =>
            {
                return Err(ConfigError::Validation(
                    "parameters.endpoint or parameters.region is required when parameters.source = \"ssm\""
                        .to_string(),
                ));
            }
            _ => {}
        }

        if self.broker.connect_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "broker.connect_timeout must be greater than zero".to_string(),
            ));
        }

        if self.cloud.wait_time > Duration::from_secs(20) {
            return Err(ConfigError::Validation(
                "cloud.wait_time must be at most 20s".to_string(),
            ));
        }

        if !(1..=10).contains(&self.cloud.max_messages) {
            return Err(ConfigError::Validation(
                "cloud.max_messages must be between 1 and 10".to_string(),
            ));
        }

        for (name, id) in [
            ("bridge.client_id", &self.bridge.client_id),
            ("bridge.subscriber_id", &self.bridge.subscriber_id),
        ] {
            if let Some(id) = id {
                if id.is_empty() || id.contains(['/', '+', '#']) {
                    return Err(ConfigError::Validation(format!(
                        "{} must be non-empty and free of '/', '+' and '#': {:?}",
                        name, id
                    )));
                }
            }
        }

        Ok(())
    }
}
