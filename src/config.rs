//! Configuration loading and management.
//!
//! The sentry is configured from a single YAML file. Lifecycle-notice
//! regexes are compiled at load time so a bad pattern is fatal before we
//! ever connect.

use regex::Regex;
use serde::Deserialize;
use serde::de::Error as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("bad server string: {0}")]
    BadServer(String),
    #[error("`{key}` is missing the required capture group `{group}`")]
    MissingGroup {
        /// Config key holding the offending regex.
        key: &'static str,
        /// Name of the absent capture group.
        group: &'static str,
    },
}

/// Log output format, mirrors the tracing-subscriber setup.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// Structured JSON output.
    Json,
}

/// SASL credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct SaslConfig {
    pub username: String,
    pub password: String,
}

/// OPER credentials. Presence of `file` switches to challenge-response.
#[derive(Debug, Clone, Deserialize)]
pub struct OperConfig {
    pub name: String,
    pub pass: String,
    /// RSA private key file for CHALLENGE.
    #[serde(default)]
    pub file: Option<String>,
}

impl OperConfig {
    /// Key file with `~` expanded, if configured.
    pub fn key_file(&self) -> Option<PathBuf> {
        self.file.as_deref().map(expand_tilde)
    }
}

/// Sentry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server host string, `host:port` with a `+` port prefix for TLS.
    pub server: String,
    pub nickname: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    realname: Option<String>,
    pub password: Option<String>,

    pub sasl: Option<SaslConfig>,
    pub oper: OperConfig,

    /// Main operator report channel.
    pub channel: String,
    /// Secondary verbose channel; deduplicated against `channel` if equal.
    pub verbose: String,

    /// Send a self-PM around each check to suppress idle timeout.
    #[serde(default)]
    pub antiidle: bool,

    /// Size of the recent-observation ring.
    #[serde(default = "default_history")]
    pub history: usize,

    /// Durable store location.
    pub database: String,

    /// Regex extracting connect notices; needs groups
    /// `nick`, `user`, `host`, `real` and optionally `ip`.
    #[serde(deserialize_with = "de_regex")]
    pub cliconnre: Regex,
    /// Regex extracting exit notices; needs group `nick`.
    #[serde(deserialize_with = "de_regex")]
    pub cliexitre: Regex,
    /// Regex extracting nick-change notices; needs groups `old` and `new`.
    #[serde(deserialize_with = "de_regex")]
    pub clinickre: Regex,

    /// Ban command template expanded at LETHAL time.
    pub bancmd: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_history() -> usize {
    1000
}

fn de_regex<'de, D>(deserializer: D) -> Result<Regex, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let pattern = String::deserialize(deserializer)?;
    Regex::new(&pattern).map_err(D::Error::custom)
}

/// A parsed server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        config.database = expand_tilde(&config.database)
            .to_string_lossy()
            .into_owned();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        for group in ["nick", "user", "host", "real"] {
            require_group(&self.cliconnre, "cliconnre", group)?;
        }
        require_group(&self.cliexitre, "cliexitre", "nick")?;
        require_group(&self.clinickre, "clinickre", "old")?;
        require_group(&self.clinickre, "clinickre", "new")?;
        Ok(())
    }

    /// Username on the network, defaulting to the nickname.
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }

    /// Realname on the network, defaulting to the nickname.
    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nickname)
    }

    /// Parse the `server` key into host, port and TLS marker.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let (host, port) = self
            .server
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::BadServer(self.server.clone()))?;
        let tls = port.starts_with('+');
        let port = port
            .trim_start_matches('+')
            .parse::<u16>()
            .map_err(|_| ConfigError::BadServer(self.server.clone()))?;
        Ok(Endpoint {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// Report channels in delivery order, deduplicated when equal.
    pub fn report_channels(&self) -> Vec<&str> {
        if self.channel == self.verbose {
            vec![self.channel.as_str()]
        } else {
            vec![self.channel.as_str(), self.verbose.as_str()]
        }
    }
}

fn require_group(
    re: &Regex,
    key: &'static str,
    group: &'static str,
) -> Result<(), ConfigError> {
    if re.capture_names().flatten().any(|name| name == group) {
        Ok(())
    } else {
        Err(ConfigError::MissingGroup { key, group })
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return Path::new(&home).join(rest);
    }
    PathBuf::from(path)
}
