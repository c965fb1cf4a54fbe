//! Tailer and transport configuration.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid target '{0}': expected user@host[:port]")]
    InvalidTarget(String),
    #[error("Invalid port '{0}'")]
    InvalidPort(String),
    #[error("Tail target must not be empty")]
    EmptyTarget,
    #[error("max_retries must be at least 1")]
    ZeroRetries,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// What to follow on the device.
///
/// A file path and a container id are mutually exclusive by construction;
/// `TailConfig::target == None` disables tailing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailTarget {
    /// Follow a file being appended to.
    File(String),
    /// Follow a running container's log output.
    Container(String),
}

impl TailTarget {
    fn value(&self) -> &str {
        match self {
            Self::File(s) | Self::Container(s) => s,
        }
    }
}

impl fmt::Display for TailTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{path}"),
            Self::Container(id) => write!(f, "container:{id}"),
        }
    }
}

/// Tailer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    pub target: Option<TailTarget>,
    /// Consecutive failed connects before an attempt sequence gives up.
    pub max_retries: u32,
    /// First backoff step; attempt `n` waits `base_backoff * 2^n`.
    #[serde(with = "secs")]
    pub base_backoff: Duration,
    #[serde(with = "secs")]
    pub heartbeat_interval: Duration,
    #[serde(with = "secs")]
    pub probe_timeout: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            target: None,
            max_retries: 5,
            base_backoff: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl TailConfig {
    /// Create a configuration following `target` with default timings.
    #[must_use]
    pub fn new(target: Option<TailTarget>) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// Check the configuration for values the tailer cannot run with.
    ///
    /// # Errors
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(target) = &self.target {
            if target.value().trim().is_empty() {
                return Err(ConfigError::EmptyTarget);
            }
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        for (name, value) in [
            ("base_backoff", self.base_backoff),
            ("heartbeat_interval", self.heartbeat_interval),
            ("probe_timeout", self.probe_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    /// Whether streaming is enabled at all.
    #[must_use]
    pub const fn tailing_enabled(&self) -> bool {
        self.target.is_some()
    }
}

/// How to authenticate against the device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    Password(String),
    KeyFile(PathBuf),
    /// Whatever the local agent or default identities offer.
    #[default]
    Agent,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// Remote-shell connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub credential: Credential,
    /// Bound on a single connect attempt.
    #[serde(default = "default_connect_timeout", with = "secs")]
    pub connect_timeout: Duration,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ConnectParams {
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: DEFAULT_PORT,
            credential: Credential::Agent,
            connect_timeout: default_connect_timeout(),
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `user@host` destination string.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl FromStr for ConnectParams {
    type Err = ConfigError;

    /// Parse a `user@host[:port]` target.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTarget(s.to_string());

        let (user, rest) = s.split_once('@').ok_or_else(invalid)?;
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        let valid_user = !user.is_empty()
            && user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        let valid_host = !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid_user || !valid_host {
            return Err(invalid());
        }

        Ok(Self::new(host, user).with_port(port))
    }
}

/// Durations as (fractional) seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
