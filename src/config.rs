//! Harness configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! gives the stock behaviour. Durations are written as fractional seconds.
//!
//! ```toml
//! [api]
//! base_url = "http://sf-1:13000"
//! namespace = "system"
//! key = "..."
//!
//! [poll]
//! timeout = 300
//! interval = 5
//!
//! [console]
//! prompt_timeout = 600
//!
//! [console.credentials]
//! username = "cirros"
//! password = "gocubsgo"
//! ```

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "CI_TESTS_CONFIG";
pub const ENV_API_URL: &str = "CI_API_URL";
pub const ENV_NAMESPACE: &str = "CI_NAMESPACE";
pub const ENV_KEY: &str = "CI_KEY";

/// ASCII ETX, what a terminal sends for Ctrl-C.
pub const CTRL_C: &str = "\x03";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub api: ApiConfig,
    pub poll: PollConfig,
    pub console: ConsoleConfig,
    pub ping: PingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    pub namespace: Option<String>,
    pub key: Option<String>,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:13000".to_string(),
            namespace: None,
            key: None,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Deadline and interval for event polling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    #[serde(with = "secs")]
    pub timeout: Duration,
    #[serde(with = "secs")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        // cirros image defaults
        Self {
            username: "cirros".to_string(),
            password: "gocubsgo".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Sleep between reads while waiting for output.
    #[serde(with = "secs")]
    pub poll_interval: Duration,
    /// Best-effort wait for a `login:` line.
    #[serde(with = "secs")]
    pub login_timeout: Duration,
    /// Pause after sending a command before reading its output.
    #[serde(with = "secs")]
    pub settle_delay: Duration,
    /// Deadline for the shell prompt after a command. `None` waits forever.
    #[serde(with = "opt_secs")]
    pub prompt_timeout: Option<Duration>,
    pub shell_prompt: String,
    /// Keystrokes sent before logging in, to back out of whatever the
    /// console was doing.
    pub reset_sequence: Vec<String>,
    pub credentials: Credentials,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            login_timeout: Duration::from_secs(120),
            settle_delay: Duration::from_secs(5),
            prompt_timeout: Some(Duration::from_secs(300)),
            shell_prompt: "\n$ ".to_string(),
            reset_sequence: vec![CTRL_C.to_string(), CTRL_C.to_string(), "\nexit\n".to_string()],
            credentials: Credentials::default(),
        }
    }
}

impl ConsoleConfig {
    /// Full resynchronisation sequence: reset keystrokes, then the login lines.
    pub fn fresh_sequence(&self) -> Vec<String> {
        let mut seq = self.reset_sequence.clone();
        seq.push(format!("{}\n", self.credentials.username));
        seq.push(format!("{}\n", self.credentials.password));
        seq
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PingConfig {
    pub count: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self { count: 1 }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path`, else from `$CI_TESTS_CONFIG`, else defaults; then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match std::env::var_os(ENV_CONFIG_PATH) {
                Some(p) => Self::from_file(Path::new(&p))?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override API settings from a variable lookup (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(ns) = get(ENV_NAMESPACE) {
            self.api.namespace = Some(ns);
        }
        if let Some(key) = get(ENV_KEY) {
            self.api.key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.interval.is_zero() {
            return Err(HarnessError::Config("poll.interval must be positive".into()));
        }
        if self.console.poll_interval.is_zero() {
            return Err(HarnessError::Config("console.poll_interval must be positive".into()));
        }
        if self.console.shell_prompt.is_empty() {
            return Err(HarnessError::Config("console.shell_prompt must not be empty".into()));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(HarnessError::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                self.api.base_url
            )));
        }
        if self.ping.count == 0 {
            return Err(HarnessError::Config("ping.count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Duration from a number of seconds given on the command line.
pub fn seconds_arg(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        HarnessError::Config(format!(
            "{} must be a non-negative number of seconds, got {}: {}",
            name, secs, e
        ))
    })
}

/// Event timestamp bound given on the command line. Must be finite.
pub fn timestamp_arg(name: &str, ts: f64) -> Result<f64> {
    if ts.is_finite() {
        Ok(ts)
    } else {
        Err(HarnessError::Config(format!(
            "{} must be a finite timestamp, got {}",
            name, ts
        )))
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    /// A non-positive value means "no deadline".
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
