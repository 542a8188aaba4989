//! Configuration for the coordination core.
//!
//! Sources are merged in order, later overriding earlier:
//! 1. Type defaults
//! 2. TOML file named by `CONFIG_PATH` (if set)
//! 3. Environment variables with the `COORD__` prefix, e.g.
//!    `COORD__SESSION__TICK_MS=500`
//!
//! ```toml
//! [server]
//! server_id = 1
//!
//! [session]
//! tick_ms = 2000
//! sweep_interval_ms = 1000
//! event_queue_capacity = 1024
//!
//! [limits]
//! max_data_bytes = 1048576
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{CoordError, Result};
use crate::path::MAX_PATH_LENGTH;

const ENV_PREFIX: &str = "COORD";

/// Smallest usable event queue: `Connecting` and `Connected` are queued at
/// open.
pub const MIN_EVENT_QUEUE_CAPACITY: usize = 2;

/// Upper bound on any session timeout.
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl CoordConfig {
    /// Loads configuration from defaults, `CONFIG_PATH` and the environment.
    ///
    /// Does not validate; call [`validate`](Self::validate) once all
    /// overrides are applied.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies overrides from another file, then the environment again.
    pub fn with_override_config(&self, path: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated config.
    pub fn validate(self) -> Result<Self> {
        self.session.validate()?;
        self.limits.validate()?;
        Ok(self)
    }
}

fn invalid(message: String) -> CoordError {
    CoordError::Config(ConfigError::Message(message))
}

/// Identity of this node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Stamped into the top byte of every session id.
    #[serde(default)]
    pub server_id: u8,
}

/// Session timing and event delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base time unit. Timeout bounds default to multiples of it.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Lower bound for negotiated session timeouts. 0 means 2 ticks.
    #[serde(default)]
    pub min_session_timeout_ms: u64,

    /// Upper bound for negotiated session timeouts. 0 means 20 ticks.
    #[serde(default)]
    pub max_session_timeout_ms: u64,

    /// How often the reaper looks for expired sessions.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Capacity of each session's event queue. A session whose queue
    /// overflows is expired.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

fn default_tick_ms() -> u64 {
    2000
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_event_queue_capacity() -> usize {
    1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            min_session_timeout_ms: 0,
            max_session_timeout_ms: 0,
            sweep_interval_ms: default_sweep_interval_ms(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn min_timeout(&self) -> Duration {
        match self.min_session_timeout_ms {
            0 => Duration::from_millis(self.tick_ms.saturating_mul(2)),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn max_timeout(&self) -> Duration {
        match self.max_session_timeout_ms {
            0 => Duration::from_millis(self.tick_ms.saturating_mul(20)),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(invalid("session.tick_ms must be greater than 0".into()));
        }
        if self.min_timeout() > self.max_timeout() {
            return Err(invalid(format!(
                "session timeout bounds inverted: min {}ms > max {}ms",
                self.min_timeout().as_millis(),
                self.max_timeout().as_millis()
            )));
        }
        if self.max_timeout() > MAX_SESSION_TIMEOUT {
            return Err(invalid(format!(
                "session timeout bound {}ms exceeds the {}ms limit",
                self.max_timeout().as_millis(),
                MAX_SESSION_TIMEOUT.as_millis()
            )));
        }
        if !(10..=60_000).contains(&self.sweep_interval_ms) {
            return Err(invalid(format!(
                "session.sweep_interval_ms must be between 10 and 60000, got {}",
                self.sweep_interval_ms
            )));
        }
        if self.event_queue_capacity < MIN_EVENT_QUEUE_CAPACITY {
            return Err(invalid(format!(
                "session.event_queue_capacity must be at least {}, got {}",
                MIN_EVENT_QUEUE_CAPACITY, self.event_queue_capacity
            )));
        }
        Ok(())
    }
}

/// Size limits on paths and payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsConfig {
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,

    #[serde(default = "default_max_data_bytes")]
    pub max_data_bytes: usize,
}

fn default_max_path_length() -> usize {
    MAX_PATH_LENGTH
}

fn default_max_data_bytes() -> usize {
    1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_path_length: default_max_path_length(),
            max_data_bytes: default_max_data_bytes(),
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_path_length < 2 {
            return Err(invalid(format!(
                "limits.max_path_length must be at least 2, got {}",
                self.max_path_length
            )));
        }
        Ok(())
    }
}
