//! Channel configuration.
//!
//! Options are read once when a [`Channel`](crate::protocol::Channel) is built
//! and never change afterwards. Defaults can be overridden from the
//! environment with [`ChannelConfig::from_env`]:
//!
//! | Variable                           | Option               |
//! |------------------------------------|----------------------|
//! | `STRATA_BINARY_MAX_CONTENT_LENGTH` | `max_chunk_size`     |
//! | `STRATA_BINARY_DEBUG`              | `debug`              |
//! | `STRATA_LOCK_TIMEOUT_MS`           | `lock_timeout`       |
//! | `STRATA_SOCKET_TIMEOUT_MS`         | `socket_timeout`     |
//! | `STRATA_SOCKET_BUFFER_SIZE`        | `socket_buffer_size` |
use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

pub const MAX_CONTENT_LENGTH_VAR: &str = "STRATA_BINARY_MAX_CONTENT_LENGTH";
pub const DEBUG_VAR: &str = "STRATA_BINARY_DEBUG";
pub const LOCK_TIMEOUT_VAR: &str = "STRATA_LOCK_TIMEOUT_MS";
pub const SOCKET_TIMEOUT_VAR: &str = "STRATA_SOCKET_TIMEOUT_MS";
pub const SOCKET_BUFFER_VAR: &str = "STRATA_SOCKET_BUFFER_SIZE";

pub const DEFAULT_MAX_CHUNK_SIZE: usize = 32_736;
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{name} must be greater than zero")]
    Zero { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Upper bound on any single length-prefixed frame or collection count.
    pub max_chunk_size: usize,
    /// Logs every wire operation when set.
    pub debug: bool,
    /// How long `close` waits for the exclusive lock before going ahead anyway.
    pub lock_timeout: Duration,
    /// Read/write timeout applied to the socket; `None` blocks indefinitely.
    pub socket_timeout: Option<Duration>,
    /// Capacity of the buffered reader and writer.
    pub socket_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            debug: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            socket_timeout: None,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Defaults overridden by any `STRATA_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`ChannelConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(MAX_CONTENT_LENGTH_VAR) {
            config.max_chunk_size = parse(MAX_CONTENT_LENGTH_VAR, &v)?;
        }
        if let Some(v) = lookup(DEBUG_VAR) {
            config.debug = parse_bool(DEBUG_VAR, &v)?;
        }
        if let Some(v) = lookup(LOCK_TIMEOUT_VAR) {
            config.lock_timeout = Duration::from_millis(parse(LOCK_TIMEOUT_VAR, &v)?);
        }
        if let Some(v) = lookup(SOCKET_TIMEOUT_VAR) {
            config.socket_timeout = match parse(SOCKET_TIMEOUT_VAR, &v)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };
        }
        if let Some(v) = lookup(SOCKET_BUFFER_VAR) {
            config.socket_buffer_size = parse(SOCKET_BUFFER_VAR, &v)?;
        }

        config.validate()
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_socket_timeout(mut self, socket_timeout: Option<Duration>) -> Self {
        self.socket_timeout = socket_timeout;
        self
    }

    pub fn with_socket_buffer_size(mut self, socket_buffer_size: usize) -> Self {
        self.socket_buffer_size = socket_buffer_size;
        self
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_chunk_size == 0 {
            return Err(ConfigError::Zero {
                name: "max_chunk_size".to_string(),
            });
        }
        if self.max_chunk_size > i32::MAX as usize {
            return Err(ConfigError::Invalid {
                name: "max_chunk_size".to_string(),
                value: self.max_chunk_size.to_string(),
                reason: "frames are limited to a 32-bit length".to_string(),
            });
        }
        if self.socket_buffer_size == 0 {
            return Err(ConfigError::Zero {
                name: "socket_buffer_size".to_string(),
            });
        }
        if self.socket_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Zero {
                name: "socket_timeout".to_string(),
            });
        }
        Ok(self)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ChannelConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ChannelConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        assert_eq!(from_vars(&[]).unwrap(), ChannelConfig::default());
        assert!(!ChannelConfig::default().debug);
    }

    #[test]
    fn variables_override_defaults() {
        let config = from_vars(&[
            (MAX_CONTENT_LENGTH_VAR, "1024"),
            (DEBUG_VAR, "TRUE"),
            (LOCK_TIMEOUT_VAR, "250"),
            (SOCKET_TIMEOUT_VAR, "0"),
            (SOCKET_BUFFER_VAR, "4096"),
        ])
        .unwrap();

        assert_eq!(config.max_chunk_size, 1024);
        assert!(config.debug);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.socket_timeout, None);
        assert_eq!(config.socket_buffer_size, 4096);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            from_vars(&[(MAX_CONTENT_LENGTH_VAR, "lots")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            from_vars(&[(DEBUG_VAR, "maybe")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            from_vars(&[(MAX_CONTENT_LENGTH_VAR, "0")]),
            Err(ConfigError::Zero { .. })
        ));
    }

    #[test]
    fn builder_setters() {
        let config = ChannelConfig::default()
            .with_max_chunk_size(64)
            .with_debug(true)
            .with_socket_timeout(Some(Duration::from_secs(1)))
            .validate()
            .unwrap();

        assert_eq!(config.max_chunk_size, 64);
        assert!(config.debug);
        assert_eq!(config.socket_timeout, Some(Duration::from_secs(1)));
    }
}
