//! Server configuration and defaults

use crate::error::ConfigError;
use protocol::{DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How validated commands reach the [`CommandHandler`](crate::CommandHandler)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Queue callbacks on the dispatcher; the application drains them once per tick
    #[default]
    Queued,
    /// Invoke callbacks straight from the connection task
    ///
    /// The handler runs on a tokio worker behind a blocking mutex while the
    /// slot registry is locked. A slow handler stalls that worker and every
    /// other connection's commands, and a handler that calls back into
    /// [`Server`](crate::Server) from a callback deadlocks.
    Immediate,
}

/// Configuration for [`Server`](crate::Server)
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub host: String,
    pub port: u16,
    /// Number of player slots
    pub max_connections: usize,
    /// Pending-connection queue length handed to `listen`
    pub backlog: u32,
    pub verbose: bool,
    /// Seconds without any received byte before a connection is dropped
    pub idle_timeout_secs: Option<u64>,
    /// Largest undelimited message accepted before the connection is dropped
    pub max_message_len: usize,
    pub dispatch: DispatchMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            backlog: 128,
            verbose: false,
            idle_timeout_secs: Some(300),
            max_message_len: 4096,
            dispatch: DispatchMode::Queued,
        }
    }
}

impl ServerConfig {
    /// Loads a JSON config file; missing keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::Invalid(
                "max_message_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // bare IPv6 literal
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 28910);
        assert_eq!(config.max_connections, 4);
        assert!(!config.verbose);
        assert_eq!(config.dispatch, DispatchMode::Queued);
        assert_eq!(config.bind_address(), "0.0.0.0:28910");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 9000, "dispatch": "immediate"}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.dispatch, DispatchMode::Immediate);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_idle_timeout_disabled() {
        let config = ServerConfig {
            idle_timeout_secs: None,
            ..Default::default()
        };
        assert_eq!(config.idle_timeout(), None);

        let config = ServerConfig {
            idle_timeout_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_zero_slots() {
        let config = ServerConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_ipv6_bind_address() {
        let config = ServerConfig {
            host: "::1".to_string(),
            port: 80,
            ..Default::default()
        };
        assert_eq!(config.bind_address(), "[::1]:80");
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("controller-config-{}.json", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            write!(file, r#"{{"max_connections": 8, "verbose": true}}"#).unwrap();
        }

        let config = ServerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_connections, 8);
        assert!(config.verbose);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            ServerConfig::from_json_file(&path),
            Err(ConfigError::Read { .. })
        ));
    }
}
