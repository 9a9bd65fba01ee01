//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use mt_protocol::{TerminalSize, Topics};

use super::backoff::BackoffConfig;
use super::serde_utils::duration_secs;
use crate::broker::BrokerAddress;
use crate::error::ConfigError;

/// Capacity of the bridge's inbound and outbound queues
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Largest single read from the terminal device (20 KiB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 20 * 1024;

/// How long `close` waits for the bridge pumps to finish
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the shell agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Broker URL, e.g. `wss://broker.example.com:8084/mqtt`
    pub broker: String,

    /// Broker username
    pub username: String,

    /// Broker password
    pub password: String,

    /// Device name used in the topic names (defaults to hostname)
    pub name: String,

    /// MQTT client identifier (defaults to the device name)
    pub client_id: Option<String>,

    /// Shell command line; empty means the platform default shell
    pub command: Option<String>,

    /// Extra environment variables for the shell
    pub env: Vec<(String, String)>,

    /// Initial terminal size
    pub size: TerminalSize,

    /// MQTT keep-alive interval
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,

    /// How long to wait for the first broker connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Deadline for the bridge pumps to stop on shutdown
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    /// Capacity of the inbound and outbound queues
    pub queue_capacity: usize,

    /// Largest single terminal read
    pub read_chunk_size: usize,

    /// Backoff between broker reconnect attempts
    pub backoff: BackoffConfig,

    /// Backoff between attempts to respawn a dead shell
    pub reset_backoff: BackoffConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            username: String::new(),
            password: String::new(),
            name: String::new(),
            client_id: None,
            command: None,
            env: vec![],
            size: TerminalSize::default(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            backoff: BackoffConfig::reconnect(),
            reset_backoff: BackoffConfig::reset(),
        }
    }
}

impl AgentConfig {
    /// Get the device name, falling back to hostname
    pub fn device_name(&self) -> String {
        if self.name.is_empty() {
            gethostname::gethostname().to_string_lossy().into_owned()
        } else {
            self.name.clone()
        }
    }

    /// Get the MQTT client id, falling back to the device name
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.device_name())
    }

    /// The configured shell, if any
    pub fn shell(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Input and output topics for this device
    pub fn topics(&self) -> Topics {
        Topics::for_device(&self.device_name())
    }

    /// Parse the broker URL
    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        BrokerAddress::parse(&self.broker)
    }

    /// Check that everything needed to connect is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.is_empty() {
            return Err(ConfigError::MissingField("broker".to_string()));
        }
        if self.username.is_empty() {
            return Err(ConfigError::MissingField("username".to_string()));
        }
        if self.password.is_empty() {
            return Err(ConfigError::MissingField("password".to_string()));
        }
        self.broker_address()?;

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".to_string()));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid("read_chunk_size must be positive".to_string()));
        }
        if self.size.rows == 0 || self.size.cols == 0 {
            return Err(ConfigError::Invalid(format!(
                "terminal size {}x{} is empty",
                self.size.rows, self.size.cols
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> AgentConfig {
        AgentConfig {
            broker: "mqtt://localhost".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
            name: "dev1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.queue_capacity, 200);
        assert_eq!(config.read_chunk_size, 20480);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.size, TerminalSize::new(24, 80));
    }

    #[test]
    fn test_validate_requires_credentials() {
        assert!(complete().validate().is_ok());

        let missing = AgentConfig {
            password: String::new(),
            ..complete()
        };
        assert!(matches!(
            missing.validate(),
            Err(ConfigError::MissingField(ref f)) if f == "password"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_broker() {
        let config = AgentConfig {
            broker: "ftp://localhost".to_string(),
            ..complete()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Broker { .. })));
    }

    #[test]
    fn test_names_and_topics() {
        let config = complete();
        assert_eq!(config.client_id(), "dev1");
        assert_eq!(config.topics().input, "/shell/dev1/input");

        let unnamed = AgentConfig {
            name: String::new(),
            ..complete()
        };
        assert!(!unnamed.device_name().is_empty());
    }

    #[test]
    fn test_blank_command_means_default_shell() {
        let config = AgentConfig {
            command: Some("  ".to_string()),
            ..complete()
        };
        assert_eq!(config.shell(), None);
    }
}
