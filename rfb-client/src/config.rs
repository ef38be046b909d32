//! Configuration types for the VNC client.

use crate::errors::RfbClientError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete VNC client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Security settings.
    pub security: SecurityConfig,
    /// Input settings.
    pub input: InputConfig,
    /// Reconnection settings.
    pub reconnect: ReconnectConfig,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port (typically 5900 + display number).
    pub port: u16,
    /// VNC password (if required).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connection timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Preferred encodings in priority order.
    #[serde(default = "default_encodings")]
    pub encodings: Vec<i32>,
    /// JPEG quality (0-9), if applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Compression level (0-9), if applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<u8>,
}

fn default_encodings() -> Vec<i32> {
    // Minimal, known-good baseline encodings: Raw(0), CopyRect(1), ZRLE(16)
    vec![
        rfb_encodings::ENCODING_RAW,
        rfb_encodings::ENCODING_COPY_RECT,
        rfb_encodings::ENCODING_ZRLE,
    ]
}

/// Security configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// TLS configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// View-only mode (no input sent to server).
    #[serde(default)]
    pub view_only: bool,
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS encryption.
    pub enabled: bool,
    /// Server name for certificate validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Path to CA certificate file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Skip certificate validation (DANGEROUS - use only for testing).
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

/// Input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Pointer event rate limit in Hz.
    #[serde(default = "default_pointer_rate_hz")]
    pub pointer_rate_hz: u32,
    /// Enable pointer event throttling.
    #[serde(default = "default_true")]
    pub pointer_throttle: bool,
}

fn default_pointer_rate_hz() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of retry attempts (0 = infinite).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0-1.0) for backoff randomization.
    #[serde(default = "default_jitter")]
    pub jitter: f32,
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_jitter() -> f32 {
    0.1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                host: String::new(),
                port: 5900,
                password: None,
                timeout_ms: default_timeout_ms(),
            },
            display: DisplayConfig {
                encodings: default_encodings(),
                quality: None,
                compression: None,
            },
            security: SecurityConfig {
                tls: None,
                view_only: false,
            },
            input: InputConfig {
                pointer_rate_hz: default_pointer_rate_hz(),
                pointer_throttle: default_true(),
            },
            reconnect: ReconnectConfig {
                enabled: false,
                max_retries: default_max_retries(),
                backoff_ms: default_backoff_ms(),
                max_backoff_ms: default_max_backoff_ms(),
                jitter: default_jitter(),
            },
        }
    }
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), RfbClientError> {
        // Validate host
        if self.connection.host.is_empty() {
            return Err(RfbClientError::ProtocolViolation("Host cannot be empty".to_string()));
        }

        // Validate port
        if self.connection.port == 0 {
            return Err(RfbClientError::ProtocolViolation("Port cannot be 0".to_string()));
        }

        // Validate encodings
        if self.display.encodings.is_empty() {
            return Err(RfbClientError::ProtocolViolation(
                "At least one encoding must be specified".to_string(),
            ));
        }

        // Validate jitter
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(RfbClientError::ProtocolViolation(
                "Jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms)
    }

    /// Returns the configured encodings list, in priority order.
    ///
    /// The bandwidth governor (see [`crate::bandwidth`]) reorders this list at
    /// runtime based on measured throughput; this is just the configured baseline.
    #[must_use]
    pub fn effective_encodings(&self) -> Vec<i32> {
        self.display.encodings.clone()
    }
}

/// Builder for creating a `Config`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the server hostname or IP address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.connection.host = host.into();
        self
    }

    /// Sets the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.connection.port = port;
        self
    }

    /// Sets the VNC password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.connection.password = Some(password.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Config, RfbClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
