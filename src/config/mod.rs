//! Engine configuration: request limits, file serving defaults, the listen
//! address and the concurrency mode.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! max_content_length = 1048576
//! port = 8080
//! concurrency = "threaded"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// How accepted connections are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// One OS thread per connection.
    Threaded,
    /// Tasks on a single cooperative runtime.
    #[default]
    Cooperative,
    /// One connection at a time, to completion.
    Synchronous,
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    Invalid(String),
}

/// Engine settings. Read-only once serving starts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest body read eagerly into memory; bigger bodies are left for
    /// `Request::stream`.
    pub max_body_length: usize,
    /// Requests declaring a larger `Content-Length` get a 413.
    pub max_content_length: usize,
    /// Longest accepted request or header line.
    pub max_readline: usize,
    /// Chunk size used when sending file and stream bodies.
    pub send_file_buffer_size: usize,
    /// Default `Cache-Control` max age for `Response::send_file`.
    pub send_file_max_age: Option<u64>,
    /// Largest WebSocket frame payload; `None` means `max_body_length`.
    pub ws_max_message_length: Option<usize>,
    pub host: String,
    pub port: u16,
    pub concurrency: ConcurrencyMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_body_length: 16 * 1024,
            max_content_length: 16 * 1024,
            max_readline: 2 * 1024,
            send_file_buffer_size: 1024,
            send_file_max_age: None,
            ws_max_message_length: None,
            host: "0.0.0.0".to_owned(),
            port: 5000,
            concurrency: ConcurrencyMode::default(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_readline == 0 {
            return Err(ConfigError::Invalid("max_readline must be positive".into()));
        }
        if self.send_file_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "send_file_buffer_size must be positive".into(),
            ));
        }
        if self.ws_max_message_length == Some(0) {
            return Err(ConfigError::Invalid(
                "ws_max_message_length must be positive".into(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        Ok(())
    }

    /// The effective WebSocket message limit.
    pub fn ws_max_message_length(&self) -> usize {
        self.ws_max_message_length.unwrap_or(self.max_body_length)
    }

    /// `host:port`, as passed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn max_body_length(mut self, bytes: usize) -> Self {
        self.max_body_length = bytes;
        self
    }

    #[must_use]
    pub fn max_content_length(mut self, bytes: usize) -> Self {
        self.max_content_length = bytes;
        self
    }

    #[must_use]
    pub fn max_readline(mut self, bytes: usize) -> Self {
        self.max_readline = bytes;
        self
    }

    #[must_use]
    pub fn send_file_buffer_size(mut self, bytes: usize) -> Self {
        self.send_file_buffer_size = bytes;
        self
    }

    #[must_use]
    pub fn send_file_max_age(mut self, seconds: u64) -> Self {
        self.send_file_max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn ws_max_message(mut self, bytes: usize) -> Self {
        self.ws_max_message_length = Some(bytes);
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }
}
