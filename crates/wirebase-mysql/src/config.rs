//! MySQL connection configuration.
//!
//! Provides connection parameters for establishing MySQL sessions
//! including authentication, charset selection and reconnection policy.
//! The struct derives `serde::Deserialize` so an outer layer can load it
//! from any serde format; unknown keys are rejected.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use wirebase_core::error::ConfigError;
use wirebase_core::{Error, Result};

use crate::charset;
use crate::protocol::ServerVersion;

/// Smallest accepted `max_packet_size`.
pub const MIN_PACKET_SIZE: u32 = 1024;

/// MySQL connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MySqlConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Schema selected at login and after every reconnect
    pub database: Option<String>,
    /// Connection collation name (default: `utf8mb4_general_ci`)
    pub collation: Option<String>,
    /// Charset or encoding name to derive a collation from when no
    /// explicit collation is given
    pub character_encoding: Option<String>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Largest logical packet sent to or accepted from the server
    /// (default: 16MB)
    pub max_packet_size: u32,
    /// Additional connection attributes
    pub attributes: HashMap<String, String>,
    /// Re-establish the session on transport failure
    pub auto_reconnect: bool,
    /// Reconnection attempts before giving up
    pub max_reconnects: u32,
    /// Base of the reconnect back-off; each delay squares the previous one
    /// (`d`, `d²`, `d⁴`, … seconds)
    pub initial_reconnect_delay: Duration,
    /// Let `caching_sha2_password`/`sha256_password` fetch the server's
    /// RSA key over an insecure link
    pub allow_public_key_retrieval: bool,
    /// Analyzed statements kept per session
    pub query_cache_size: usize,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            collation: None,
            character_encoding: None,
            connect_timeout: Duration::from_secs(30),
            max_packet_size: 16 * 1024 * 1024,
            attributes: HashMap::new(),
            auto_reconnect: false,
            max_reconnects: 3,
            initial_reconnect_delay: Duration::from_secs(2),
            allow_public_key_retrieval: false,
            query_cache_size: 256,
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the connection collation by name.
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    /// Set the charset/encoding used to pick a collation.
    pub fn character_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.character_encoding = Some(encoding.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set a connection attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn max_reconnects(mut self, attempts: u32) -> Self {
        self.max_reconnects = attempts;
        self
    }

    pub fn initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.initial_reconnect_delay = delay;
        self
    }

    pub fn allow_public_key_retrieval(mut self, allowed: bool) -> Self {
        self.allow_public_key_retrieval = allowed;
        self
    }

    pub fn query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the values that cannot be caught by the type system.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(config_error("host must not be empty"));
        }
        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(config_error(format!(
                "max_packet_size must be at least {MIN_PACKET_SIZE} bytes"
            )));
        }
        if let Some(name) = &self.collation {
            if charset::collation_id(name).is_none() {
                return Err(config_error(format!("unknown collation '{name}'")));
            }
        }
        if let Some(name) = &self.character_encoding {
            let known = charset::charset(name).is_some()
                || charset::charsets().iter().any(|c| c.maps_encoding(name));
            if !known {
                return Err(config_error(format!("unknown character encoding '{name}'")));
            }
        }
        Ok(())
    }

    /// Collation id to request at login.
    ///
    /// An explicit collation wins, then the best collation for the
    /// configured encoding on this server version, then
    /// `utf8mb4_general_ci` (or `utf8_general_ci` before 5.5.3). The handshake
    /// carries a single byte, so ids above 255 and impermissible connection
    /// collations fall back to the charset's default. Collations whose
    /// charset has no native [`TextCodec`](charset::TextCodec) fall back to
    /// the UTF-8 default.
    pub fn login_collation(&self, server: ServerVersion) -> u16 {
        let requested = self
            .collation
            .as_deref()
            .and_then(charset::collation_id)
            .or_else(|| {
                self.character_encoding.as_deref().and_then(|enc| {
                    charset::default_collation_for_charset(enc)
                        .or_else(|| charset::best_collation_for_encoding(enc, server))
                })
            });

        let fallback = if server.meets_minimum(5, 5, 3) {
            charset::UTF8MB4_GENERAL_CI
        } else {
            33 // utf8_general_ci
        };

        let id = match requested {
            Some(id) if id <= 255 && !charset::is_impermissible_connection_collation(id) => id,
            Some(id) => charset::charset_for_collation(id)
                .and_then(|cs| charset::default_collation_for_charset(cs.name))
                .filter(|d| *d <= 255 && !charset::is_impermissible_connection_collation(*d))
                .unwrap_or(fallback),
            None => fallback,
        };

        // Statements are encoded and rows decoded with the session codec, so
        // the server must speak a charset that codec handles natively.
        if charset::has_native_codec(id) {
            id
        } else {
            tracing::warn!(
                collation = charset::collation_name(id).unwrap_or("unknown"),
                "no native codec for connection charset; requesting {}",
                charset::collation_name(fallback).unwrap_or("utf8")
            );
            fallback
        }
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
    })
}
