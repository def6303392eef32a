//! Blocking MySQL protocol client.
//!
//! This crate implements the MySQL client/server protocol from scratch over
//! any blocking byte stream. It provides:
//!
//! - Packet framing with sequence numbers and 16MB splitting
//! - Handshake for protocol 9 and 10 servers, 4.1 and pre-4.1 login
//! - Authentication (old password, mysql_native_password,
//!   caching_sha2_password, sha256_password with RSA key exchange)
//! - Text protocol with client-side parameter escaping and multi-row
//!   INSERT batching
//! - Server-side prepared statements with long-data streaming
//! - Automatic reconnection with squared back-off
//! - Decoding of text and binary rows into [`Value`]s
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use wirebase_mysql::{MySqlConfig, MySqlConnection, Value};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let result = conn.execute("SELECT name FROM users WHERE id = ?", &[Value::Int(7)], None)?;
//! ```

pub mod auth;
pub mod bind;
pub mod charset;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod query;
pub mod reconnect;
pub mod result;
pub mod shared;
pub mod transport;
pub mod types;

pub use bind::{BindSlot, BindValue, Bindings};
pub use config::MySqlConfig;
pub use connection::{ConnectionState, MySqlConnection, ServerCapabilities};
pub use protocol::{PreparedStatement, ServerVersion};
pub use reconnect::ReconnectPolicy;
pub use result::{ExecuteResult, ResultSet, UpdateResult, Warning};
pub use shared::SharedMySqlConnection;
pub use transport::{Connector, TcpConnector, Transport};
pub use types::{ColumnDef, FieldType};

pub use wirebase_core::{Error, ErrorClass, Result, Row, Value};
