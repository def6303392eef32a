//! Error types for wirebase operations.
//!
//! Every failure carries a stable classification ([`ErrorClass`]) plus a
//! human-readable message. Only [`ErrorClass::TransportFailure`] is ever
//! retried by the session engine.

use std::fmt;

/// The primary error type for all wirebase operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, authentication, lost link)
    Connection(ConnectionError),
    /// Error packet returned by the server for a command
    Query(QueryError),
    /// Type conversion errors when reading values out of rows
    Type(TypeError),
    /// Malformed packet or unexpected status byte (wire-level)
    Protocol(ProtocolError),
    /// A packet would exceed the configured maximum size
    Capacity(CapacityError),
    /// Caller misuse: unset parameter, bad index, closed session
    Usage(UsageError),
    /// Invalid configuration
    Config(ConfigError),
    /// I/O errors on the transport
    Io(std::io::Error),
}

/// Stable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed packet, unexpected status byte, out-of-order sequence
    ProtocolViolation,
    /// The server rejected the credentials
    AuthenticationFailure,
    /// The server answered a command with an error packet
    ServerError,
    /// I/O error or unexpected end of stream
    TransportFailure,
    /// A packet would exceed the maximum packet size
    CapacityExceeded,
    /// A caller bug (unset parameter, bad index, closed session)
    UsageError,
}

impl ErrorClass {
    /// Stable machine-readable code for this class.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorClass::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorClass::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            ErrorClass::ServerError => "SERVER_ERROR",
            ErrorClass::TransportFailure => "TRANSPORT_FAILURE",
            ErrorClass::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorClass::UsageError => "USAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    /// Server error code, when the failure came from an error packet
    pub server_code: Option<u16>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the transport
    Connect,
    /// Connection refused by the peer
    Refused,
    /// Authentication failed
    Authentication,
    /// Connection lost during an exchange
    Disconnected,
    /// Every reconnection attempt failed
    ReconnectExhausted,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Server error code (e.g. 1054 for an unknown column)
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Table, column or schema not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large or out of range for the column
    DataTruncation,
    /// Deadlock detected
    Deadlock,
    /// Lock wait timeout or query interrupted
    Timeout,
    /// Any other server error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct CapacityError {
    /// Size that was required
    pub requested: usize,
    /// Configured ceiling
    pub limit: usize,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// A placeholder has no bound value (1-based position)
    ParameterNotSet(usize),
    /// Parameter index outside the placeholder range
    IndexOutOfRange,
    /// Operation on a closed session
    Closed,
    /// Reading a caller-supplied stream parameter failed
    StreamRead,
    /// Any other invalid argument
    InvalidArgument,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// Stable classification of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Protocol(_) => ErrorClass::ProtocolViolation,
            Error::Connection(c) if c.kind == ConnectionErrorKind::Authentication => {
                ErrorClass::AuthenticationFailure
            }
            Error::Connection(_) | Error::Io(_) => ErrorClass::TransportFailure,
            Error::Query(_) => ErrorClass::ServerError,
            Error::Capacity(_) => ErrorClass::CapacityExceeded,
            Error::Usage(_) | Error::Type(_) | Error::Config(_) => ErrorClass::UsageError,
        }
    }

    /// Stable machine-readable code, see [`ErrorClass::code`].
    pub fn code(&self) -> &'static str {
        self.class().code()
    }

    /// Whether the reconnection state machine may retry after this error.
    ///
    /// Reconnect exhaustion is a transport failure but is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(c.kind, ConnectionErrorKind::Disconnected),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Is this a failure of the link itself?
    pub fn is_connection_error(&self) -> bool {
        matches!(self.class(), ErrorClass::TransportFailure)
    }

    /// Server error code, if the error came from an error packet.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => Some(q.code),
            Error::Connection(c) => c.server_code,
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g. "42S22" for an unknown column)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for a [`UsageErrorKind::Closed`] error.
    pub fn closed() -> Self {
        Error::Usage(UsageError {
            kind: UsageErrorKind::Closed,
            message: "connection already closed".to_string(),
        })
    }

    /// Shorthand for a [`UsageErrorKind::ParameterNotSet`] error.
    pub fn parameter_not_set(position: usize) -> Self {
        Error::Usage(UsageError {
            kind: UsageErrorKind::ParameterNotSet(position),
            message: format!("No value specified for parameter {position}"),
        })
    }

    /// Shorthand for a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            raw_data: None,
        })
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.code == 1062 || self.code == 1586
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.code, 1216 | 1217 | 1451 | 1452)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => match e.server_code {
                Some(code) => write!(f, "Connection error ({}): {}", code, e.message),
                None => write!(f, "Connection error: {}", e.message),
            },
            Error::Query(e) => write!(f, "Server error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Capacity(e) => write!(f, "Capacity exceeded: {}", e),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(sqlstate) => write!(f, "[{}] {} (SQLSTATE {})", self.code, self.message, sqlstate),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packet of {} bytes is larger than the maximum of {} bytes (max_allowed_packet)",
            self.requested, self.limit
        )
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<CapacityError> for Error {
    fn from(err: CapacityError) -> Self {
        Error::Capacity(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for wirebase operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(code: u16, kind: QueryErrorKind) -> Error {
        Error::Query(QueryError {
            kind,
            code,
            sqlstate: Some("42S22".to_string()),
            message: "Unknown column 'x' in 'field list'".to_string(),
            sql: Some("SELECT x".to_string()),
            source: None,
        })
    }

    #[test]
    fn classification_codes() {
        assert_eq!(
            Error::protocol("bad status").class(),
            ErrorClass::ProtocolViolation
        );
        assert_eq!(
            server_error(1054, QueryErrorKind::NotFound).class(),
            ErrorClass::ServerError
        );
        assert_eq!(Error::closed().class(), ErrorClass::UsageError);
        assert_eq!(Error::parameter_not_set(2).code(), "USAGE_ERROR");

        let auth = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Authentication,
            message: "Access denied".to_string(),
            server_code: Some(1045),
            source: None,
        });
        assert_eq!(auth.class(), ErrorClass::AuthenticationFailure);
        assert_eq!(auth.server_code(), Some(1045));

        let capacity = Error::Capacity(CapacityError {
            requested: 10,
            limit: 4,
        });
        assert_eq!(capacity.code(), "CAPACITY_EXCEEDED");
    }

    #[test]
    fn only_transport_failures_retry() {
        let io = Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ));
        assert!(io.is_retryable());
        assert!(io.is_connection_error());

        let exhausted = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::ReconnectExhausted,
            message: "gave up".to_string(),
            server_code: None,
            source: None,
        });
        assert_eq!(exhausted.class(), ErrorClass::TransportFailure);
        assert!(!exhausted.is_retryable());

        assert!(!server_error(1213, QueryErrorKind::Deadlock).is_retryable());
        assert!(!Error::protocol("x").is_retryable());
    }

    #[test]
    fn server_error_accessors() {
        let err = server_error(1054, QueryErrorKind::NotFound);
        assert_eq!(err.sqlstate(), Some("42S22"));
        assert_eq!(err.sql(), Some("SELECT x"));
        assert_eq!(err.server_code(), Some(1054));
        assert!(err.to_string().contains("1054"));
    }

    #[test]
    fn parameter_not_set_names_position() {
        let err = Error::parameter_not_set(3);
        assert!(err.to_string().contains("parameter 3"));
        match err {
            Error::Usage(u) => assert_eq!(u.kind, UsageErrorKind::ParameterNotSet(3)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
