//! Byte-stream transports the session runs over.
//!
//! The engine only needs a blocking, ordered, reliable stream. [`Connector`]
//! opens one per (re)connection attempt so tests can substitute an
//! in-memory peer for [`TcpConnector`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use wirebase_core::error::{ConnectionError, ConnectionErrorKind};
use wirebase_core::{Error, Result};

use crate::config::MySqlConfig;

/// A blocking duplex byte stream.
pub trait Transport: Read + Write + Send {
    /// Shut the stream down in both directions. Errors are ignored by the
    /// engine; the stream is dropped right after.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Bound (or with `None`, unbound) how long a read may block.
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Opens transports for a session.
pub trait Connector: Send {
    fn connect(&self, config: &MySqlConfig) -> Result<Box<dyn Transport>>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, config: &MySqlConfig) -> Result<Box<dyn Transport>> {
        let addrs = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("Invalid socket address {}: {}", config.socket_addr(), e),
                    server_code: None,
                    source: Some(Box::new(e)),
                })
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    // The read timeout bounds the handshake only; the
                    // session clears it once logged in.
                    stream.set_nodelay(true).ok();
                    stream.set_read_timeout(Some(config.connect_timeout)).ok();
                    stream.set_write_timeout(Some(config.connect_timeout)).ok();
                    tracing::debug!(%addr, "tcp connection established");
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "tcp connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let e = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        });
        let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
            ConnectionErrorKind::Refused
        } else {
            ConnectionErrorKind::Connect
        };
        Err(Error::Connection(ConnectionError {
            kind,
            message: format!("Failed to connect to {}: {}", config.socket_addr(), e),
            server_code: None,
            source: Some(Box::new(e)),
        }))
    }
}
