//! Reconnection policy.
//!
//! When `auto_reconnect` is on and a command fails at the transport level,
//! the session probes the link with a ping and, if that fails too, opens a
//! new transport up to `max_reconnects` times. Before attempt `n` it sleeps
//! for the previous delay squared, starting from `initial_reconnect_delay`
//! (seconds): `d`, `d²`, `d⁴`, …

use std::time::Duration;

use wirebase_core::Error;
use wirebase_core::error::{ConnectionError, ConnectionErrorKind};

use crate::config::MySqlConfig;

/// Attempt ceiling and back-off seed for one recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &MySqlConfig) -> Self {
        Self {
            max_attempts: config.max_reconnects,
            initial_delay: config.initial_reconnect_delay,
        }
    }

    /// Delay to sleep before each attempt, one item per attempt.
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            remaining: self.max_attempts,
        }
    }

    /// Terminal error once every attempt has failed.
    pub fn exhausted(&self, last: Error) -> Error {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::ReconnectExhausted,
            message: format!(
                "Communication link failure: gave up after {} reconnection attempts: {}",
                self.max_attempts, last
            ),
            server_code: None,
            source: Some(Box::new(last)),
        })
    }
}

/// Iterator over the squared back-off delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        let secs = current.as_secs_f64();
        self.next = Duration::try_from_secs_f64(secs * secs).unwrap_or(Duration::MAX);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}
