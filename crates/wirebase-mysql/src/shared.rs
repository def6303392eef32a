//! A session handle that can be shared between threads.

use std::sync::{Arc, Mutex, MutexGuard};

use wirebase_core::{Result, Value};

use crate::bind::Bindings;
use crate::config::MySqlConfig;
use crate::connection::MySqlConnection;
use crate::result::{ExecuteResult, UpdateResult};

/// A cloneable handle to one [`MySqlConnection`].
///
/// Every call takes the lock for the whole command/response exchange, so
/// commands from different threads never interleave on the wire.
///
/// # Example
///
/// ```rust,ignore
/// let shared = SharedMySqlConnection::connect(config)?;
/// let worker = shared.clone();
/// std::thread::spawn(move || worker.execute("DELETE FROM jobs WHERE done", &[], None));
/// ```
pub struct SharedMySqlConnection {
    inner: Arc<Mutex<MySqlConnection>>,
}

impl SharedMySqlConnection {
    /// Create a new shared connection from a raw connection.
    pub fn new(conn: MySqlConnection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create a new shared connection by connecting to the server.
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        MySqlConnection::connect(config).map(Self::new)
    }

    /// Get the inner Arc for cloning.
    pub fn inner(&self) -> &Arc<Mutex<MySqlConnection>> {
        &self.inner
    }

    /// Lock the session for a sequence of calls.
    ///
    /// A thread that panicked mid-exchange may have left unread packets on
    /// the stream, so a poisoned session is closed before it is handed out.
    pub fn lock(&self) -> MutexGuard<'_, MySqlConnection> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                tracing::warn!("session lock poisoned, closing connection");
                guard.force_close();
                self.inner.clear_poison();
                guard
            }
        }
    }

    pub fn execute(
        &self,
        sql: &str,
        params: &[Value],
        max_rows: Option<usize>,
    ) -> Result<ExecuteResult> {
        self.lock().execute(sql, params, max_rows)
    }

    pub fn execute_batch(&self, sql: &str, param_sets: &mut [Bindings]) -> Result<Vec<UpdateResult>> {
        self.lock().execute_batch(sql, param_sets)
    }

    pub fn ping(&self) -> Result<()> {
        self.lock().ping()
    }

    pub fn close(&self) -> Result<()> {
        self.lock().close()
    }
}

impl Clone for SharedMySqlConnection {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for SharedMySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMySqlConnection")
            .field("inner", &"Arc<Mutex<MySqlConnection>>")
            .finish()
    }
}
