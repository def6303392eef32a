//! MySQL session engine.
//!
//! A [`MySqlConnection`] owns one transport and runs the protocol state
//! machine over it:
//!
//! ```text
//! Disconnected -> Handshaking -> Ready -> Busy -> Ready ... -> Closed
//!                                  \       |
//!                                   Reconnecting (auto_reconnect only)
//! ```
//!
//! Exactly one command is in flight at a time. Commands are serialized into
//! a send buffer reused across commands; responses are read packet by packet
//! into a receive buffer that is likewise reused. Handshake, ping and other
//! control packets use small scratch buffers so a command waiting in the send
//! buffer survives a reconnection and can be replayed.

// MySQL protocol uses well-defined packet sizes that fit in u32 (max 16MB)
#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;

use wirebase_core::error::{
    ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind, UsageError, UsageErrorKind,
};
use wirebase_core::{Error, ErrorClass, Result, Row, Value};

use crate::auth::{self, AuthPlugin};
use crate::bind::{BindSlot, Bindings, TextContext, write_text_statement};
use crate::charset::{self, TextCodec};
use crate::config::MySqlConfig;
use crate::protocol::{
    Command, EofPacket, ErrPacket, MAX_PACKET_SIZE, OkPacket, PacketBuffer, PacketHeader,
    PacketType, PreparedStatement, ServerVersion, StmtPrepareOk, capabilities, prepared,
    server_status,
};
use crate::query::{QueryInfo, QueryInfoCache};
use crate::reconnect::ReconnectPolicy;
use crate::result::{ExecuteResult, ResultSet, UpdateResult, Warning};
use crate::transport::{Connector, TcpConnector, Transport};
use crate::types::{ColumnDef, decode_binary_row, decode_text_value};

/// Connection state in the MySQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Greeting and authentication in progress
    Handshaking,
    /// Ready for commands
    Ready,
    /// A command/response exchange is in flight
    Busy,
    /// Re-establishing the session after a transport failure
    Reconnecting,
    /// Closed for good
    Closed,
}

/// What the server announced in its greeting.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    /// Protocol version (9 or 10)
    pub protocol_version: u8,
    /// Server version string
    pub server_version: String,
    /// Parsed server version
    pub version: ServerVersion,
    /// Connection (thread) ID
    pub connection_id: u32,
    /// Server capability flags
    pub capabilities: u32,
    /// Server default charset
    pub charset: u8,
    /// Server status flags
    pub status_flags: u16,
    /// Authentication plugin name, when announced
    pub auth_plugin: Option<String>,
    /// Authentication data (scramble)
    pub auth_data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowFormat {
    Text,
    Binary,
}

/// MySQL connection.
///
/// Manages a transport to a MySQL server, handling the wire protocol,
/// authentication, reconnection and state tracking. Methods take
/// `&mut self`; share a session between threads with
/// [`crate::SharedMySqlConnection`].
pub struct MySqlConnection {
    transport: Option<Box<dyn Transport>>,
    connector: Box<dyn Connector>,
    config: MySqlConfig,
    state: ConnectionState,
    server: Option<ServerCapabilities>,
    /// Capabilities agreed at login
    client_caps: u32,
    collation: u16,
    codec: TextCodec,
    status_flags: u16,
    /// Sequence id expected on the next packet read or written
    sequence_id: u8,
    send: PacketBuffer,
    recv: PacketBuffer,
    query_cache: QueryInfoCache,
    affected_rows: u64,
    last_insert_id: u64,
    warning_count: u16,
    warnings: Vec<Warning>,
    /// Bumped on every successful handshake; prepared statements from an
    /// older generation belong to a dead session
    generation: u64,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Establish a new connection to the MySQL server over TCP.
    ///
    /// This performs the complete connection handshake:
    /// 1. TCP connection
    /// 2. Receive server greeting
    /// 3. Send login packet with authentication
    /// 4. Handle auth result (possibly auth switch or RSA exchange)
    #[tracing::instrument(level = "debug", skip_all, fields(host = %config.host, port = config.port))]
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        Self::connect_with(config, TcpConnector)
    }

    /// Establish a session over transports opened by `connector`.
    pub fn connect_with(config: MySqlConfig, connector: impl Connector + 'static) -> Result<Self> {
        config.validate()?;
        let send_limit = config.max_packet_size as usize + PacketHeader::SIZE;
        let mut conn = Self {
            transport: None,
            connector: Box::new(connector),
            state: ConnectionState::Disconnected,
            server: None,
            client_caps: 0,
            collation: charset::UTF8MB4_GENERAL_CI,
            codec: TextCodec::Utf8,
            status_flags: 0,
            sequence_id: 0,
            send: PacketBuffer::with_max_size(1024, send_limit),
            recv: PacketBuffer::with_max_size(1024, config.max_packet_size as usize),
            query_cache: QueryInfoCache::new(config.query_cache_size),
            affected_rows: 0,
            last_insert_id: 0,
            warning_count: 0,
            warnings: Vec::new(),
            generation: 0,
            config,
        };
        conn.establish()?;
        Ok(conn)
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is ready for commands.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Ready)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Get the connection ID.
    pub fn connection_id(&self) -> u32 {
        self.server.as_ref().map_or(0, |s| s.connection_id)
    }

    /// Get the server version.
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server.as_ref().map(|s| s.version)
    }

    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server.as_ref()
    }

    /// Collation id negotiated at login.
    pub fn collation(&self) -> u16 {
        self.collation
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    /// Whether the server runs with the `NO_BACKSLASH_ESCAPES` SQL mode.
    pub fn no_backslash_escapes(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0
    }

    /// Get the number of affected rows from the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Get the last insert ID.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Get the number of warnings from the last statement.
    pub fn warning_count(&self) -> u16 {
        self.warning_count
    }

    /// Warnings collected by [`MySqlConnection::fetch_warnings`], oldest first.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    /// Execute a statement through the text protocol.
    ///
    /// `?` placeholders are replaced by the escaped `params`. A result set
    /// keeps at most `max_rows` rows; the rest are read and dropped.
    #[tracing::instrument(level = "debug", skip(self, params), fields(params = params.len()))]
    pub fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: Option<usize>,
    ) -> Result<ExecuteResult> {
        let mut bindings = Bindings::from_values(params);
        self.execute_bound(sql, &mut bindings, max_rows)
    }

    /// Execute a statement with explicitly built bindings (typed slots,
    /// streams, escape control).
    pub fn execute_bound(
        &mut self,
        sql: &str,
        bindings: &mut Bindings,
        max_rows: Option<usize>,
    ) -> Result<ExecuteResult> {
        self.ensure_open()?;
        let info = self
            .query_cache
            .get_or_analyze(sql, self.no_backslash_escapes());
        self.encode_query(&info, std::slice::from_mut(bindings))?;
        tracing::debug!(keyword = ?info.first_keyword(), len = self.send.len(), "sending query");

        self.run_command(true, |conn| {
            conn.send_command()?;
            conn.read_response(RowFormat::Text, max_rows)
        })
        .map_err(|e| attach_sql(e, sql))
    }

    /// Execute one statement for each parameter set.
    ///
    /// INSERT/REPLACE statements whose placeholders all sit in the VALUES
    /// list are folded into multi-row statements, as many rows per packet as
    /// `max_packet_size` allows; one [`UpdateResult`] is returned per
    /// statement actually sent. Other statements run once per set.
    #[tracing::instrument(level = "debug", skip(self, param_sets), fields(sets = param_sets.len()))]
    pub fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &mut [Bindings],
    ) -> Result<Vec<UpdateResult>> {
        self.ensure_open()?;
        if param_sets.is_empty() {
            return Ok(Vec::new());
        }
        let info = self
            .query_cache
            .get_or_analyze(sql, self.no_backslash_escapes());
        let has_streams = param_sets
            .iter()
            .any(|set| set.slots().any(BindSlot::is_stream));

        if !info.is_rewritable() || has_streams || param_sets.len() == 1 {
            return param_sets
                .iter_mut()
                .map(|set| self.execute_bound(sql, set, None).and_then(into_update))
                .collect();
        }

        let mut results = Vec::new();
        let mut start = 0;
        let mut chunk = param_sets.len();
        while start < param_sets.len() {
            chunk = chunk.min(param_sets.len() - start);
            let batch = info
                .for_batch(chunk)
                .ok_or_else(|| Error::protocol("statement lost its VALUES clause"))?;
            match self.encode_query(&batch, &mut param_sets[start..start + chunk]) {
                Ok(()) => {}
                Err(Error::Capacity(_)) if chunk > 1 => {
                    chunk /= 2;
                    tracing::trace!(chunk, "multi-row statement too large, splitting");
                    continue;
                }
                Err(e) => return Err(e),
            }
            tracing::debug!(rows = chunk, len = self.send.len(), "sending multi-row statement");
            let result = self
                .run_command(true, |conn| {
                    conn.send_command()?;
                    conn.read_response(RowFormat::Text, None)
                })
                .map_err(|e| attach_sql(e, sql))?;
            results.push(into_update(result)?);
            start += chunk;
        }
        Ok(results)
    }

    /// Ping the server to check connection.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn ping(&mut self) -> Result<()> {
        self.run_command(false, Self::ping_exchange)
    }

    /// Make `schema` the default schema (`COM_INIT_DB`). It is reselected
    /// after every reconnect.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn select_schema(&mut self, schema: &str) -> Result<()> {
        self.run_command(true, |conn| conn.init_db(schema))?;
        self.config.database = Some(schema.to_string());
        Ok(())
    }

    /// Prepare a server-side statement (binary protocol).
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.ensure_open()?;
        if !self.protocol_41() {
            return Err(usage_error(
                UsageErrorKind::InvalidArgument,
                "server-side prepared statements need a 4.1 or newer server",
            ));
        }
        self.run_command(true, |conn| conn.prepare_exchange(sql))
            .map_err(|e| attach_sql(e, sql))
    }

    /// Execute a prepared statement.
    ///
    /// Stream parameters are sent ahead as `COM_STMT_SEND_LONG_DATA`
    /// chunks. A statement prepared on a session that has since been
    /// re-established is prepared again first.
    #[tracing::instrument(level = "debug", skip(self, stmt, bindings), fields(statement_id = stmt.statement_id))]
    pub fn execute_prepared(
        &mut self,
        stmt: &mut PreparedStatement,
        bindings: &mut Bindings,
        max_rows: Option<usize>,
    ) -> Result<ExecuteResult> {
        self.ensure_open()?;
        if bindings.len() != stmt.param_count() {
            return Err(usage_error(
                UsageErrorKind::InvalidArgument,
                format!(
                    "statement has {} parameters but {} were supplied",
                    stmt.param_count(),
                    bindings.len()
                ),
            ));
        }
        bindings.check_all_set()?;

        if stmt.generation != self.generation {
            tracing::debug!(sql = %stmt.sql, "re-preparing statement from a previous session");
            let fresh = self.run_command(true, |conn| conn.prepare_exchange(&stmt.sql))?;
            *stmt = fresh;
        }

        let streamed = match self.run_command(false, |conn| conn.send_long_data(stmt, bindings)) {
            Ok(streamed) => streamed,
            Err(e) => {
                // Chunks already sent would otherwise prefix the next execution
                if matches!(&e, Error::Usage(u) if u.kind == UsageErrorKind::StreamRead) {
                    if let Err(reset) = self.reset_prepared(stmt) {
                        tracing::debug!(error = %reset, "statement reset after stream failure failed");
                    }
                }
                return Err(attach_sql(e, &stmt.sql));
            }
        };
        self.send.start_packet()?;
        prepared::write_stmt_execute(&mut self.send, stmt.statement_id, bindings, self.codec)?;

        // Long data does not survive a reconnect, so streamed executions
        // are not replayed.
        self.run_command(!streamed, |conn| {
            if stmt.generation != conn.generation {
                let fresh = conn.prepare_exchange(&stmt.sql)?;
                conn.patch_statement_id(fresh.statement_id)?;
                *stmt = fresh;
            }
            conn.send_command()?;
            conn.read_response(RowFormat::Binary, max_rows)
        })
        .map_err(|e| attach_sql(e, &stmt.sql))
    }

    /// Discard long data already sent for `stmt` (`COM_STMT_RESET`).
    pub fn reset_prepared(&mut self, stmt: &PreparedStatement) -> Result<()> {
        if stmt.generation != self.generation {
            return Ok(());
        }
        self.run_command(false, |conn| {
            conn.send.start_packet()?;
            prepared::write_stmt_reset(&mut conn.send, stmt.statement_id)?;
            conn.send_command()?;
            conn.read_packet()?;
            conn.expect_ok().map(|_| ())
        })
    }

    /// Close a prepared statement. No response is expected.
    pub fn close_prepared(&mut self, stmt: PreparedStatement) -> Result<()> {
        // Statements of an older generation died with their session
        if stmt.generation != self.generation || self.is_closed() {
            return Ok(());
        }
        self.run_command(false, |conn| {
            conn.send.start_packet()?;
            prepared::write_stmt_close(&mut conn.send, stmt.statement_id)?;
            conn.send_command()
        })
    }

    /// Collect the warnings of the last statement with `SHOW WARNINGS`,
    /// appending them to [`MySqlConnection::warnings`].
    pub fn fetch_warnings(&mut self) -> Result<&[Warning]> {
        if self.warning_count > 0 {
            let result = self.execute("SHOW WARNINGS", &[], None)?;
            if let Some(rows) = result.into_rows() {
                self.warnings.extend(rows.into_iter().map(|row| warning_from_row(&row)));
            }
            self.warning_count = 0;
        }
        Ok(&self.warnings)
    }

    /// Close the connection gracefully: best-effort `COM_QUIT`, then
    /// release the transport.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.transport.is_some() {
            let mut buf = PacketBuffer::new(PacketHeader::SIZE + 1);
            if buf.start_packet().is_ok() && buf.write_u8(Command::Quit as u8).is_ok() {
                self.sequence_id = 0;
                // Best effort - ignore errors on close
                if let Err(e) = self.send_scratch(&mut buf) {
                    tracing::debug!(error = %e, "COM_QUIT failed");
                }
            }
        }
        self.abandon();
        Ok(())
    }

    /// Drop the transport without saying goodbye.
    pub fn force_close(&mut self) {
        self.abandon();
    }

    // === Session lifecycle ===

    /// Open a transport and run the handshake on it.
    fn establish(&mut self) -> Result<()> {
        self.state = ConnectionState::Handshaking;
        let transport = match self.connector.connect(&self.config) {
            Ok(t) => t,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        self.transport = Some(transport);
        self.sequence_id = 0;

        match self.handshake() {
            Ok(()) => {
                // Statements may run for as long as the server takes
                if let Some(transport) = self.transport.as_mut() {
                    if let Err(e) = transport.set_read_timeout(None) {
                        tracing::debug!(error = %e, "could not clear read timeout");
                    }
                }
                self.generation += 1;
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.drop_transport();
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<()> {
        self.read_packet()?;
        let server = self.parse_greeting()?;
        tracing::debug!(
            protocol = server.protocol_version,
            version = %server.server_version,
            connection_id = server.connection_id,
            "server greeting"
        );

        let plugin = if server.protocol_version < 10 {
            AuthPlugin::Legacy
        } else if server.capabilities & capabilities::CLIENT_SECURE_CONNECTION == 0 {
            AuthPlugin::OldPassword
        } else {
            server
                .auth_plugin
                .as_deref()
                .and_then(AuthPlugin::from_name)
                .unwrap_or(AuthPlugin::NativePassword)
        };

        self.client_caps = self.client_capabilities(&server);
        self.collation = if self.protocol_41() {
            self.config.login_collation(server.version)
        } else if server.charset == 0 {
            charset::LATIN1_SWEDISH_CI
        } else {
            u16::from(server.charset)
        };
        self.codec = TextCodec::for_collation(self.collation);
        self.status_flags = server.status_flags;

        let seed = server.auth_data.clone();
        let response = self.auth_response(plugin, &seed)?;
        let mut login = PacketBuffer::new(128);
        self.write_login(&mut login, plugin, &response)?;
        self.server = Some(server);
        self.send_scratch(&mut login)?;
        self.authenticate(plugin, seed)?;

        if self.client_caps & capabilities::CLIENT_CONNECT_WITH_DB == 0 {
            if let Some(db) = self.config.database.clone() {
                self.init_db(&db)?;
            }
        }
        Ok(())
    }

    /// Parse the greeting (protocol 9 or 10) sitting in the receive buffer.
    fn parse_greeting(&mut self) -> Result<ServerCapabilities> {
        let buf = &mut self.recv;
        let protocol_version = buf.read_u8()?;
        if protocol_version == 0xFF {
            // Refused before the handshake (too many connections, host blocked)
            let err = ErrPacket::parse(buf, 10)?;
            return Err(login_error(&err));
        }
        if !(9..=10).contains(&protocol_version) {
            return Err(Error::protocol(format!(
                "Unsupported protocol version: {}",
                protocol_version
            )));
        }

        let server_version = String::from_utf8_lossy(buf.read_null_terminated()?).into_owned();
        let connection_id = buf.read_u32()?;
        let mut auth_data = buf.read_null_terminated()?.to_vec();
        let mut caps = if buf.remaining() >= 2 {
            u32::from(buf.read_u16()?)
        } else {
            0
        };

        let mut charset = 0;
        let mut status_flags = 0;
        let mut auth_plugin = None;
        if buf.remaining() >= 16 {
            charset = buf.read_u8()?;
            status_flags = buf.read_u16()?;
            caps |= u32::from(buf.read_u16()?) << 16;
            let auth_data_len = usize::from(buf.read_u8()?);
            // Reserved
            buf.skip(10)?;

            if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
                let len2 = auth_data_len
                    .saturating_sub(8)
                    .max(13)
                    .min(buf.remaining());
                let part2 = buf.read_bytes(len2)?;
                // Remove trailing NUL if present
                auth_data.extend_from_slice(part2.strip_suffix(&[0u8]).unwrap_or(part2));
            }
            if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 && buf.remaining() > 0 {
                auth_plugin =
                    Some(String::from_utf8_lossy(buf.read_null_terminated()?).into_owned());
            }
        }

        Ok(ServerCapabilities {
            protocol_version,
            version: ServerVersion::parse(&server_version),
            server_version,
            connection_id,
            capabilities: caps,
            charset,
            status_flags,
            auth_plugin,
            auth_data,
        })
    }

    fn client_capabilities(&self, server: &ServerCapabilities) -> u32 {
        let mut wanted = if server.capabilities & capabilities::CLIENT_PROTOCOL_41 != 0 {
            capabilities::DEFAULT_CLIENT_FLAGS
        } else {
            capabilities::CLIENT_LONG_PASSWORD
                | capabilities::CLIENT_LONG_FLAG
                | capabilities::CLIENT_TRANSACTIONS
                | capabilities::CLIENT_CONNECT_WITH_DB
        };
        if self.config.database.is_none() {
            wanted &= !capabilities::CLIENT_CONNECT_WITH_DB;
        }
        if self.config.attributes.is_empty() {
            wanted &= !capabilities::CLIENT_CONNECT_ATTRS;
        }
        wanted & server.capabilities
    }

    fn password(&self) -> &str {
        self.config.password.as_deref().unwrap_or("")
    }

    /// First response for `plugin`.
    fn auth_response(&self, plugin: AuthPlugin, seed: &[u8]) -> Result<Vec<u8>> {
        let password = self.password();
        if plugin == AuthPlugin::Sha256
            && !password.is_empty()
            && !self.config.allow_public_key_retrieval
        {
            return Err(public_key_not_allowed());
        }
        Ok(plugin.scramble(password, seed))
    }

    /// Write the login packet in the 4.1 or pre-4.1 layout.
    fn write_login(&self, out: &mut PacketBuffer, plugin: AuthPlugin, response: &[u8]) -> Result<()> {
        let caps = self.client_caps;
        let user = self.codec.encode(&self.config.user);
        let database = self.config.database.as_deref().map(|db| self.codec.encode(db));
        out.start_packet()?;

        if caps & capabilities::CLIENT_PROTOCOL_41 == 0 {
            out.write_u16(caps as u16)?;
            out.write_u24(self.config.max_packet_size.min(MAX_PACKET_SIZE as u32))?;
            out.write_null_terminated(&user)?;
            out.write_null_terminated(response)?;
            if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
                if let Some(db) = &database {
                    out.write_null_terminated(db)?;
                }
            }
            return Ok(());
        }

        out.write_u32(caps)?;
        out.write_u32(self.config.max_packet_size)?;
        // The collation byte; login_collation never yields ids above 255
        out.write_u8(self.collation as u8)?;
        out.write_zeros(23)?;
        out.write_null_terminated(&user)?;

        if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            out.write_lenenc_bytes(response)?;
        } else if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // Auth responses are always < 256 bytes (SHA1=20, SHA256=32)
            out.write_u8(response.len() as u8)?;
            out.write_bytes(response)?;
        } else {
            out.write_null_terminated(response)?;
        }

        if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            out.write_null_terminated(database.as_deref().unwrap_or_default())?;
        }
        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            out.write_null_terminated(plugin.name().as_bytes())?;
        }
        if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
            let mut attrs = PacketBuffer::new(64);
            for (key, value) in &self.config.attributes {
                attrs.write_lenenc_bytes(key.as_bytes())?;
                attrs.write_lenenc_bytes(value.as_bytes())?;
            }
            out.write_lenenc_bytes(attrs.as_slice())?;
        }
        Ok(())
    }

    /// Drive the authentication exchange until the server accepts or
    /// rejects the login.
    fn authenticate(&mut self, mut plugin: AuthPlugin, mut seed: Vec<u8>) -> Result<()> {
        loop {
            self.read_packet()?;
            match self.recv.peek() {
                Some(0x00) => {
                    let protocol_41 = self.protocol_41();
                    let ok = OkPacket::parse(&mut self.recv, protocol_41)?;
                    self.status_flags = ok.status_flags;
                    tracing::debug!(plugin = plugin.name(), "authenticated");
                    return Ok(());
                }
                Some(0xFF) => {
                    let protocol_version = self.protocol_version();
                    let err = ErrPacket::parse(&mut self.recv, protocol_version)?;
                    return Err(login_error(&err));
                }
                Some(0xFE) => {
                    self.recv.skip(1)?;
                    if self.recv.remaining() == 0 {
                        // Old-password request: re-scramble with the 8-byte seed
                        plugin = AuthPlugin::OldPassword;
                        seed.truncate(8);
                    } else {
                        let name =
                            String::from_utf8_lossy(self.recv.read_null_terminated()?).into_owned();
                        let data = self.recv.read_rest();
                        seed = data.strip_suffix(&[0u8]).unwrap_or(data).to_vec();
                        plugin = AuthPlugin::from_name(&name).ok_or_else(|| {
                            auth_error(format!("Unsupported authentication plugin '{}'", name))
                        })?;
                    }
                    tracing::debug!(plugin = plugin.name(), "auth switch requested");
                    let mut response = self.auth_response(plugin, &seed)?;
                    if plugin == AuthPlugin::OldPassword {
                        response.push(0);
                    }
                    self.send_auth_data(&response)?;
                }
                Some(0x01) => {
                    self.recv.skip(1)?;
                    let data = self.recv.read_rest().to_vec();
                    self.continue_auth(plugin, &seed, &data)?;
                }
                Some(other) => {
                    return Err(Error::protocol(format!(
                        "Unknown auth response: 0x{:02X}",
                        other
                    )));
                }
                None => return Err(Error::protocol("Empty authentication response")),
            }
        }
    }

    /// Handle an "auth more data" packet of `caching_sha2_password` or
    /// `sha256_password`.
    fn continue_auth(&mut self, plugin: AuthPlugin, seed: &[u8], data: &[u8]) -> Result<()> {
        match (plugin, data.first().copied()) {
            (AuthPlugin::CachingSha2, Some(auth::caching_sha2::FAST_AUTH_SUCCESS)) => {
                // Fast auth succeeded, the final OK follows
                tracing::trace!("caching_sha2 fast auth succeeded");
                Ok(())
            }
            (AuthPlugin::CachingSha2, Some(auth::caching_sha2::PERFORM_FULL_AUTH)) => {
                if !self.config.allow_public_key_retrieval {
                    return Err(public_key_not_allowed());
                }
                tracing::debug!("full authentication required, requesting server public key");
                self.send_auth_data(&[auth::caching_sha2::REQUEST_PUBLIC_KEY])
            }
            (AuthPlugin::CachingSha2 | AuthPlugin::Sha256, Some(b'-')) => {
                // PEM public key; servers from 8.0.5 expect OAEP for caching_sha2
                let use_oaep = plugin == AuthPlugin::Sha256
                    || self
                        .server_version()
                        .is_some_and(|v| v.meets_minimum(8, 0, 5));
                let response = auth::sha256_password_rsa(self.password(), seed, data, use_oaep)?;
                self.send_auth_data(&response)
            }
            _ => Err(Error::protocol(format!(
                "Unexpected authentication data for {}",
                plugin.name()
            ))),
        }
    }

    fn send_auth_data(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = PacketBuffer::new(PacketHeader::SIZE + data.len());
        buf.start_packet()?;
        buf.write_bytes(data)?;
        self.send_scratch(&mut buf)
    }

    fn init_db(&mut self, schema: &str) -> Result<()> {
        let mut buf = self.scratch(schema.len() + 1);
        buf.start_packet()?;
        buf.write_u8(Command::InitDb as u8)?;
        buf.write_bytes(&self.codec.encode(schema))?;
        self.sequence_id = 0;
        self.send_scratch(&mut buf)?;
        self.read_packet()?;
        self.expect_ok().map(|_| ())
    }

    fn ping_exchange(&mut self) -> Result<()> {
        let mut buf = PacketBuffer::new(PacketHeader::SIZE + 1);
        buf.start_packet()?;
        buf.write_u8(Command::Ping as u8)?;
        self.sequence_id = 0;
        self.send_scratch(&mut buf)?;
        self.read_packet()?;
        self.expect_ok().map(|_| ())
    }

    // === Command plumbing ===

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() || self.transport.is_none() {
            return Err(Error::closed());
        }
        Ok(())
    }

    /// Run one exchange, recovering from a transport failure when
    /// `auto_reconnect` is on and the exchange can be replayed.
    fn run_command<T>(
        &mut self,
        replayable: bool,
        mut exchange: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        self.state = ConnectionState::Busy;
        let result = match exchange(self) {
            Err(err) if replayable && self.config.auto_reconnect && err.is_retryable() => {
                match self.recover(err) {
                    Ok(()) => {
                        self.state = ConnectionState::Busy;
                        exchange(self)
                    }
                    Err(e) => Err(e),
                }
            }
            other => other,
        };
        self.settle(result.as_ref().err());
        result
    }

    /// Pick the state after an exchange. Protocol violations and
    /// unrecovered transport failures leave the stream unusable.
    fn settle(&mut self, error: Option<&Error>) {
        match error {
            Some(e) if e.class() == ErrorClass::ProtocolViolation => {
                tracing::debug!(error = %e, "protocol violation, closing connection");
                self.abandon();
            }
            Some(e) if e.is_connection_error() && self.state == ConnectionState::Busy => {
                self.abandon();
            }
            _ if self.state == ConnectionState::Busy => self.state = ConnectionState::Ready,
            _ => {}
        }
    }

    /// Probe the link and, when it is dead, re-establish the session.
    ///
    /// Returns `cause` when the probe succeeds (the failure was not the
    /// link's), and a terminal error once every attempt has failed.
    fn recover(&mut self, cause: Error) -> Result<()> {
        self.state = ConnectionState::Reconnecting;
        if self.transport.is_some() && self.ping_exchange().is_ok() {
            tracing::debug!(error = %cause, "link still alive, not reconnecting");
            self.state = ConnectionState::Ready;
            return Err(cause);
        }
        self.drop_transport();

        let policy = ReconnectPolicy::from_config(&self.config);
        tracing::warn!(
            error = %cause,
            max_attempts = policy.max_attempts,
            "communication link failure, reconnecting"
        );
        let mut last = cause;
        for (attempt, delay) in policy.delays().enumerate() {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            match self.establish() {
                Ok(()) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        connection_id = self.connection_id(),
                        "reconnected; server-side session state (temporary tables, session variables, prepared statements) was lost"
                    );
                    return Ok(());
                }
                Err(e) if e.class() == ErrorClass::AuthenticationFailure => {
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(attempt = attempt + 1, error = %e, "reconnection attempt failed");
                    last = e;
                }
            }
        }
        self.state = ConnectionState::Closed;
        Err(policy.exhausted(last))
    }

    fn abandon(&mut self) {
        self.drop_transport();
        self.state = ConnectionState::Closed;
    }

    fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.shutdown();
        }
    }

    /// A scratch buffer honoring the packet ceiling.
    fn scratch(&self, payload_capacity: usize) -> PacketBuffer {
        let limit = self.config.max_packet_size as usize + PacketHeader::SIZE;
        PacketBuffer::with_max_size(payload_capacity + PacketHeader::SIZE, limit)
    }

    fn encode_query(&mut self, info: &QueryInfo, rows: &mut [Bindings]) -> Result<()> {
        let ctx = TextContext {
            codec: self.codec,
            no_backslash_escapes: self.no_backslash_escapes(),
        };
        self.send.start_packet()?;
        self.send.write_u8(Command::Query as u8)?;
        write_text_statement(info, rows, &mut self.send, ctx)
    }

    /// Send the packet waiting in the send buffer as a new command.
    fn send_command(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or_else(Error::closed)?;
        self.sequence_id = write_frame(transport, &mut self.send, 0)?;
        Ok(())
    }

    /// Send `buf` as the next packet of the current exchange.
    fn send_scratch(&mut self, buf: &mut PacketBuffer) -> Result<()> {
        let transport = self.transport.as_mut().ok_or_else(Error::closed)?;
        self.sequence_id = write_frame(transport, buf, self.sequence_id)?;
        Ok(())
    }

    /// Read one logical packet (joining continuation packets) into the
    /// receive buffer, validating sequence ids.
    fn read_packet(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or_else(Error::closed)?;
        self.recv.clear();
        loop {
            let mut header = [0u8; PacketHeader::SIZE];
            transport
                .read_exact(&mut header)
                .map_err(|e| link_error("Failed to read packet header", Error::Io(e)))?;
            let header = PacketHeader::from_bytes(&header);
            if header.sequence_id != self.sequence_id {
                return Err(Error::protocol(format!(
                    "Packets out of order: expected sequence id {}, got {}",
                    self.sequence_id, header.sequence_id
                )));
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let limit = self.config.max_packet_size as usize;
            if self.recv.len() + len > limit {
                return Err(Error::protocol(format!(
                    "Server packet of {} bytes exceeds max_packet_size ({limit})",
                    self.recv.len() + len
                )));
            }
            self.recv
                .fill_from(transport, len)
                .map_err(|e| link_error("Failed to read packet payload", e))?;
            tracing::trace!(len, seq = header.sequence_id, "read packet");
            if len < MAX_PACKET_SIZE {
                break;
            }
        }
        Ok(())
    }

    fn protocol_41(&self) -> bool {
        self.client_caps & capabilities::CLIENT_PROTOCOL_41 != 0
    }

    fn protocol_version(&self) -> u8 {
        self.server.as_ref().map_or(10, |s| s.protocol_version)
    }

    /// Turn the error packet in the receive buffer into an error.
    fn read_server_error(&mut self) -> Error {
        let protocol_version = self.protocol_version();
        match ErrPacket::parse(&mut self.recv, protocol_version) {
            Ok(err) => query_error(&err),
            Err(e) => e,
        }
    }

    /// Kind of the packet in the receive buffer.
    fn packet_type(&self) -> Option<PacketType> {
        self.recv
            .peek()
            .map(|b| PacketType::from_first_byte(b, self.recv.len()))
    }

    fn expect_ok(&mut self) -> Result<UpdateResult> {
        match self.packet_type() {
            Some(PacketType::Ok) => {
                let protocol_41 = self.protocol_41();
                let ok = OkPacket::parse(&mut self.recv, protocol_41)?;
                Ok(self.apply_ok(ok))
            }
            Some(PacketType::Error) => Err(self.read_server_error()),
            Some(other) => Err(Error::protocol(format!(
                "Expected OK packet, got {other:?} packet"
            ))),
            None => Err(Error::protocol("Empty response packet")),
        }
    }

    fn apply_ok(&mut self, ok: OkPacket) -> UpdateResult {
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warning_count = ok.warnings;
        UpdateResult {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            status_flags: ok.status_flags,
            warning_count: ok.warnings,
            info: ok.info,
        }
    }

    /// Read the complete response to a query or execute. Only the first
    /// result is returned; further results are drained.
    fn read_response(&mut self, format: RowFormat, max_rows: Option<usize>) -> Result<ExecuteResult> {
        self.read_packet()?;
        let first = self.read_result(format, max_rows)?;
        while self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0 {
            self.read_packet()?;
            self.read_result(format, Some(0))?;
        }
        Ok(first)
    }

    /// Interpret the first packet of a result, sitting in the receive buffer.
    fn read_result(&mut self, format: RowFormat, max_rows: Option<usize>) -> Result<ExecuteResult> {
        match self.packet_type() {
            None => Err(Error::protocol("Empty response packet")),
            Some(PacketType::Ok) => {
                let protocol_41 = self.protocol_41();
                let ok = OkPacket::parse(&mut self.recv, protocol_41)?;
                Ok(ExecuteResult::Update(self.apply_ok(ok)))
            }
            Some(PacketType::Error) => Err(self.read_server_error()),
            Some(PacketType::LocalInfile) => self.refuse_local_infile(),
            Some(PacketType::Eof | PacketType::Data) => {
                let count = self.recv.read_length()?;
                let count = usize::try_from(count)
                    .map_err(|_| Error::protocol(format!("Invalid column count {}", count)))?;
                self.read_result_set(count, format, max_rows)
                    .map(ExecuteResult::Rows)
            }
        }
    }

    /// Answer a `LOAD DATA LOCAL INFILE` request with an empty packet (no
    /// data) and fail the statement.
    fn refuse_local_infile(&mut self) -> Result<ExecuteResult> {
        self.recv.skip(1)?;
        let file = String::from_utf8_lossy(self.recv.read_rest()).into_owned();
        tracing::warn!(file = %file, "server requested a local file, refusing");

        let mut empty = PacketBuffer::new(PacketHeader::SIZE);
        empty.start_packet()?;
        self.send_scratch(&mut empty)?;
        self.read_packet()?;
        if let Err(e) = self.expect_ok() {
            tracing::debug!(error = %e, "server response to refused LOCAL INFILE");
        }
        Err(usage_error(
            UsageErrorKind::InvalidArgument,
            format!("LOAD DATA LOCAL INFILE is not supported (requested '{}')", file),
        ))
    }

    fn read_result_set(
        &mut self,
        column_count: usize,
        format: RowFormat,
        max_rows: Option<usize>,
    ) -> Result<ResultSet> {
        let columns = self.read_column_defs(column_count)?;
        let info = ResultSet::column_info(&columns);
        let mut result = ResultSet::new(columns);

        loop {
            self.read_packet()?;
            match self.packet_type() {
                Some(PacketType::Eof) => {
                    let eof = EofPacket::parse(&mut self.recv)?;
                    if self.protocol_41() {
                        self.status_flags = eof.status_flags;
                    }
                    self.warning_count = eof.warnings;
                    result.finish(self.status_flags, eof.warnings);
                    tracing::debug!(rows = result.total_rows(), kept = result.len(), "result set drained");
                    return Ok(result);
                }
                Some(PacketType::Error) => return Err(self.read_server_error()),
                _ if !result.accepts(max_rows) => result.skip_row(),
                _ => {
                    let values = match format {
                        RowFormat::Text => decode_text_row(result.columns(), &mut self.recv)?,
                        RowFormat::Binary => decode_binary_row(result.columns(), &mut self.recv)?,
                    };
                    result.push(Row::with_columns(Arc::clone(&info), values));
                }
            }
        }
    }

    /// Read `count` column definitions and the EOF that follows them.
    fn read_column_defs(&mut self, count: usize) -> Result<Vec<ColumnDef>> {
        let mut defs = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            self.read_packet()?;
            let def = if self.protocol_41() {
                ColumnDef::parse_41(&mut self.recv, self.codec)?
            } else {
                ColumnDef::parse_320(&mut self.recv, self.collation)?
            };
            defs.push(def);
        }
        if count > 0 {
            self.read_packet()?;
            match self.packet_type() {
                Some(PacketType::Eof) => {}
                Some(PacketType::Error) => return Err(self.read_server_error()),
                _ => return Err(Error::protocol("Expected EOF after column definitions")),
            }
        }
        Ok(defs)
    }

    fn prepare_exchange(&mut self, sql: &str) -> Result<PreparedStatement> {
        let mut buf = self.scratch(sql.len() + 1);
        buf.start_packet()?;
        prepared::write_stmt_prepare(&mut buf, &self.codec.encode(sql))?;
        self.sequence_id = 0;
        self.send_scratch(&mut buf)?;

        self.read_packet()?;
        if self.packet_type() == Some(PacketType::Error) {
            return Err(self.read_server_error());
        }
        let ok = StmtPrepareOk::parse(&mut self.recv)?;
        let params = self.read_column_defs(usize::from(ok.num_params))?;
        let columns = self.read_column_defs(usize::from(ok.num_columns))?;
        tracing::debug!(
            statement_id = ok.statement_id,
            params = ok.num_params,
            columns = ok.num_columns,
            "statement prepared"
        );

        let mut stmt = PreparedStatement::new(ok.statement_id, sql.to_string(), params, columns);
        stmt.generation = self.generation;
        Ok(stmt)
    }

    /// Send every stream slot as long data. Returns whether any was sent.
    fn send_long_data(&mut self, stmt: &PreparedStatement, bindings: &mut Bindings) -> Result<bool> {
        let mut streamed = false;
        for (index, slot) in bindings.slots_mut().enumerate() {
            if !slot.is_stream() {
                continue;
            }
            streamed = true;
            let param = u16::try_from(index)
                .map_err(|_| Error::protocol("too many parameters for long data"))?;
            let mut sent = false;
            slot.drain_stream(|chunk| {
                sent = true;
                self.send_long_data_chunk(stmt.statement_id, param, chunk)
            })?;
            if !sent {
                self.send_long_data_chunk(stmt.statement_id, param, &[])?;
            }
        }
        Ok(streamed)
    }

    fn send_long_data_chunk(&mut self, statement_id: u32, param: u16, chunk: &[u8]) -> Result<()> {
        self.send.start_packet()?;
        prepared::write_long_data_header(&mut self.send, statement_id, param)?;
        self.send.write_bytes(chunk)?;
        tracing::trace!(statement_id, param, len = chunk.len(), "sending long data");
        self.send_command()
    }

    /// Rewrite the statement id of the execute packet in the send buffer.
    fn patch_statement_id(&mut self, statement_id: u32) -> Result<()> {
        for (i, b) in statement_id.to_le_bytes().into_iter().enumerate() {
            self.send.set_byte_at(PacketHeader::SIZE + 1 + i, b)?;
        }
        Ok(())
    }
}

/// Frame and write `buf`, returning the next sequence id.
fn write_frame<W: Write>(transport: &mut W, buf: &mut PacketBuffer, sequence_id: u8) -> Result<u8> {
    let next = buf
        .write_packets(transport, sequence_id)
        .map_err(|e| link_error("Failed to write packet", e))?;
    transport
        .flush()
        .map_err(|e| link_error("Failed to flush stream", Error::Io(e)))?;
    Ok(next)
}

fn decode_text_row(columns: &[ColumnDef], buf: &mut PacketBuffer) -> Result<Vec<Value>> {
    // In text protocol, each value is a length-encoded string; 0xFB is NULL
    columns
        .iter()
        .map(|col| {
            Ok(match buf.read_field_bytes()? {
                Some(data) => decode_text_value(col, data),
                None => Value::Null,
            })
        })
        .collect()
}

fn warning_from_row(row: &Row) -> Warning {
    let text = |i: usize| {
        row.get(i)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Warning {
        level: text(0),
        code: row
            .get(1)
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(0),
        message: text(2),
    }
}

fn into_update(result: ExecuteResult) -> Result<UpdateResult> {
    match result {
        ExecuteResult::Update(update) => Ok(update),
        ExecuteResult::Rows(_) => Err(usage_error(
            UsageErrorKind::InvalidArgument,
            "a batched statement returned a result set",
        )),
    }
}

// Helper functions for creating errors

/// Reclassify an I/O error as a lost link.
fn link_error(context: &str, err: Error) -> Error {
    match err {
        Error::Io(e) => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: format!("{}: {}", context, e),
            server_code: None,
            source: Some(Box::new(e)),
        }),
        other => other,
    }
}

fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: msg.into(),
        server_code: None,
        source: None,
    })
}

fn public_key_not_allowed() -> Error {
    auth_error("Public Key Retrieval is not allowed")
}

fn usage_error(kind: UsageErrorKind, msg: impl Into<String>) -> Error {
    Error::Usage(UsageError {
        kind,
        message: msg.into(),
    })
}

/// Error packet received during login.
fn login_error(err: &ErrPacket) -> Error {
    let denied = matches!(err.error_code, 1044 | 1045 | 1251 | 1698 | 1820 | 1862)
        || (err.error_code == 0 && err.error_message.starts_with("Access denied"));
    Error::Connection(ConnectionError {
        kind: if denied {
            ConnectionErrorKind::Authentication
        } else {
            ConnectionErrorKind::Connect
        },
        message: err.error_message.clone(),
        server_code: (err.error_code != 0).then_some(err.error_code),
        source: None,
    })
}

/// SQLSTATE and classification of well-known server error codes.
const SERVER_CODES: &[(u16, &str, QueryErrorKind)] = &[
    (1022, "23000", QueryErrorKind::Constraint),
    (1037, "HY001", QueryErrorKind::Database),
    (1040, "08004", QueryErrorKind::Database),
    (1044, "42000", QueryErrorKind::Permission),
    (1045, "28000", QueryErrorKind::Permission),
    (1046, "3D000", QueryErrorKind::NotFound),
    (1048, "23000", QueryErrorKind::Constraint),
    (1049, "42000", QueryErrorKind::NotFound),
    (1050, "42S01", QueryErrorKind::Database),
    (1051, "42S02", QueryErrorKind::NotFound),
    (1052, "23000", QueryErrorKind::Syntax),
    (1054, "42S22", QueryErrorKind::NotFound),
    (1062, "23000", QueryErrorKind::Constraint),
    (1064, "42000", QueryErrorKind::Syntax),
    (1065, "42000", QueryErrorKind::Syntax),
    (1105, "HY000", QueryErrorKind::Database),
    (1136, "21S01", QueryErrorKind::Syntax),
    (1142, "42000", QueryErrorKind::Permission),
    (1143, "42000", QueryErrorKind::Permission),
    (1146, "42S02", QueryErrorKind::NotFound),
    (1149, "42000", QueryErrorKind::Syntax),
    (1205, "HY000", QueryErrorKind::Timeout),
    (1213, "40001", QueryErrorKind::Deadlock),
    (1216, "23000", QueryErrorKind::Constraint),
    (1217, "23000", QueryErrorKind::Constraint),
    (1264, "22003", QueryErrorKind::DataTruncation),
    (1265, "01000", QueryErrorKind::DataTruncation),
    (1317, "70100", QueryErrorKind::Timeout),
    (1364, "HY000", QueryErrorKind::Constraint),
    (1406, "22001", QueryErrorKind::DataTruncation),
    (1451, "23000", QueryErrorKind::Constraint),
    (1452, "23000", QueryErrorKind::Constraint),
    (1586, "23000", QueryErrorKind::Constraint),
    (3024, "HY000", QueryErrorKind::Timeout),
];

/// SQLSTATE (from the table) and kind for a server error code. Unknown
/// codes are classified by the SQLSTATE class the server sent.
fn classify_server_code(code: u16, sqlstate: Option<&str>) -> (Option<&'static str>, QueryErrorKind) {
    if let Some((_, state, kind)) = SERVER_CODES.iter().find(|(c, _, _)| *c == code) {
        return (Some(*state), *kind);
    }
    let kind = match sqlstate.and_then(|s| s.get(..2)) {
        Some("23") => QueryErrorKind::Constraint,
        Some("42") => QueryErrorKind::Syntax,
        Some("40") => QueryErrorKind::Deadlock,
        Some("22") => QueryErrorKind::DataTruncation,
        Some("28") => QueryErrorKind::Permission,
        Some("3D") => QueryErrorKind::NotFound,
        Some("70") => QueryErrorKind::Timeout,
        _ => QueryErrorKind::Database,
    };
    (None, kind)
}

fn query_error(err: &ErrPacket) -> Error {
    let (state, kind) = classify_server_code(err.error_code, err.sql_state.as_deref());
    Error::Query(QueryError {
        kind,
        code: err.error_code,
        sqlstate: err
            .sql_state
            .clone()
            .or_else(|| state.map(str::to_string)),
        message: err.error_message.clone(),
        sql: None,
        source: None,
    })
}

fn attach_sql(err: Error, sql: &str) -> Error {
    match err {
        Error::Query(mut q) if q.sql.is_none() => {
            q.sql = Some(sql.to_string());
            Error::Query(q)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err_packet(code: u16, state: Option<&str>, message: &str) -> ErrPacket {
        ErrPacket {
            error_code: code,
            sql_state: state.map(str::to_string),
            error_message: message.to_string(),
        }
    }

    #[test]
    fn test_login_error_classification() {
        let err = login_error(&err_packet(1045, Some("28000"), "Access denied for user 'x'"));
        assert_eq!(err.class(), ErrorClass::AuthenticationFailure);
        assert_eq!(err.server_code(), Some(1045));

        // Protocol 9 errors carry no code
        let err = login_error(&err_packet(0, None, "Access denied for user 'x'"));
        assert_eq!(err.class(), ErrorClass::AuthenticationFailure);
        assert_eq!(err.server_code(), None);

        let err = login_error(&err_packet(1040, Some("08004"), "Too many connections"));
        assert_eq!(err.class(), ErrorClass::TransportFailure);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_query_error_duplicate_key() {
        let err = query_error(&err_packet(1062, Some("23000"), "Duplicate entry"));
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Constraint);
                assert!(q.is_unique_violation());
            }
            other => panic!("Expected query error, got {other:?}"),
        }
    }

    #[test]
    fn test_query_error_fills_missing_sqlstate() {
        let err = query_error(&err_packet(1054, None, "Unknown column 'x'"));
        assert_eq!(err.sqlstate(), Some("42S22"));
        assert_eq!(err.class(), ErrorClass::ServerError);

        let err = query_error(&err_packet(4025, Some("23000"), "CONSTRAINT failed"));
        match err {
            Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::Constraint),
            other => panic!("Expected query error, got {other:?}"),
        }

        let err = query_error(&err_packet(9999, None, "mystery"));
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Database);
                assert_eq!(q.sqlstate, None);
            }
            other => panic!("Expected query error, got {other:?}"),
        }
    }

    #[test]
    fn test_attach_sql_only_to_server_errors() {
        let err = attach_sql(query_error(&err_packet(1064, None, "syntax")), "SELEC 1");
        assert_eq!(err.sql(), Some("SELEC 1"));
        let err = attach_sql(Error::closed(), "SELECT 1");
        assert_eq!(err.sql(), None);
    }

    #[test]
    fn test_link_error_is_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = link_error("Failed to read packet header", Error::Io(io));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Failed to read packet header"));
        assert!(!link_error("x", Error::protocol("bad")).is_retryable());
    }

    #[test]
    fn test_warning_from_row() {
        let row = Row::new(
            vec!["Level".into(), "Code".into(), "Message".into()],
            vec![
                Value::Text("Warning".into()),
                Value::BigInt(1265),
                Value::Text("Data truncated for column 'a' at row 1".into()),
            ],
        );
        let warning = warning_from_row(&row);
        assert_eq!(warning.level, "Warning");
        assert_eq!(warning.code, 1265);
        assert!(warning.message.starts_with("Data truncated"));
    }
}
