//! Session engine tests against a scripted in-memory server.
//!
//! Each connection attempt pops one script: the exact bytes the "server"
//! sends. Everything the client writes is captured for inspection. Running
//! off the end of a script reads as end of stream.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wirebase_core::error::{
    ConnectionError, ConnectionErrorKind, QueryErrorKind, UsageErrorKind,
};
use wirebase_mysql::protocol::capabilities;
use wirebase_mysql::{
    BindSlot, BindValue, Bindings, ConnectionState, Connector, Error, ErrorClass, MySqlConfig,
    MySqlConnection, Transport, Value,
};

// === Server-side packet builders ===

const LONGLONG: u8 = 0x08;
const LONG: u8 = 0x03;
const VAR_STRING: u8 = 0xFD;
const STATUS_AUTOCOMMIT: u16 = 0x0002;
const MORE_RESULTS: u16 = 0x0008;

fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = vec![len as u8, (len >> 8) as u8, (len >> 16) as u8, seq];
    out.extend_from_slice(payload);
    out
}

fn lenenc(out: &mut Vec<u8>, bytes: &[u8]) {
    assert!(bytes.len() < 251);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

fn server_caps() -> u32 {
    capabilities::CLIENT_LONG_PASSWORD
        | capabilities::CLIENT_LONG_FLAG
        | capabilities::CLIENT_CONNECT_WITH_DB
        | capabilities::CLIENT_PROTOCOL_41
        | capabilities::CLIENT_TRANSACTIONS
        | capabilities::CLIENT_SECURE_CONNECTION
        | capabilities::CLIENT_MULTI_RESULTS
        | capabilities::CLIENT_PLUGIN_AUTH
}

fn greeting() -> Vec<u8> {
    let caps = server_caps();
    let mut p = vec![10];
    p.extend_from_slice(b"8.0.36\0");
    p.extend_from_slice(&42u32.to_le_bytes());
    p.extend_from_slice(b"abcdefgh\0");
    p.extend_from_slice(&(caps as u16).to_le_bytes());
    p.push(45);
    p.extend_from_slice(&STATUS_AUTOCOMMIT.to_le_bytes());
    p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    p.push(21);
    p.extend_from_slice(&[0; 10]);
    p.extend_from_slice(b"ijklmnopqrst\0");
    p.extend_from_slice(b"mysql_native_password\0");
    packet(0, &p)
}

fn ok(seq: u8, affected: u8, status: u16, warnings: u16) -> Vec<u8> {
    let mut p = vec![0x00, affected, 0];
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&warnings.to_le_bytes());
    packet(seq, &p)
}

fn err(seq: u8, code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(state.as_bytes());
    p.extend_from_slice(message.as_bytes());
    packet(seq, &p)
}

fn eof(seq: u8, warnings: u16) -> Vec<u8> {
    let mut p = vec![0xFE];
    p.extend_from_slice(&warnings.to_le_bytes());
    p.extend_from_slice(&STATUS_AUTOCOMMIT.to_le_bytes());
    packet(seq, &p)
}

fn column(seq: u8, name: &str, field_type: u8) -> Vec<u8> {
    let mut p = Vec::new();
    for part in ["def", "db", "t", "t", name, name] {
        lenenc(&mut p, part.as_bytes());
    }
    p.push(0x0C);
    p.extend_from_slice(&45u16.to_le_bytes());
    p.extend_from_slice(&255u32.to_le_bytes());
    p.push(field_type);
    p.extend_from_slice(&0u16.to_le_bytes());
    p.push(0);
    p.extend_from_slice(&[0, 0]);
    packet(seq, &p)
}

fn text_row(seq: u8, fields: &[&str]) -> Vec<u8> {
    let mut p = Vec::new();
    for field in fields {
        lenenc(&mut p, field.as_bytes());
    }
    packet(seq, &p)
}

/// Greeting followed by the OK that ends authentication.
fn handshake() -> Vec<u8> {
    [greeting(), ok(2, 0, STATUS_AUTOCOMMIT, 0)].concat()
}

fn query_packet(sql: &str) -> Vec<u8> {
    let mut p = vec![0x03];
    p.extend_from_slice(sql.as_bytes());
    packet(0, &p)
}

/// A reader that hands out `data` once, then fails.
struct BrokenReader {
    data: Option<&'static [u8]>,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.take() {
            Some(data) => {
                buf[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            None => Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied")),
        }
    }
}

// === Scripted transport ===

struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    read_timeouts: Arc<Mutex<Vec<Option<Duration>>>>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeouts.lock().unwrap().push(timeout);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<Arc<Mutex<Vec<u8>>>>>>,
    read_timeouts: Arc<Mutex<Vec<Option<Duration>>>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Vec<u8>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            ..Self::default()
        }
    }

    /// Bytes the client wrote on the `n`th connection.
    fn written(&self, n: usize) -> Vec<u8> {
        self.written.lock().unwrap()[n].lock().unwrap().clone()
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Read timeouts the session set, across all connections.
    fn read_timeouts(&self) -> Vec<Option<Duration>> {
        self.read_timeouts.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _config: &MySqlConfig) -> wirebase_mysql::Result<Box<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let Some(script) = self.scripts.lock().unwrap().pop_front() else {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Refused,
                message: "Connection refused".to_string(),
                server_code: None,
                source: None,
            }));
        };
        let written = Arc::new(Mutex::new(Vec::new()));
        self.written.lock().unwrap().push(Arc::clone(&written));
        Ok(Box::new(ScriptedStream {
            input: Cursor::new(script),
            written,
            read_timeouts: Arc::clone(&self.read_timeouts),
        }))
    }
}

fn config() -> MySqlConfig {
    MySqlConfig::new().user("app").password("secret")
}

fn connect(scripts: Vec<Vec<u8>>) -> (MySqlConnection, ScriptedConnector) {
    let connector = ScriptedConnector::new(scripts);
    let conn = MySqlConnection::connect_with(config(), connector.clone()).unwrap();
    (conn, connector)
}

// === Tests ===

#[test]
fn handshake_reads_greeting() {
    let (conn, connector) = connect(vec![handshake()]);
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.connection_id(), 42);
    let version = conn.server_version().unwrap();
    assert_eq!((version.major, version.minor, version.patch), (8, 0, 36));
    assert_eq!(conn.collation(), 45);

    let server = conn.server_capabilities().unwrap();
    assert_eq!(server.auth_data, b"abcdefghijklmnopqrst");
    assert_eq!(server.auth_plugin.as_deref(), Some("mysql_native_password"));

    // Login packet: sequence 1, user name after the fixed 32-byte block
    let login = connector.written(0);
    assert_eq!(login[3], 1);
    assert_eq!(&login[4 + 32..4 + 32 + 4], b"app\0");
    let scramble = wirebase_mysql::auth::mysql_native_password("secret", b"abcdefghijklmnopqrst");
    assert!(
        login
            .windows(scramble.len())
            .any(|w| w == scramble.as_slice())
    );
}

#[test]
fn access_denied_is_authentication_failure() {
    let connector = ScriptedConnector::new(vec![
        [
            greeting(),
            err(2, 1045, "28000", "Access denied for user 'app'@'localhost' (using password: YES)"),
        ]
        .concat(),
    ]);
    let err = MySqlConnection::connect_with(config(), connector).unwrap_err();
    assert_eq!(err.class(), ErrorClass::AuthenticationFailure);
    assert_eq!(err.server_code(), Some(1045));
    assert!(err.to_string().contains("Access denied"));
}

#[test]
fn auth_switch_rescrambles_with_new_seed() {
    let seed = b"ABCDEFGHIJKLMNOPQRST";
    let mut switch = vec![0xFE];
    switch.extend_from_slice(b"mysql_native_password\0");
    switch.extend_from_slice(seed);
    switch.push(0);

    let (conn, connector) = connect(vec![
        [greeting(), packet(2, &switch), ok(4, 0, STATUS_AUTOCOMMIT, 0)].concat(),
    ]);
    assert!(conn.is_ready());

    let expected = packet(
        3,
        &wirebase_mysql::auth::mysql_native_password("secret", seed),
    );
    assert!(connector.written(0).ends_with(&expected));
}

#[test]
fn sha256_without_key_retrieval_is_refused() {
    let mut switch = vec![0xFE];
    switch.extend_from_slice(b"sha256_password\0");
    switch.extend_from_slice(b"ABCDEFGHIJKLMNOPQRST\0");

    let connector = ScriptedConnector::new(vec![[greeting(), packet(2, &switch)].concat()]);
    let err = MySqlConnection::connect_with(config(), connector).unwrap_err();
    assert_eq!(err.class(), ErrorClass::AuthenticationFailure);
    assert!(err.to_string().contains("Public Key Retrieval is not allowed"));
}

#[test]
fn update_returns_ok_contents() {
    let (mut conn, connector) = connect(vec![[handshake(), ok(1, 3, STATUS_AUTOCOMMIT, 0)].concat()]);

    let result = conn
        .execute("UPDATE t SET name = ? WHERE id < ?", &[Value::Text("it's".into()), Value::Int(4)], None)
        .unwrap();
    assert!(!result.is_rows());
    assert_eq!(result.affected_rows(), 3);
    assert_eq!(conn.affected_rows(), 3);
    assert!(conn.is_ready());

    let sent = query_packet(r"UPDATE t SET name = 'it\'s' WHERE id < 4");
    assert!(connector.written(0).ends_with(&sent));
}

#[test]
fn result_set_is_decoded() {
    let script = [
        handshake(),
        packet(1, &[2]),
        column(2, "id", LONGLONG),
        column(3, "name", VAR_STRING),
        eof(4, 0),
        text_row(5, &["1", "alice"]),
        text_row(6, &["2", "bob"]),
        eof(7, 0),
    ]
    .concat();
    let (mut conn, _) = connect(vec![script]);

    let rows = conn
        .execute("SELECT id, name FROM t", &[], None)
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.columns()[1].name, "name");
    assert_eq!(rows.rows()[0].get(0), Some(&Value::BigInt(1)));
    assert_eq!(rows.rows()[1].get_by_name("name"), Some(&Value::Text("bob".into())));
    assert!(!rows.is_truncated());
    assert!(conn.is_ready());
}

#[test]
fn max_rows_drains_the_rest() {
    let script = [
        handshake(),
        packet(1, &[1]),
        column(2, "id", LONGLONG),
        eof(3, 0),
        text_row(4, &["1"]),
        text_row(5, &["2"]),
        text_row(6, &["3"]),
        eof(7, 0),
        ok(1, 0, STATUS_AUTOCOMMIT, 0),
    ]
    .concat();
    let (mut conn, _) = connect(vec![script]);

    let rows = conn
        .execute("SELECT id FROM t", &[], Some(1))
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.total_rows(), 3);
    assert!(rows.is_truncated());

    // The stream is positioned at the next response
    conn.execute("DO 1", &[], None).unwrap();
}

#[test]
fn extra_results_are_discarded() {
    let script = [
        handshake(),
        ok(1, 1, STATUS_AUTOCOMMIT | MORE_RESULTS, 0),
        ok(2, 5, STATUS_AUTOCOMMIT, 0),
        ok(1, 7, STATUS_AUTOCOMMIT, 0),
    ]
    .concat();
    let (mut conn, _) = connect(vec![script]);

    let first = conn.execute("CALL p()", &[], None).unwrap();
    assert_eq!(first.affected_rows(), 1);
    let next = conn.execute("DELETE FROM t", &[], None).unwrap();
    assert_eq!(next.affected_rows(), 7);
}

#[test]
fn server_error_is_classified_and_keeps_session() {
    let script = [
        handshake(),
        err(1, 1146, "42S02", "Table 'db.nope' doesn't exist"),
        ok(1, 0, STATUS_AUTOCOMMIT, 0),
    ]
    .concat();
    let (mut conn, _) = connect(vec![script]);

    let err = conn.execute("SELECT * FROM nope", &[], None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ServerError);
    assert_eq!(err.sqlstate(), Some("42S02"));
    assert_eq!(err.sql(), Some("SELECT * FROM nope"));
    match &err {
        Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::NotFound),
        other => panic!("expected query error, got {other}"),
    }
    assert!(conn.is_ready());
    conn.execute("DO 1", &[], None).unwrap();
}

#[test]
fn out_of_order_packet_closes_session() {
    let (mut conn, _) = connect(vec![[handshake(), ok(5, 0, STATUS_AUTOCOMMIT, 0)].concat()]);

    let err = conn.execute("DO 1", &[], None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ProtocolViolation);
    assert!(err.to_string().contains("expected sequence id 1, got 5"));
    assert_eq!(conn.state(), ConnectionState::Closed);

    let err = conn.execute("DO 1", &[], None).unwrap_err();
    match err {
        Error::Usage(u) => assert_eq!(u.kind, UsageErrorKind::Closed),
        other => panic!("expected usage error, got {other}"),
    }
}

#[test]
fn lost_link_without_reconnect_closes_session() {
    let (mut conn, connector) = connect(vec![handshake()]);

    let err = conn.execute("DO 1", &[], None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransportFailure);
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(connector.connects(), 1);
}

#[test]
fn reconnect_replays_command() {
    let connector = ScriptedConnector::new(vec![
        handshake(),
        [handshake(), ok(1, 1, STATUS_AUTOCOMMIT, 0)].concat(),
    ]);
    let config = config()
        .auto_reconnect(true)
        .initial_reconnect_delay(Duration::ZERO);
    let mut conn = MySqlConnection::connect_with(config, connector.clone()).unwrap();

    let result = conn.execute("UPDATE t SET a = 1", &[], None).unwrap();
    assert_eq!(result.affected_rows(), 1);
    assert!(conn.is_ready());
    assert_eq!(connector.connects(), 2);
    assert!(connector.written(1).ends_with(&query_packet("UPDATE t SET a = 1")));
}

#[test]
fn reconnect_gives_up_after_max_attempts() {
    let connector = ScriptedConnector::new(vec![handshake()]);
    let config = config()
        .auto_reconnect(true)
        .max_reconnects(3)
        .initial_reconnect_delay(Duration::ZERO);
    let mut conn = MySqlConnection::connect_with(config, connector.clone()).unwrap();

    let err = conn.execute("DO 1", &[], None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransportFailure);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("3 reconnection attempts"));
    match &err {
        Error::Connection(c) => assert_eq!(c.kind, ConnectionErrorKind::ReconnectExhausted),
        other => panic!("expected connection error, got {other}"),
    }
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(connector.connects(), 4);
}

#[test]
fn reconnect_stops_on_authentication_failure() {
    let connector = ScriptedConnector::new(vec![
        handshake(),
        [greeting(), err(2, 1045, "28000", "Access denied")].concat(),
        handshake(),
    ]);
    let config = config()
        .auto_reconnect(true)
        .max_reconnects(3)
        .initial_reconnect_delay(Duration::ZERO);
    let mut conn = MySqlConnection::connect_with(config, connector.clone()).unwrap();

    let err = conn.execute("DO 1", &[], None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::AuthenticationFailure);
    assert_eq!(connector.connects(), 2);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[test]
fn local_infile_request_is_refused() {
    let mut request = vec![0xFB];
    request.extend_from_slice(b"/etc/passwd");
    let script = [
        handshake(),
        packet(1, &request),
        ok(3, 0, STATUS_AUTOCOMMIT, 0),
        ok(1, 0, STATUS_AUTOCOMMIT, 0),
    ]
    .concat();
    let (mut conn, connector) = connect(vec![script]);

    let err = conn
        .execute("LOAD DATA LOCAL INFILE '/etc/passwd' INTO TABLE t", &[], None)
        .unwrap_err();
    match &err {
        Error::Usage(u) => assert_eq!(u.kind, UsageErrorKind::InvalidArgument),
        other => panic!("expected usage error, got {other}"),
    }
    assert!(err.to_string().contains("LOCAL INFILE"));
    // An empty packet tells the server no data follows
    assert!(connector.written(0).ends_with(&packet(2, &[])));

    assert!(conn.is_ready());
    conn.execute("DO 1", &[], None).unwrap();
}

#[test]
fn batch_insert_is_folded_into_one_statement() {
    let (mut conn, connector) = connect(vec![[handshake(), ok(1, 3, STATUS_AUTOCOMMIT, 0)].concat()]);

    let mut sets: Vec<Bindings> = (1..=3)
        .map(|i| Bindings::from_values(&[Value::Int(i)]))
        .collect();
    let results = conn
        .execute_batch("INSERT INTO t (a) VALUES (?)", &mut sets)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].affected_rows, 3);
    assert!(
        connector
            .written(0)
            .ends_with(&query_packet("INSERT INTO t (a) VALUES (1),(2),(3)"))
    );
}

#[test]
fn unset_parameter_is_reported_before_sending() {
    let (mut conn, connector) = connect(vec![handshake()]);
    let before = connector.written(0).len();

    let mut bindings = Bindings::new(2);
    bindings.set(0, 1_i64).unwrap();
    let err = conn
        .execute_bound("SELECT ?, ?", &mut bindings, None)
        .unwrap_err();
    match err {
        Error::Usage(u) => assert_eq!(u.kind, UsageErrorKind::ParameterNotSet(2)),
        other => panic!("expected usage error, got {other}"),
    }
    assert_eq!(connector.written(0).len(), before);
    assert!(conn.is_ready());
}

#[test]
fn prepared_statement_round_trip() {
    let mut prepare_ok = vec![0x00];
    prepare_ok.extend_from_slice(&1u32.to_le_bytes());
    prepare_ok.extend_from_slice(&1u16.to_le_bytes());
    prepare_ok.extend_from_slice(&1u16.to_le_bytes());
    prepare_ok.extend_from_slice(&[0, 0, 0]);

    let mut binary_row = vec![0x00, 0x00];
    binary_row.extend_from_slice(&7i64.to_le_bytes());

    let script = [
        handshake(),
        packet(1, &prepare_ok),
        column(2, "?", LONGLONG),
        eof(3, 0),
        column(4, "v", LONGLONG),
        eof(5, 0),
        packet(1, &[1]),
        column(2, "v", LONGLONG),
        eof(3, 0),
        packet(4, &binary_row),
        eof(5, 0),
    ]
    .concat();
    let (mut conn, _) = connect(vec![script]);

    let mut stmt = conn.prepare("SELECT ? + 0").unwrap();
    assert_eq!(stmt.param_count(), 1);
    assert_eq!(stmt.column_count(), 1);

    let mut bindings = stmt.bindings();
    bindings.set(0, 7_i64).unwrap();
    let rows = conn
        .execute_prepared(&mut stmt, &mut bindings, None)
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.rows()[0].get(0), Some(&Value::BigInt(7)));

    conn.close_prepared(stmt).unwrap();
    assert!(conn.is_ready());
}

#[test]
fn warnings_are_fetched_on_demand() {
    let script = [
        handshake(),
        ok(1, 1, STATUS_AUTOCOMMIT, 1),
        packet(1, &[3]),
        column(2, "Level", VAR_STRING),
        column(3, "Code", LONG),
        column(4, "Message", VAR_STRING),
        eof(5, 0),
        text_row(6, &["Warning", "1265", "Data truncated for column 'a' at row 1"]),
        eof(7, 0),
    ]
    .concat();
    let (mut conn, _) = connect(vec![script]);

    conn.execute("INSERT INTO t (a) VALUES ('toolong')", &[], None)
        .unwrap();
    assert_eq!(conn.warning_count(), 1);

    let warnings = conn.fetch_warnings().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, 1265);
    assert_eq!(warnings[0].level, "Warning");
    assert_eq!(conn.warning_count(), 0);
}

#[test]
fn close_sends_quit_and_is_idempotent() {
    let (mut conn, connector) = connect(vec![handshake()]);
    conn.close().unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(connector.written(0).ends_with(&packet(0, &[0x01])));
    conn.close().unwrap();
    assert!(conn.ping().is_err());
}

#[test]
fn read_timeout_is_cleared_after_login() {
    let (conn, connector) = connect(vec![handshake()]);
    assert!(conn.is_ready());
    assert_eq!(connector.read_timeouts(), vec![None]);
}

#[test]
fn protocol_9_greeting_uses_legacy_login() {
    let mut greeting = vec![9];
    greeting.extend_from_slice(b"3.22.32\0");
    greeting.extend_from_slice(&7u32.to_le_bytes());
    greeting.extend_from_slice(b"abcdefgh\0");
    let connector = ScriptedConnector::new(vec![
        [packet(0, &greeting), ok(2, 0, STATUS_AUTOCOMMIT, 0)].concat(),
    ]);
    let conn = MySqlConnection::connect_with(config(), connector.clone()).unwrap();
    assert!(conn.is_ready());
    assert_eq!(conn.connection_id(), 7);
    assert_eq!(conn.collation(), 8);

    // Capabilities (none), 3-byte max packet, user, NUL-terminated scramble
    let mut login = vec![0x00, 0x00, 0xFF, 0xFF, 0xFF];
    login.extend_from_slice(b"app\0");
    login.extend_from_slice(&wirebase_mysql::auth::scramble_legacy("secret", b"abcdefgh"));
    login.push(0);
    assert_eq!(connector.written(0), packet(1, &login));
}

#[test]
fn protocol_10_without_secure_connection_uses_old_password() {
    let caps = (capabilities::CLIENT_LONG_PASSWORD
        | capabilities::CLIENT_LONG_FLAG
        | capabilities::CLIENT_CONNECT_WITH_DB
        | capabilities::CLIENT_TRANSACTIONS) as u16;
    let mut greeting = vec![10];
    greeting.extend_from_slice(b"4.0.30\0");
    greeting.extend_from_slice(&11u32.to_le_bytes());
    greeting.extend_from_slice(b"abcdefgh\0");
    greeting.extend_from_slice(&caps.to_le_bytes());
    greeting.push(8);
    greeting.extend_from_slice(&STATUS_AUTOCOMMIT.to_le_bytes());
    greeting.extend_from_slice(&[0; 13]);

    let connector = ScriptedConnector::new(vec![
        [packet(0, &greeting), ok(2, 0, STATUS_AUTOCOMMIT, 0)].concat(),
    ]);
    let conn =
        MySqlConnection::connect_with(config().database("shop"), connector.clone()).unwrap();
    assert!(conn.is_ready());
    assert_eq!(conn.collation(), 8);

    let mut login = caps.to_le_bytes().to_vec();
    login.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
    login.extend_from_slice(b"app\0");
    login.extend_from_slice(&wirebase_mysql::auth::scramble_323("secret", b"abcdefgh"));
    login.push(0);
    login.extend_from_slice(b"shop\0");
    assert_eq!(connector.written(0), packet(1, &login));
}

#[test]
fn login_collation_matches_session_codec() {
    // No native codec for cp1251: the session asks for utf8mb4 instead
    let connector = ScriptedConnector::new(vec![handshake()]);
    let conn = MySqlConnection::connect_with(
        config().character_encoding("windows-1251"),
        connector.clone(),
    )
    .unwrap();
    assert_eq!(conn.collation(), 45);
    assert_eq!(connector.written(0)[4 + 8], 45);

    let connector = ScriptedConnector::new(vec![
        [handshake(), ok(1, 1, STATUS_AUTOCOMMIT, 0)].concat(),
    ]);
    let mut conn = MySqlConnection::connect_with(
        config().character_encoding("ISO-8859-1"),
        connector.clone(),
    )
    .unwrap();
    assert_eq!(conn.collation(), 8);
    assert_eq!(connector.written(0)[4 + 8], 8);

    conn.execute("UPDATE t SET a = ?", &[Value::Text("café".into())], None)
        .unwrap();
    let mut sent = vec![0x03];
    sent.extend_from_slice(b"UPDATE t SET a = 'caf\xE9'");
    assert!(connector.written(0).ends_with(&packet(0, &sent)));
}

#[test]
fn failing_stream_parameter_keeps_session() {
    let (mut conn, connector) = connect(vec![[handshake(), ok(1, 0, STATUS_AUTOCOMMIT, 0)].concat()]);
    let before = connector.written(0).len();

    let mut bindings = Bindings::new(1);
    bindings
        .set_slot(0, BindSlot::new(BindValue::stream(BrokenReader { data: None })))
        .unwrap();
    let err = conn
        .execute_bound("INSERT INTO t (a) VALUES (?)", &mut bindings, None)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::UsageError);
    assert!(!err.is_retryable());
    match &err {
        Error::Usage(u) => assert_eq!(u.kind, UsageErrorKind::StreamRead),
        other => panic!("expected usage error, got {other}"),
    }
    assert_eq!(connector.written(0).len(), before);
    assert!(conn.is_ready());
    conn.execute("DO 1", &[], None).unwrap();
}

#[test]
fn failing_long_data_stream_resets_statement() {
    let mut prepare_ok = vec![0x00];
    prepare_ok.extend_from_slice(&1u32.to_le_bytes());
    prepare_ok.extend_from_slice(&0u16.to_le_bytes());
    prepare_ok.extend_from_slice(&1u16.to_le_bytes());
    prepare_ok.extend_from_slice(&[0, 0, 0]);

    let script = [
        handshake(),
        packet(1, &prepare_ok),
        column(2, "?", VAR_STRING),
        eof(3, 0),
        ok(1, 0, STATUS_AUTOCOMMIT, 0),
        ok(1, 0, STATUS_AUTOCOMMIT, 0),
    ]
    .concat();
    let connector = ScriptedConnector::new(vec![script]);
    let config = config()
        .auto_reconnect(true)
        .initial_reconnect_delay(Duration::ZERO);
    let mut conn = MySqlConnection::connect_with(config, connector.clone()).unwrap();

    let mut stmt = conn.prepare("INSERT INTO t (doc) VALUES (?)").unwrap();
    let reader = BrokenReader {
        data: Some(&b"abc"[..]),
    };
    let mut bindings = stmt.bindings();
    bindings
        .set_slot(0, BindSlot::new(BindValue::stream(reader)))
        .unwrap();
    let err = conn
        .execute_prepared(&mut stmt, &mut bindings, None)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::UsageError);
    match &err {
        Error::Usage(u) => assert_eq!(u.kind, UsageErrorKind::StreamRead),
        other => panic!("expected usage error, got {other}"),
    }

    // One chunk went out before the failure, then COM_STMT_RESET
    let long_data = packet(0, &[0x18, 1, 0, 0, 0, 0, 0, b'a', b'b', b'c']);
    let reset = packet(0, &[0x1A, 1, 0, 0, 0]);
    assert!(connector.written(0).ends_with(&[long_data, reset].concat()));

    assert!(conn.is_ready());
    assert_eq!(connector.connects(), 1);
    conn.execute("DO 1", &[], None).unwrap();
}

#[test]
fn oversized_server_packet_closes_session() {
    let mut field = vec![0xFC];
    field.extend_from_slice(&2000u16.to_le_bytes());
    field.extend_from_slice(&[b'x'; 2000]);
    let script = [
        handshake(),
        packet(1, &[1]),
        column(2, "doc", VAR_STRING),
        eof(3, 0),
        packet(4, &field),
        eof(5, 0),
    ]
    .concat();
    let connector = ScriptedConnector::new(vec![script]);
    let mut conn =
        MySqlConnection::connect_with(config().max_packet_size(1024), connector).unwrap();

    let err = conn.execute("SELECT doc FROM t", &[], None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ProtocolViolation);
    assert!(err.to_string().contains("exceeds max_packet_size"));
    assert_eq!(conn.state(), ConnectionState::Closed);
}
