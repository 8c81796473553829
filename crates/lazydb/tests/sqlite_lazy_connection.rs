use std::rc::Rc;
use std::time::Duration;

use lazydb::{
    Attribute, AttributeValue, ConnectionConfig, Error, FetchMode, LazyConnection,
    NativeStatement, ParamType, Params, QueryKind, QueryState, Value, bound_var,
};
use lazydb_sqlite::SqliteDriver;

fn memory() -> LazyConnection<SqliteDriver> {
    ConnectionConfig::new("sqlite", "localhost", "")
        .charset("utf8")
        .connect(SqliteDriver::new())
}

fn with_users(conn: &mut LazyConnection<SqliteDriver>) {
    conn.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)")
        .expect("create users table");
    conn.exec("INSERT INTO users (name) VALUES ('alice'), ('bob')")
        .expect("seed users");
}

#[test]
fn sqlite_connects_on_first_query_and_records_it() {
    let mut conn = memory();
    assert!(!conn.is_connected());

    with_users(&mut conn);
    assert!(conn.is_connected());

    let stats = conn.stats();
    assert_eq!(stats.direct_count(), 2);
    assert_eq!(stats.prepared_count(), 0);
    assert_eq!(
        stats.last_query().map(|r| r.query.clone()).as_deref(),
        Some("INSERT INTO users (name) VALUES ('alice'), ('bob')")
    );
    assert_eq!(
        conn.get_attribute(Attribute::DefaultFetchMode).unwrap(),
        Some(AttributeValue::FetchMode(FetchMode::Assoc))
    );
}

#[test]
fn sqlite_prepared_executions_share_the_recorder() {
    let mut conn = memory();
    with_users(&mut conn);

    let mut insert = conn
        .prepare("INSERT INTO users (name) VALUES (:name)")
        .unwrap()
        .expect("valid statement prepares");
    for name in ["carol", "dave"] {
        insert.execute(Some(&Params::named([("name", name)]))).unwrap();
        assert_eq!(insert.row_count(), 1);
    }

    let stats = conn.stats();
    assert_eq!(stats.direct_count(), 2);
    assert_eq!(stats.prepared_count(), 2);
    assert_eq!(stats.total_count(), 4);

    let last = stats.last_query().unwrap();
    assert_eq!(last.kind, QueryKind::Prepared);
    assert_eq!(last.params, Some(Params::named([("name", "dave")])));
    assert_eq!(conn.last_insert_id(None).unwrap(), "4");
}

#[test]
fn sqlite_failed_exec_is_recorded_and_returned() {
    let mut conn = memory();
    let err = conn.exec("CREATE TABLE").unwrap_err();
    assert!(matches!(err, Error::Query(_)));
    assert_eq!(err.sql(), Some("CREATE TABLE"));

    let stats = conn.stats();
    assert_eq!(stats.total_count(), 1);
    assert_eq!(stats.error_count(), 1);
    assert_eq!(stats.last_query().unwrap().state, QueryState::Error);
}

#[test]
fn sqlite_failed_prepared_execute_keeps_its_params() {
    let mut conn = memory();
    with_users(&mut conn);

    let mut insert = conn
        .prepare("INSERT INTO users (name) VALUES (?)")
        .unwrap()
        .unwrap();
    let params = Params::positional(["alice"]);
    let err = insert.execute(Some(&params)).unwrap_err();
    assert_eq!(err.sqlstate(), Some("23000"));

    let last = conn.stats().last_query().unwrap();
    assert!(last.is_error());
    assert_eq!(last.kind, QueryKind::Prepared);
    assert_eq!(last.params, Some(params));
}

#[test]
fn sqlite_prepare_failure_returns_none_without_recording() {
    let mut conn = memory();
    assert!(conn.prepare("SELECT * FROM missing_table").unwrap().is_none());

    let info = conn.error_info().unwrap();
    assert!(!info.is_ok());
    assert!(info.message.unwrap_or_default().contains("missing_table"));
    assert_eq!(conn.stats().total_count(), 0);
}

#[test]
fn sqlite_query_returns_rows_with_column_names() {
    let mut conn = memory();
    with_users(&mut conn);

    let mut stmt = conn
        .query("SELECT id, name FROM users ORDER BY id", None)
        .unwrap();
    let rows = stmt.fetch_all(None).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get_by_name("name"), Some(&Value::Text("bob".into())));
    assert_eq!(conn.stats().direct_count(), 3);
}

#[test]
fn sqlite_bound_variables_are_read_per_execution() {
    let mut conn = memory();
    with_users(&mut conn);

    let mut select = conn
        .prepare("SELECT name FROM users WHERE id = :id")
        .unwrap()
        .unwrap();
    let id = bound_var(1);
    select.bind_param("id", Rc::clone(&id), ParamType::Int).unwrap();

    select.execute(None).unwrap();
    assert_eq!(select.fetch_column(0).unwrap(), Some(Value::Text("alice".into())));

    *id.borrow_mut() = Value::Int(2);
    select.execute(None).unwrap();
    assert_eq!(select.fetch_column(0).unwrap(), Some(Value::Text("bob".into())));
    assert!(select.debug_dump_params().contains("id"));
}

#[test]
fn sqlite_transactions_pass_through_unrecorded() {
    let mut conn = memory();
    with_users(&mut conn);
    let before = conn.stats().total_count();

    conn.begin_transaction().unwrap();
    assert!(conn.in_transaction().unwrap());
    conn.exec("DELETE FROM users").unwrap();
    conn.rollback().unwrap();
    assert!(!conn.in_transaction().unwrap());

    let mut count = conn.query("SELECT COUNT(*) FROM users", None).unwrap();
    assert_eq!(count.fetch_column(0).unwrap(), Some(Value::Int(2)));
    assert_eq!(conn.stats().total_count(), before + 2);
}

#[test]
fn sqlite_slow_query_log_and_snapshot() {
    let mut conn = ConnectionConfig::new("sqlite", "localhost", "")
        .slow_query_threshold(Duration::ZERO)
        .capture_call_sites(true)
        .connect(SqliteDriver::new());
    conn.exec("CREATE TABLE t (v INTEGER)").unwrap();
    let mut insert = conn.prepare("INSERT INTO t VALUES (?)").unwrap().unwrap();
    insert.execute(Some(&Params::positional([1]))).unwrap();

    let stats = conn.stats();
    assert_eq!(stats.slow_queries().len(), 2);

    let snapshot = stats.snapshot();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["total_count"], 2);
    assert_eq!(json["slow_queries"].as_array().map(Vec::len), Some(2));
    assert!(
        json["queries"][0]["call_site"]["file"]
            .as_str()
            .unwrap()
            .ends_with("sqlite_lazy_connection.rs")
    );

    let report = snapshot.to_string();
    assert!(report.contains("INSERT INTO t VALUES (?)"));

    stats.reset();
    assert_eq!(conn.stats().total_count(), 0);
    assert!(conn.stats().snapshot().queries.is_empty());
}
