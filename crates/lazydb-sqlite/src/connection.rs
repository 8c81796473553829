//! SQLite connection and statement implementation.
//!
//! This module provides safe wrappers around SQLite's C API and implements
//! the native client traits from lazydb-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi;
use crate::types;
use lazydb_core::error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind};
use lazydb_core::{
    Attribute, AttributeValue, BoundVar, ColumnInfo, Driver, Error, ErrorInfo, ErrorMode,
    FetchMode, NativeConnection, NativeStatement, Options, ParamId, ParamType, Params, Result, Row,
    Value,
};
use std::collections::{BTreeMap, VecDeque};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

/// Driver-specific option: raw `sqlite3_open_v2` flags (integer).
pub const ATTR_OPEN_FLAGS: Attribute = Attribute::Driver(1000);

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Extract the database path from a `sqlite:` DSN.
///
/// Accepts both the key/value form produced by connection configs
/// (`sqlite:host=...;dbname=/tmp/app.db`) and the native form
/// (`sqlite:/tmp/app.db`, `sqlite::memory:`). A missing or empty `dbname`
/// means an in-memory database.
pub fn parse_dsn(dsn: &str) -> Result<String> {
    let rest = dsn
        .split_once(':')
        .filter(|(driver, _)| driver.eq_ignore_ascii_case("sqlite"))
        .map(|(_, rest)| rest)
        .ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::InvalidDsn,
                message: format!("not a sqlite DSN: {}", dsn),
                source: None,
            })
        })?;

    if !rest.contains('=') {
        return Ok(if rest.is_empty() {
            ":memory:".to_string()
        } else {
            rest.to_string()
        });
    }

    let path = rest
        .split(';')
        .filter_map(|part| part.split_once('='))
        .find(|(key, _)| key.trim() == "dbname")
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .unwrap_or(":memory:");

    Ok(path.to_string())
}

/// Map an SQLite charset name onto the `PRAGMA encoding` vocabulary.
fn sqlite_encoding(charset: &str) -> &'static str {
    match charset.to_ascii_lowercase().as_str() {
        "utf16" | "utf-16" => "UTF-16",
        "utf16le" | "utf-16le" => "UTF-16le",
        "utf16be" | "utf-16be" => "UTF-16be",
        _ => "UTF-8",
    }
}

/// Driver producing [`SqliteConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    config: SqliteConfig,
}

impl SqliteDriver {
    /// Create a driver with default open flags and busy timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver with explicit open settings; the path comes from the DSN.
    pub fn with_config(config: SqliteConfig) -> Self {
        Self { config }
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    fn name(&self) -> &str {
        "sqlite"
    }

    fn connect(
        &self,
        dsn: &str,
        _username: Option<&str>,
        _password: Option<&str>,
        options: &Options,
    ) -> Result<SqliteConnection> {
        let mut config = self.config.clone();
        config.path = parse_dsn(dsn)?;

        if let Some(secs) = options.get(&Attribute::Timeout).and_then(|v| v.as_int()) {
            config.busy_timeout_ms = u32::try_from(secs.saturating_mul(1000)).unwrap_or(u32::MAX);
        }

        let raw_flags = options.get(&ATTR_OPEN_FLAGS).and_then(|v| v.as_int());
        let mut conn = SqliteConnection::open_with_flags(
            &config,
            raw_flags.map_or_else(|| config.flags.to_sqlite_flags(), |f| f as c_int),
        )?;

        // Options SQLite has no counterpart for are ignored
        for (attribute, value) in options {
            if matches!(attribute, Attribute::ErrorMode | Attribute::DefaultFetchMode) {
                conn.set_attribute(*attribute, value.clone())?;
            }
        }

        Ok(conn)
    }

    fn charset_statement(&self, charset: &str, _collation: Option<&str>) -> String {
        // SQLite has no per-session collation; collations are declared per column
        format!("PRAGMA encoding = '{}'", sqlite_encoding(charset))
    }
}

/// Owned database handle, closed when the last connection or statement
/// referencing it goes away.
///
/// Every statement holds an `Rc` to its handle, so all statements are
/// finalized before the handle closes.
struct DbHandle {
    db: *mut ffi::sqlite3,
}

impl DbHandle {
    fn close(&mut self) -> c_int {
        if self.db.is_null() {
            return ffi::SQLITE_OK;
        }
        // SAFETY: db is valid and no statement referencing it is left
        let rc = unsafe { ffi::sqlite3_close(self.db) };
        if rc == ffi::SQLITE_OK {
            self.db = ptr::null_mut();
        }
        rc
    }
}

impl Drop for DbHandle {
    fn drop(&mut self) {
        let rc = self.close();
        if rc != ffi::SQLITE_OK {
            tracing::warn!(
                target: "lazydb::sqlite",
                code = rc,
                error = ffi::error_string(rc),
                "failed to close sqlite database"
            );
        }
    }
}

/// A connection to a SQLite database.
///
/// The handle is owned by one connection and is not shared between threads.
pub struct SqliteConnection {
    handle: Rc<DbHandle>,
    path: String,
    error_mode: ErrorMode,
    fetch_mode: FetchMode,
    busy_timeout_ms: u32,
    last_error: Option<ErrorInfo>,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("error_mode", &self.error_mode)
            .field("fetch_mode", &self.fetch_mode)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        Self::open_with_flags(config, config.flags.to_sqlite_flags())
    }

    fn open_with_flags(config: &SqliteConfig, flags: c_int) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::InvalidDsn,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid even on failure and must still be closed
                unsafe {
                    let msg = ffi::errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::debug!(target: "lazydb::sqlite", path = %config.path, "opened sqlite database");

        Ok(Self {
            handle: Rc::new(DbHandle { db }),
            path: config.path.clone(),
            error_mode: ErrorMode::default(),
            fetch_mode: FetchMode::default(),
            busy_timeout_ms: config.busy_timeout_ms,
            last_error: None,
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn db(&self) -> *mut ffi::sqlite3 {
        self.handle.db
    }

    /// Number of rows changed by the most recent statement.
    pub fn changes(&self) -> u64 {
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_changes(self.db()) };
        u64::try_from(n).unwrap_or(0)
    }

    fn autocommit(&self) -> bool {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_get_autocommit(self.db()) != 0 }
    }

    /// Record the outcome of an operation and pass it through.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_error = Some(ErrorInfo::ok()),
            Err(e) => self.last_error = Some(failure_info(self.error_mode, e)),
        }
        result
    }

    fn exec_raw(&self, sql: &str) -> Result<u64> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        tracing::trace!(target: "lazydb::sqlite", sql, "exec");

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(self.db(), c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg is valid and owned by us
                let msg = unsafe { CStr::from_ptr(errmsg).to_string_lossy().into_owned() };
                unsafe { ffi::sqlite3_free(errmsg.cast()) };
                msg
            };
            return Err(query_error(rc, Some(sql), msg));
        }

        Ok(self.changes())
    }

    fn transaction_error(message: &str) -> Error {
        Error::Query(QueryError {
            kind: QueryErrorKind::Transaction,
            sql: None,
            sqlstate: Some("HY000".to_string()),
            driver_code: None,
            message: message.to_string(),
            source: None,
        })
    }
}

impl NativeConnection for SqliteConnection {
    type Statement = SqliteStatement;

    fn exec(&mut self, sql: &str) -> Result<u64> {
        let result = self.exec_raw(sql);
        self.track(result)
    }

    fn query(&mut self, sql: &str, fetch_mode: Option<FetchMode>) -> Result<SqliteStatement> {
        let result = prepare_stmt(self.db(), sql).and_then(|stmt| {
            let mut statement = SqliteStatement::new(
                Rc::clone(&self.handle),
                stmt,
                sql,
                fetch_mode.unwrap_or(self.fetch_mode),
                self.error_mode,
            );
            statement.execute(None)?;
            Ok(statement)
        });
        self.track(result)
    }

    fn prepare(&mut self, sql: &str, options: &Options) -> Option<SqliteStatement> {
        let fetch_mode = match options.get(&Attribute::DefaultFetchMode) {
            Some(AttributeValue::FetchMode(mode)) => *mode,
            _ => self.fetch_mode,
        };
        let error_mode = match options.get(&Attribute::ErrorMode) {
            Some(AttributeValue::ErrorMode(mode)) => *mode,
            _ => self.error_mode,
        };
        let result = prepare_stmt(self.db(), sql).map(|stmt| {
            SqliteStatement::new(Rc::clone(&self.handle), stmt, sql, fetch_mode, error_mode)
        });
        self.track(result).ok()
    }

    fn begin_transaction(&mut self) -> Result<()> {
        let result = if self.autocommit() {
            self.exec_raw("BEGIN").map(|_| ())
        } else {
            Err(Self::transaction_error("There is already an active transaction"))
        };
        self.track(result)
    }

    fn commit(&mut self) -> Result<()> {
        let result = if self.autocommit() {
            Err(Self::transaction_error("There is no active transaction"))
        } else {
            self.exec_raw("COMMIT").map(|_| ())
        };
        self.track(result)
    }

    fn rollback(&mut self) -> Result<()> {
        let result = if self.autocommit() {
            Err(Self::transaction_error("There is no active transaction"))
        } else {
            self.exec_raw("ROLLBACK").map(|_| ())
        };
        self.track(result)
    }

    fn in_transaction(&self) -> bool {
        !self.autocommit()
    }

    fn get_attribute(&self, attribute: Attribute) -> Option<AttributeValue> {
        match attribute {
            Attribute::ErrorMode => Some(AttributeValue::ErrorMode(self.error_mode)),
            Attribute::DefaultFetchMode => Some(AttributeValue::FetchMode(self.fetch_mode)),
            Attribute::Timeout => Some(AttributeValue::Int(i64::from(
                self.busy_timeout_ms / 1000,
            ))),
            Attribute::Autocommit => Some(AttributeValue::Bool(self.autocommit())),
            Attribute::DriverName => Some(AttributeValue::Text("sqlite".to_string())),
            Attribute::ServerVersion | Attribute::ClientVersion => {
                Some(AttributeValue::Text(ffi::version().to_string()))
            }
            Attribute::Driver(_) => None,
        }
    }

    fn set_attribute(&mut self, attribute: Attribute, value: AttributeValue) -> Result<()> {
        let result = match (attribute, value) {
            (Attribute::ErrorMode, AttributeValue::ErrorMode(mode)) => {
                self.error_mode = mode;
                Ok(())
            }
            (Attribute::DefaultFetchMode, AttributeValue::FetchMode(mode)) => {
                self.fetch_mode = mode;
                Ok(())
            }
            (Attribute::Timeout, value) if value.as_int().is_some() => {
                let secs = value.as_int().unwrap_or_default();
                self.busy_timeout_ms =
                    u32::try_from(secs.saturating_mul(1000)).unwrap_or(u32::MAX);
                // SAFETY: db is valid
                unsafe {
                    ffi::sqlite3_busy_timeout(self.db(), self.busy_timeout_ms as c_int);
                }
                Ok(())
            }
            (attribute, value) => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                sqlstate: Some("IM001".to_string()),
                driver_code: None,
                message: format!(
                    "Driver does not support setting {:?} to {:?}",
                    attribute, value
                ),
                source: None,
            })),
        };
        self.track(result)
    }

    fn last_insert_id(&self, _name: Option<&str>) -> Result<String> {
        // SAFETY: db is valid
        let id = unsafe { ffi::sqlite3_last_insert_rowid(self.db()) };
        Ok(id.to_string())
    }

    fn quote(&self, text: &str, _param_type: ParamType) -> Option<String> {
        Some(format!("'{}'", text.replace('\'', "''")))
    }

    fn error_code(&self) -> Option<String> {
        self.last_error.as_ref().map(|e| e.sqlstate.clone())
    }

    fn error_info(&self) -> ErrorInfo {
        self.last_error.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Value(Value),
    Var(BoundVar),
}

impl Binding {
    fn current(&self) -> Value {
        match self {
            Binding::Value(v) => v.clone(),
            Binding::Var(var) => var.borrow().clone(),
        }
    }
}

/// A prepared SQLite statement.
///
/// Result rows are read into memory when the statement executes; fetches
/// consume the buffered rows.
pub struct SqliteStatement {
    handle: Rc<DbHandle>,
    stmt: *mut ffi::sqlite3_stmt,
    sql: String,
    columns: Arc<ColumnInfo>,
    bindings: BTreeMap<ParamId, (Binding, ParamType)>,
    rows: VecDeque<Vec<Value>>,
    fetch_mode: FetchMode,
    error_mode: ErrorMode,
    row_count: u64,
    last_error: Option<ErrorInfo>,
}

impl std::fmt::Debug for SqliteStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStatement")
            .field("sql", &self.sql)
            .field("fetch_mode", &self.fetch_mode)
            .field("error_mode", &self.error_mode)
            .field("pending_rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}

impl SqliteStatement {
    fn new(
        handle: Rc<DbHandle>,
        stmt: *mut ffi::sqlite3_stmt,
        sql: &str,
        fetch_mode: FetchMode,
        error_mode: ErrorMode,
    ) -> Self {
        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt) };
        let names = (0..col_count)
            .map(|i| unsafe { types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{}", i)))
            .collect();

        Self {
            handle,
            stmt,
            sql: sql.to_string(),
            columns: Arc::new(ColumnInfo::new(names)),
            bindings: BTreeMap::new(),
            rows: VecDeque::new(),
            fetch_mode,
            error_mode,
            row_count: 0,
            last_error: None,
        }
    }

    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Error reporting mode inherited from the connection at prepare time.
    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    fn db(&self) -> *mut ffi::sqlite3 {
        self.handle.db
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        self.last_error = Some(match &result {
            Ok(_) => ErrorInfo::ok(),
            Err(e) => failure_info(self.error_mode, e),
        });
        result
    }

    fn param_index(&self, param: &ParamId) -> Result<c_int> {
        let index = match param {
            ParamId::Position(p) => c_int::try_from(*p).unwrap_or(0),
            ParamId::Name(name) => {
                let name = if name.starts_with([':', '@', '$']) {
                    name.clone()
                } else {
                    format!(":{}", name)
                };
                let c_name = CString::new(name).map_err(|_| null_byte_error(&self.sql))?;
                // SAFETY: stmt and name are valid
                unsafe { ffi::sqlite3_bind_parameter_index(self.stmt, c_name.as_ptr()) }
            }
        };
        // SAFETY: stmt is valid
        let count = unsafe { ffi::sqlite3_bind_parameter_count(self.stmt) };
        if index < 1 || index > count {
            return Err(invalid_parameter(&self.sql, param));
        }
        Ok(index)
    }

    fn bind(&self, index: c_int, value: &Value) -> Result<()> {
        // SAFETY: stmt is valid, index was checked against the parameter count
        let rc = unsafe { types::bind_value(self.stmt, index, value) };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            // SAFETY: db is valid
            let msg = unsafe { ffi::errmsg(self.db()) };
            Err(Error::Query(QueryError {
                kind: QueryErrorKind::Bind,
                sql: Some(self.sql.clone()),
                sqlstate: Some("HY000".to_string()),
                driver_code: Some(rc),
                message: format!("Failed to bind parameter {}: {}", index, msg),
                source: None,
            }))
        }
    }

    fn bind_all(&self, params: Option<&Params>) -> Result<()> {
        match params {
            Some(Params::Positional(values)) => {
                // SAFETY: stmt is valid
                let count = unsafe { ffi::sqlite3_bind_parameter_count(self.stmt) };
                if values.len() != usize::try_from(count).unwrap_or(0) {
                    return Err(Error::Query(QueryError {
                        kind: QueryErrorKind::Bind,
                        sql: Some(self.sql.clone()),
                        sqlstate: Some("HY093".to_string()),
                        driver_code: None,
                        message: format!(
                            "Invalid parameter number: expected {} parameters, got {}",
                            count,
                            values.len()
                        ),
                        source: None,
                    }));
                }
                for (i, value) in values.iter().enumerate() {
                    self.bind((i + 1) as c_int, value)?;
                }
            }
            Some(Params::Named(values)) => {
                for (name, value) in values {
                    let index = self.param_index(&ParamId::Name(name.clone()))?;
                    self.bind(index, value)?;
                }
            }
            None => {
                for (param, (binding, param_type)) in &self.bindings {
                    let index = self.param_index(param)?;
                    self.bind(index, &types::coerce(binding.current(), *param_type))?;
                }
            }
        }
        Ok(())
    }

    fn run(&mut self, params: Option<&Params>) -> Result<()> {
        // SAFETY: stmt is valid
        unsafe {
            ffi::sqlite3_reset(self.stmt);
            ffi::sqlite3_clear_bindings(self.stmt);
        }
        self.rows.clear();
        self.row_count = 0;

        self.bind_all(params)?;

        tracing::trace!(target: "lazydb::sqlite", sql = %self.sql, "execute");

        let col_count = self.columns.len() as c_int;
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(self.stmt) };
            match rc {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(self.stmt, i) })
                        .collect();
                    self.rows.push_back(values);
                }
                ffi::SQLITE_DONE => break,
                _ => {
                    // SAFETY: db is valid
                    let msg = unsafe { ffi::errmsg(self.db()) };
                    let code = unsafe { ffi::sqlite3_errcode(self.db()) };
                    unsafe { ffi::sqlite3_reset(self.stmt) };
                    return Err(query_error(code, Some(&self.sql), msg));
                }
            }
        }

        self.row_count = if col_count == 0 {
            // SAFETY: db is valid
            u64::try_from(unsafe { ffi::sqlite3_changes(self.db()) }).unwrap_or(0)
        } else {
            self.rows.len() as u64
        };
        Ok(())
    }

    fn make_row(&self, values: Vec<Value>, mode: Option<FetchMode>) -> Row {
        match mode.unwrap_or(self.fetch_mode) {
            FetchMode::Num => Row::with_columns(Arc::new(ColumnInfo::anonymous()), values),
            FetchMode::Assoc | FetchMode::Both => {
                Row::with_columns(Arc::clone(&self.columns), values)
            }
        }
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        // SAFETY: stmt is valid and finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.stmt);
        }
    }
}

impl NativeStatement for SqliteStatement {
    fn execute(&mut self, params: Option<&Params>) -> Result<()> {
        let result = self.run(params);
        self.track(result)
    }

    fn bind_value(&mut self, param: ParamId, value: Value, param_type: ParamType) -> Result<()> {
        let result = self.param_index(&param).map(|_| {
            self.bindings
                .insert(param, (Binding::Value(value), param_type));
        });
        self.track(result)
    }

    fn bind_param(
        &mut self,
        param: ParamId,
        variable: BoundVar,
        param_type: ParamType,
    ) -> Result<()> {
        let result = self.param_index(&param).map(|_| {
            self.bindings
                .insert(param, (Binding::Var(variable), param_type));
        });
        self.track(result)
    }

    fn fetch(&mut self, mode: Option<FetchMode>) -> Result<Option<Row>> {
        Ok(self
            .rows
            .pop_front()
            .map(|values| self.make_row(values, mode)))
    }

    fn fetch_all(&mut self, mode: Option<FetchMode>) -> Result<Vec<Row>> {
        let rows = std::mem::take(&mut self.rows);
        Ok(rows
            .into_iter()
            .map(|values| self.make_row(values, mode))
            .collect())
    }

    fn fetch_column(&mut self, column: usize) -> Result<Option<Value>> {
        let Some(mut values) = self.rows.pop_front() else {
            return Ok(None);
        };
        if column >= values.len() {
            let result = Err(Error::Query(QueryError {
                kind: QueryErrorKind::NotFound,
                sql: Some(self.sql.clone()),
                sqlstate: Some("HY000".to_string()),
                driver_code: None,
                message: format!("Invalid column index {}", column),
                source: None,
            }));
            return self.track(result);
        }
        Ok(Some(values.swap_remove(column)))
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }

    fn error_code(&self) -> Option<String> {
        self.last_error.as_ref().map(|e| e.sqlstate.clone())
    }

    fn error_info(&self) -> ErrorInfo {
        self.last_error.clone().unwrap_or_default()
    }

    fn set_fetch_mode(&mut self, mode: FetchMode) -> Result<()> {
        self.fetch_mode = mode;
        Ok(())
    }

    fn close_cursor(&mut self) -> Result<()> {
        self.rows.clear();
        // SAFETY: stmt is valid
        unsafe {
            ffi::sqlite3_reset(self.stmt);
        }
        Ok(())
    }

    fn debug_dump_params(&self) -> String {
        let mut out = format!("SQL: [{}] {}\nParams:  {}\n", self.sql.len(), self.sql, self.bindings.len());
        for (param, (binding, param_type)) in &self.bindings {
            out.push_str(&format!(
                "Key: {}\nvalue={}\nparam_type={:?}\n",
                param,
                binding.current(),
                param_type
            ));
        }
        out
    }
}

// Helper functions

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK {
        // SAFETY: db is valid
        let msg = unsafe { ffi::errmsg(db) };
        return Err(query_error(rc, Some(sql), msg));
    }

    if stmt.is_null() {
        // Empty SQL or only comments
        return Err(query_error(
            ffi::SQLITE_ERROR,
            Some(sql),
            "statement contains no SQL".to_string(),
        ));
    }

    Ok(stmt)
}

fn query_error(code: c_int, sql: Option<&str>, message: String) -> Error {
    let primary = code & 0xff;
    Error::Query(QueryError {
        kind: error_code_to_kind(primary),
        sql: sql.map(str::to_string),
        sqlstate: Some(if primary == ffi::SQLITE_CONSTRAINT {
            "23000".to_string()
        } else {
            "HY000".to_string()
        }),
        driver_code: Some(code),
        message,
        source: None,
    })
}

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        sqlstate: Some("HY000".to_string()),
        driver_code: None,
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn invalid_parameter(sql: &str, param: &ParamId) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Bind,
        sql: Some(sql.to_string()),
        sqlstate: Some("HY093".to_string()),
        driver_code: Some(ffi::SQLITE_RANGE),
        message: format!("Invalid parameter number: parameter {} is not defined", param),
        source: None,
    })
}

fn error_info_of(err: &Error) -> ErrorInfo {
    match err {
        Error::Query(q) => ErrorInfo {
            sqlstate: q.sqlstate.clone().unwrap_or_else(|| "HY000".to_string()),
            driver_code: q.driver_code,
            message: Some(q.message.clone()),
        },
        other => ErrorInfo {
            sqlstate: "HY000".to_string(),
            driver_code: None,
            message: Some(other.to_string()),
        },
    }
}

/// Error info for a failed operation; `Warning` mode also logs it.
fn failure_info(mode: ErrorMode, err: &Error) -> ErrorInfo {
    let info = error_info_of(err);
    if mode == ErrorMode::Warning {
        tracing::warn!(
            target: "lazydb::sqlite",
            sqlstate = %info.sqlstate,
            code = ?info.driver_code,
            error = %err,
            "sqlite operation failed"
        );
    }
    info
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_RANGE => QueryErrorKind::Bind,
        _ => QueryErrorKind::Database,
    }
}
