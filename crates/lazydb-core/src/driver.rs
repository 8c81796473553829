//! Database client capability traits.
//!
//! This module defines the boundary between the lazy connection layer and the
//! native database client that actually talks to the server:
//!
//! - [`Driver`] - Establishes native connections from a DSN and credentials
//! - [`NativeConnection`] - An established connection handle
//! - [`NativeStatement`] - A prepared (or executed) statement handle
//!
//! Execution failures are reported as `Err`. Preparation failures are reported
//! through a `None` sentinel with the details available from
//! [`NativeConnection::error_info`], mirroring how database clients commonly
//! signal prepare failures.
//!
//! All operations are blocking. A native handle is owned by exactly one
//! connection and must not be shared between threads without external
//! synchronization.

use crate::error::Result;
use crate::row::Row;
use crate::value::{Params, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// How a native handle reports failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Only set the error code / info
    #[default]
    Silent,
    /// Set the error code / info and log a warning
    Warning,
    /// Set the error code / info and return the error to the caller
    Exception,
}

/// Shape of fetched rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Rows carry column names; name lookups work
    Assoc,
    /// Rows are positional only
    Num,
    /// Rows carry column names and positions
    #[default]
    Both,
}

/// Type hint for a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
    Null,
    Bool,
    Int,
    #[default]
    Str,
    Lob,
}

/// Connection attribute / option identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    /// Error reporting mode ([`ErrorMode`])
    ErrorMode,
    /// Default row shape for fetches ([`FetchMode`])
    DefaultFetchMode,
    /// Timeout in seconds
    Timeout,
    /// Autocommit flag
    Autocommit,
    /// Name of the driver (read-only)
    DriverName,
    /// Server version (read-only)
    ServerVersion,
    /// Client library version (read-only)
    ClientVersion,
    /// Driver-specific option identifier
    Driver(i32),
}

/// Value of a connection attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Text(String),
    ErrorMode(ErrorMode),
    FetchMode(FetchMode),
}

impl AttributeValue {
    /// Interpret the value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

impl From<ErrorMode> for AttributeValue {
    fn from(v: ErrorMode) -> Self {
        AttributeValue::ErrorMode(v)
    }
}

impl From<FetchMode> for AttributeValue {
    fn from(v: FetchMode) -> Self {
        AttributeValue::FetchMode(v)
    }
}

/// Connection / prepare options keyed by attribute identifier.
pub type Options = BTreeMap<Attribute, AttributeValue>;

/// Identifies a placeholder: 1-based position or `:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamId {
    Position(usize),
    Name(String),
}

impl From<usize> for ParamId {
    fn from(v: usize) -> Self {
        ParamId::Position(v)
    }
}

impl From<&str> for ParamId {
    fn from(v: &str) -> Self {
        ParamId::Name(v.to_string())
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamId::Position(p) => write!(f, "#{}", p),
            ParamId::Name(n) => write!(f, "{}", n),
        }
    }
}

/// A variable bound by reference; its value is read when the statement runs.
pub type BoundVar = Rc<RefCell<Value>>;

/// Create a variable suitable for [`NativeStatement::bind_param`].
pub fn bound_var(value: impl Into<Value>) -> BoundVar {
    Rc::new(RefCell::new(value.into()))
}

/// Diagnostic triple for the last operation on a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Five character SQLSTATE ("00000" when the last operation succeeded)
    pub sqlstate: String,
    /// Driver-specific error code
    pub driver_code: Option<i32>,
    /// Driver-specific error message
    pub message: Option<String>,
}

impl ErrorInfo {
    /// Info describing a successful operation.
    pub fn ok() -> Self {
        Self {
            sqlstate: "00000".to_string(),
            driver_code: None,
            message: None,
        }
    }

    /// Did the last operation succeed?
    pub fn is_ok(&self) -> bool {
        self.sqlstate == "00000"
    }
}

impl Default for ErrorInfo {
    fn default() -> Self {
        Self::ok()
    }
}

/// Establishes native connections.
pub trait Driver {
    /// The connection handle produced by this driver.
    type Connection: NativeConnection;

    /// Short driver name as used in DSNs (e.g. "sqlite", "mysql").
    fn name(&self) -> &str;

    /// Open a native connection.
    ///
    /// Failure is fatal for the caller; drivers should not retry.
    fn connect(
        &self,
        dsn: &str,
        username: Option<&str>,
        password: Option<&str>,
        options: &Options,
    ) -> Result<Self::Connection>;

    /// Statement that sets the session character set.
    fn charset_statement(&self, charset: &str, collation: Option<&str>) -> String {
        match collation {
            Some(collation) => format!("SET NAMES {} COLLATE {}", charset, collation),
            None => format!("SET NAMES {}", charset),
        }
    }
}

/// An established native connection.
pub trait NativeConnection {
    /// Statement handle type.
    type Statement: NativeStatement;

    /// Execute a statement and return the number of affected rows.
    fn exec(&mut self, sql: &str) -> Result<u64>;

    /// Run a query and return a statement positioned before its first row.
    fn query(&mut self, sql: &str, fetch_mode: Option<FetchMode>) -> Result<Self::Statement>;

    /// Prepare a statement.
    ///
    /// Returns `None` on failure; see [`error_info`](Self::error_info).
    fn prepare(&mut self, sql: &str, options: &Options) -> Option<Self::Statement>;

    /// Start a transaction.
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Is a transaction currently open?
    fn in_transaction(&self) -> bool;

    /// Read an attribute; `None` if unsupported.
    fn get_attribute(&self, attribute: Attribute) -> Option<AttributeValue>;

    /// Set an attribute.
    fn set_attribute(&mut self, attribute: Attribute, value: AttributeValue) -> Result<()>;

    /// Identifier of the last inserted row (or sequence value for `name`).
    fn last_insert_id(&self, name: Option<&str>) -> Result<String>;

    /// Quote a string literal for inclusion in SQL; `None` if unsupported.
    fn quote(&self, text: &str, param_type: ParamType) -> Option<String>;

    /// SQLSTATE of the last operation, `None` if nothing ran yet.
    fn error_code(&self) -> Option<String>;

    /// Full error information of the last operation.
    fn error_info(&self) -> ErrorInfo;
}

/// A native statement handle.
pub trait NativeStatement {
    /// Execute with the given parameters (or the bound ones when `None`).
    fn execute(&mut self, params: Option<&Params>) -> Result<()>;

    /// Bind a value to a placeholder.
    fn bind_value(&mut self, param: ParamId, value: Value, param_type: ParamType) -> Result<()>;

    /// Bind a variable by reference; it is read at execution time.
    fn bind_param(&mut self, param: ParamId, variable: BoundVar, param_type: ParamType)
    -> Result<()>;

    /// Fetch the next row.
    fn fetch(&mut self, mode: Option<FetchMode>) -> Result<Option<Row>>;

    /// Fetch all remaining rows.
    fn fetch_all(&mut self, mode: Option<FetchMode>) -> Result<Vec<Row>>;

    /// Fetch a single column from the next row.
    fn fetch_column(&mut self, column: usize) -> Result<Option<Value>>;

    /// Rows affected by the last execution (or produced, for queries).
    fn row_count(&self) -> u64;

    /// SQLSTATE of the last operation on this statement.
    fn error_code(&self) -> Option<String>;

    /// Full error information of the last operation on this statement.
    fn error_info(&self) -> ErrorInfo;

    /// Change the default fetch mode for this statement.
    fn set_fetch_mode(&mut self, mode: FetchMode) -> Result<()>;

    /// Discard remaining rows so the statement can be executed again.
    fn close_cursor(&mut self) -> Result<()>;

    /// Human-readable dump of the statement and its bound parameters.
    fn debug_dump_params(&self) -> String;
}
