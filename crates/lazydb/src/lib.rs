//! Lazily connecting, query-instrumenting database connections.
//!
//! `lazydb` wraps a native database client (anything implementing
//! [`Driver`]) in a [`LazyConnection`] that:
//!
//! - does not connect until the first query, transaction or metadata call
//! - applies the configured session charset and strict error reporting as
//!   part of connecting
//! - times every direct query and prepared-statement execution and records it
//!   in a per-connection [`QueryStats`], successful or not
//! - keeps a separate log of slow queries, optionally with the call site that
//!   issued them
//!
//! # Example
//!
//! ```rust,ignore
//! use lazydb::{ConnectionConfig, Params};
//! use lazydb::sqlite::SqliteDriver;
//!
//! let mut conn = ConnectionConfig::new("sqlite", "localhost", "")
//!     .slow_query_threshold_ms(50)
//!     .capture_call_sites(true)
//!     .connect(SqliteDriver::new());
//!
//! conn.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let mut insert = conn.prepare("INSERT INTO users (name) VALUES (?)")?.unwrap();
//! insert.execute(Some(&Params::positional(["Alice"])))?;
//!
//! let stats = conn.stats();
//! assert_eq!(stats.total_count(), 2);
//! println!("{}", stats.snapshot());
//! ```

pub mod config;
pub mod connection;
pub mod statement;
pub mod stats;

#[cfg(test)]
mod mock;

pub use config::{ConnectionConfig, DEFAULT_SLOW_QUERY_THRESHOLD};
pub use connection::{LazyConnection, NativeStatementOf};
pub use statement::Statement;
pub use stats::{CallSite, QueryKind, QueryRecord, QueryState, QueryStats, StatsSnapshot};

pub use lazydb_core::error::{
    ConfigError, ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind,
};
pub use lazydb_core::{
    Attribute, AttributeValue, BoundVar, ColumnInfo, Driver, Error, ErrorInfo, ErrorMode,
    FetchMode, NativeConnection, NativeStatement, Options, ParamId, ParamType, Params, Result, Row,
    Value, bound_var,
};

/// The bundled SQLite driver.
#[cfg(feature = "sqlite")]
pub use lazydb_sqlite as sqlite;
