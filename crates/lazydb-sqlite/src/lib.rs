//! SQLite driver for LazyDB.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate provides a native SQLite client built on `libsqlite3-sys`.
//! It implements the [`Driver`](lazydb_core::Driver),
//! [`NativeConnection`](lazydb_core::NativeConnection) and
//! [`NativeStatement`](lazydb_core::NativeStatement) traits from lazydb-core,
//! so it can sit behind a lazy connection.
//!
//! # DSN format
//!
//! Both `sqlite:host=localhost;dbname=/path/to/app.db` (as generated from a
//! connection config) and the short form `sqlite:/path/to/app.db` are
//! accepted. A missing or empty `dbname` opens an in-memory database.
//!
//! # Example
//!
//! ```rust,ignore
//! use lazydb_core::{Driver, NativeConnection, NativeStatement, Options, Params};
//! use lazydb_sqlite::SqliteDriver;
//!
//! let mut conn = SqliteDriver::new().connect("sqlite::memory:", None, None, &Options::new())?;
//! conn.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//!
//! let mut insert = conn.prepare("INSERT INTO users (name) VALUES (?)", &Options::new()).unwrap();
//! insert.execute(Some(&Params::positional(["Alice"])))?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json` | TEXT |
//! | `Null` | NULL |
//!
//! # Thread Safety
//!
//! Connections and statements share the database handle through `Rc`, so
//! neither is `Send`. Each thread opens its own connection.

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{
    ATTR_OPEN_FLAGS, OpenFlags, SqliteConfig, SqliteConnection, SqliteDriver, SqliteStatement,
    parse_dsn,
};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
