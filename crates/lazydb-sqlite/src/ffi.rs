//! Low-level bindings to libsqlite3.
//!
//! The raw declarations come from `libsqlite3-sys`; this module re-exports the
//! subset the driver uses and adds a few safe helpers on top.

pub use libsqlite3_sys::{
    SQLITE_AUTH, SQLITE_BUSY, SQLITE_CONSTRAINT, SQLITE_DONE, SQLITE_ERROR, SQLITE_FLOAT,
    SQLITE_INTEGER, SQLITE_LOCKED, SQLITE_NOTFOUND, SQLITE_NULL, SQLITE_OK, SQLITE_OPEN_CREATE,
    SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI, SQLITE_PERM, SQLITE_RANGE,
    SQLITE_ROW, SQLITE_TEXT, SQLITE_TOOBIG, sqlite3, sqlite3_bind_blob, sqlite3_bind_double,
    sqlite3_bind_int, sqlite3_bind_int64, sqlite3_bind_null, sqlite3_bind_parameter_count,
    sqlite3_bind_parameter_index, sqlite3_bind_text, sqlite3_busy_timeout, sqlite3_changes,
    sqlite3_clear_bindings, sqlite3_close, sqlite3_column_blob,
    sqlite3_column_bytes, sqlite3_column_count, sqlite3_column_double, sqlite3_column_int64,
    sqlite3_column_name, sqlite3_column_text, sqlite3_column_type, sqlite3_errcode,
    sqlite3_errmsg, sqlite3_errstr, sqlite3_exec, sqlite3_finalize, sqlite3_free,
    sqlite3_get_autocommit, sqlite3_last_insert_rowid, sqlite3_libversion,
    sqlite3_libversion_number, sqlite3_open_v2, sqlite3_prepare_v2, sqlite3_reset, sqlite3_step,
    sqlite3_stmt,
};

use std::ffi::{CStr, c_int};

/// Destructor value telling SQLite to copy bound text/blob data.
pub fn transient() -> libsqlite3_sys::sqlite3_destructor_type {
    libsqlite3_sys::SQLITE_TRANSIENT()
}

/// Get the SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// Get the SQLite library version as a number.
pub fn version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number is always safe to call
    unsafe { sqlite3_libversion_number() }
}

/// Convert an SQLite result code to a human-readable string.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string
    unsafe {
        let ptr = sqlite3_errstr(code);
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}

/// Read the current error message of a connection.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn errmsg(db: *mut sqlite3) -> String {
    // SAFETY: caller guarantees db is valid; errmsg returns a valid C string
    unsafe {
        let ptr = sqlite3_errmsg(db);
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let v = version();
        assert!(!v.is_empty());
        assert!(v.starts_with('3'));
    }

    #[test]
    fn test_version_number() {
        // SQLite 3.x.x version numbers are in the form 3XXYYZZ
        assert!(version_number() >= 3_000_000);
    }

    #[test]
    fn test_error_string() {
        assert_eq!(error_string(SQLITE_OK), "not an error");
        assert_eq!(error_string(SQLITE_ERROR), "SQL logic error");
        assert_eq!(error_string(SQLITE_BUSY), "database is locked");
        assert_eq!(error_string(SQLITE_CONSTRAINT), "constraint failed");
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(SQLITE_OK, 0);
        assert_eq!(SQLITE_ROW, 100);
        assert_eq!(SQLITE_DONE, 101);
    }
}
