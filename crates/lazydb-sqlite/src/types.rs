//! Type encoding and decoding between Rust and SQLite.
//!
//! SQLite has 5 storage classes (INTEGER, REAL, TEXT, BLOB, NULL). We map
//! these to/from lazydb-core's [`Value`].

#![allow(clippy::cast_possible_truncation)]

use crate::ffi;
use lazydb_core::{ParamType, Value};
use std::ffi::{CStr, c_int};

/// Bind a Value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: caller guarantees stmt and index are valid; SQLITE_TRANSIENT
    // makes SQLite copy text and blob data before we return
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int(stmt, index, c_int::from(*b)),
            Value::Int(v) => ffi::sqlite3_bind_int(stmt, index, *v),
            Value::BigInt(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => bind_text(stmt, index, s),
            Value::Bytes(b) => ffi::sqlite3_bind_blob(
                stmt,
                index,
                b.as_ptr().cast(),
                b.len() as c_int,
                ffi::transient(),
            ),
            // JSON stored as text
            Value::Json(json) => bind_text(stmt, index, &json.to_string()),
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, text: &str) -> c_int {
    let bytes = text.as_bytes();
    // SAFETY: forwarded from bind_value
    unsafe {
        ffi::sqlite3_bind_text(
            stmt,
            index,
            bytes.as_ptr().cast(),
            bytes.len() as c_int,
            ffi::transient(),
        )
    }
}

/// Read a column value from a result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: caller guarantees stmt is positioned on a row
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_NULL => Value::Null,

            ffi::SQLITE_INTEGER => {
                let v = ffi::sqlite3_column_int64(stmt, index);
                // Choose the smallest representation
                i32::try_from(v).map_or(Value::BigInt(v), Value::Int)
            }

            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),

            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() {
                    Value::Null
                } else {
                    let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }

            _ => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() || len == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
                    Value::Bytes(slice.to_vec())
                }
            }
        }
    }
}

/// Get the column name from a result.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller guarantees stmt and index are valid
    unsafe {
        let ptr = ffi::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            CStr::from_ptr(ptr).to_str().ok().map(String::from)
        }
    }
}

/// Apply a bind-time type hint to a value.
///
/// Values that cannot be converted to the hinted type are bound unchanged.
pub fn coerce(value: Value, param_type: ParamType) -> Value {
    match param_type {
        ParamType::Null => Value::Null,
        ParamType::Int => match value.as_i64() {
            Some(v) => Value::BigInt(v),
            None => value,
        },
        ParamType::Bool => match value.as_bool() {
            Some(v) => Value::Bool(v),
            None => value,
        },
        ParamType::Str => match value {
            Value::Int(v) => Value::Text(v.to_string()),
            Value::BigInt(v) => Value::Text(v.to_string()),
            Value::Double(v) => Value::Text(v.to_string()),
            other => other,
        },
        ParamType::Lob => match value {
            Value::Text(s) => Value::Bytes(s.into_bytes()),
            other => other,
        },
    }
}
