//! Core types and traits for LazyDB.
//!
//! This crate provides the vocabulary shared by the lazy connection layer and
//! the native drivers underneath it:
//!
//! - [`Driver`], [`NativeConnection`] and [`NativeStatement`], the database
//!   client capability the lazy connection delegates to
//! - [`Value`] and [`Params`] for parameter binding and result values
//! - [`Row`] for fetched result rows
//! - [`Error`] and [`Result`] for everything that can fail

pub mod driver;
pub mod error;
pub mod row;
pub mod value;

pub use driver::{
    Attribute, AttributeValue, BoundVar, Driver, ErrorInfo, ErrorMode, FetchMode, NativeConnection,
    NativeStatement, Options, ParamId, ParamType, bound_var,
};
pub use error::{Error, Result};
pub use row::{ColumnInfo, Row};
pub use value::{Params, Value};
