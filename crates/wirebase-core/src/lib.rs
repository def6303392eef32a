//! Core types shared by the wirebase protocol crates.
//!
//! - [`Error`] and its stable [`ErrorClass`] taxonomy
//! - [`Value`], the dynamic column/parameter value
//! - [`Row`] and [`ColumnInfo`] for decoded result sets
//! - [`FromValue`] for typed extraction

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    CapacityError, ConfigError, ConnectionError, ConnectionErrorKind, Error, ErrorClass,
    ProtocolError, QueryError, QueryErrorKind, Result, TypeError, UsageError, UsageErrorKind,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
