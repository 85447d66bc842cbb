//! Core value types shared by the mapping engine and the sinks.

pub mod value;

pub use value::{render_sql, SqlValue};
