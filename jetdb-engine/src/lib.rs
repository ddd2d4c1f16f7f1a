//! JetDB Engine - read-only Microsoft Access (JET/ACE) database reader
//!
//! This crate provides the storage engine for reading Access 97 (Jet3)
//! through Access 2016 (ACE) database files: page I/O, decryption, table
//! definitions, usage maps, row cracking and long values. Nothing is ever
//! written back to the file.

pub mod database;
pub mod error;
pub mod file_manager;
pub mod options;
pub mod schema;
pub mod storage;

#[cfg(test)]
pub(crate) mod fixture;

pub use database::{CatalogObject, Database, Row, Rows};
pub use error::{ErrorKind, JetError, JetResult};
pub use options::{CancelToken, ReaderOptions, TableNameComparison};
pub use schema::{Column, ColumnType, Index, Table};
pub use storage::format::JetVersion;
pub use storage::header::DatabaseHeader;
pub use storage::lval::{LongValue, LongValueReader};
pub use storage::value::{Currency, Numeric, Value};
