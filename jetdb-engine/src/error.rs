//! Error handling for the JET page reader
//!
//! Errors fall into a small number of classes: format violations found in the
//! file itself, caller misuse, size limits, I/O and cancellation. Every error
//! maps onto one [`ErrorKind`] so collaborators can decide how to react without
//! matching on individual variants.

use thiserror::Error;

use crate::schema::ColumnType;
use crate::storage::page::PageType;

/// Broad classification of a [`JetError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The file violates the on-disk format
    InvalidData,
    /// The caller asked for something that does not exist or cannot be converted
    InvalidArgument,
    /// The database was closed before the operation ran
    Disposed,
    /// A caller-imposed size limit was exceeded
    Overflow,
    /// The underlying source failed
    Io,
    /// The operation was cancelled through its token
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::InvalidData => "invalid data",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Disposed => "disposed",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Io => "I/O",
            ErrorKind::Cancelled => "cancelled",
        })
    }
}

/// Main error type for the JET reader
#[derive(Error, Debug)]
pub enum JetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a JET database: {0}")]
    NotJetDatabase(String),

    #[error("Page {page}: expected {expected:?} page, found type tag 0x{observed:02X}")]
    WrongPageType {
        page: u32,
        expected: PageType,
        observed: u8,
    },

    #[error("Invalid data on page {page}: {reason}")]
    InvalidData { page: u32, reason: String },

    #[error("Unknown usage map type 0x{map_type:02X}")]
    InvalidUsageMap { map_type: u8 },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column index {index} out of range ({count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("Cannot read {column_type:?} column as {requested}")]
    InvalidCast {
        column_type: ColumnType,
        requested: &'static str,
    },

    #[error("Value is null, cannot read as {0}")]
    NullValue(&'static str),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Database has been closed")]
    Disposed,

    #[error("Value of {actual} bytes exceeds the limit of {limit} bytes")]
    Overflow { actual: usize, limit: usize },

    #[error("Operation cancelled")]
    Cancelled,
}

impl JetError {
    /// Shorthand for an [`JetError::InvalidData`] on a given page
    pub fn invalid_data(page: u32, reason: impl Into<String>) -> Self {
        JetError::InvalidData {
            page,
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            JetError::Io(_) => ErrorKind::Io,
            JetError::NotJetDatabase(_)
            | JetError::WrongPageType { .. }
            | JetError::InvalidData { .. }
            | JetError::InvalidUsageMap { .. } => ErrorKind::InvalidData,
            JetError::TableNotFound(_)
            | JetError::ColumnNotFound(_)
            | JetError::ColumnOutOfRange { .. }
            | JetError::InvalidCast { .. }
            | JetError::NullValue(_)
            | JetError::InvalidOperation(_) => ErrorKind::InvalidArgument,
            JetError::Disposed => ErrorKind::Disposed,
            JetError::Overflow { .. } => ErrorKind::Overflow,
            JetError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Result type for JET operations
pub type JetResult<T> = Result<T, JetError>;
