//! Table, column and index metadata
//!
//! These are the frozen results of parsing a table definition. They are
//! never mutated after [`crate::storage::tdef`] builds them.

use bitflags::bitflags;
use serde::Serialize;

use crate::error::{JetError, JetResult};
use crate::options::TableNameComparison;
use crate::storage::text::TextEncoding;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColumnType {
    Boolean,
    Byte,
    Int16,
    Int32,
    Currency,
    Single,
    Double,
    DateTime,
    Binary,
    Text,
    Ole,
    Memo,
    Guid,
    /// Exact decimal (Jet4+)
    Numeric,
    /// Attachment / multi-value column (Access 2007+)
    Complex,
    Unknown(u8),
}

impl From<u8> for ColumnType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ColumnType::Boolean,
            0x02 => ColumnType::Byte,
            0x03 => ColumnType::Int16,
            0x04 => ColumnType::Int32,
            0x05 => ColumnType::Currency,
            0x06 => ColumnType::Single,
            0x07 => ColumnType::Double,
            0x08 => ColumnType::DateTime,
            0x09 => ColumnType::Binary,
            0x0A => ColumnType::Text,
            0x0B => ColumnType::Ole,
            0x0C => ColumnType::Memo,
            0x0F => ColumnType::Guid,
            0x10 => ColumnType::Numeric,
            0x12 => ColumnType::Complex,
            other => ColumnType::Unknown(other),
        }
    }
}

impl ColumnType {
    /// Type code as stored in the table definition
    pub fn code(&self) -> u8 {
        match self {
            ColumnType::Boolean => 0x01,
            ColumnType::Byte => 0x02,
            ColumnType::Int16 => 0x03,
            ColumnType::Int32 => 0x04,
            ColumnType::Currency => 0x05,
            ColumnType::Single => 0x06,
            ColumnType::Double => 0x07,
            ColumnType::DateTime => 0x08,
            ColumnType::Binary => 0x09,
            ColumnType::Text => 0x0A,
            ColumnType::Ole => 0x0B,
            ColumnType::Memo => 0x0C,
            ColumnType::Guid => 0x0F,
            ColumnType::Numeric => 0x10,
            ColumnType::Complex => 0x12,
            ColumnType::Unknown(code) => *code,
        }
    }

    /// Text-like types carry collation and encoding
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Memo)
    }

    /// Values stored through the long-value chain
    pub fn is_long_value(&self) -> bool {
        matches!(self, ColumnType::Memo | ColumnType::Ole)
    }
}

bitflags! {
    /// Column flags byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ColumnFlags: u8 {
        const FIXED_LENGTH = 0x01;
        const NULLABLE     = 0x02;
        const AUTO_LONG    = 0x04;
        const REPLICATION  = 0x10;
        const AUTO_GUID    = 0x40;
        const HYPERLINK    = 0x80;
    }
}

/// Type-specific column information; exactly one applies per column type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnInfo {
    /// Text and Memo columns
    Text {
        collation: u16,
        codepage: u16,
        encoding: TextEncoding,
    },
    /// Every other non-complex column; meaningful for Numeric
    Decimal { precision: u8, scale: u8 },
    /// Complex columns point at their own definition page
    Complex { definition_page: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    /// Column number
    pub number: u16,
    /// Column number counting deleted columns; orders columns and the null bitmap
    pub number_incl_deleted: u16,
    pub offset_variable: u16,
    pub offset_fixed: u16,
    /// Declared length in bytes
    pub length: u16,
    pub flags: ColumnFlags,
    pub info: ColumnInfo,
}

impl Column {
    pub fn is_fixed(&self) -> bool {
        self.flags.contains(ColumnFlags::FIXED_LENGTH)
    }

    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    pub fn is_auto_number(&self) -> bool {
        self.flags
            .intersects(ColumnFlags::AUTO_LONG | ColumnFlags::AUTO_GUID)
    }

    pub fn is_hyperlink(&self) -> bool {
        self.flags.contains(ColumnFlags::HYPERLINK)
    }
}

/// (column, order) pair of a real index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexColumn {
    pub column: u16,
    /// 1 = ascending
    pub order: u8,
}

/// Physical index structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealIndex {
    pub index_rows: u32,
    pub columns: Vec<IndexColumn>,
    pub used_pages: u32,
    pub first_data_page: u32,
    pub flags: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexType {
    Normal,
    Primary,
    Foreign,
    Other(u8),
}

impl From<u8> for IndexType {
    fn from(value: u8) -> Self {
        match value {
            0 => IndexType::Normal,
            1 => IndexType::Primary,
            2 => IndexType::Foreign,
            other => IndexType::Other(other),
        }
    }
}

/// Logical index, possibly a relationship to another table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
    pub name: String,
    pub number: u32,
    /// Real index backing this one
    pub real_index: u32,
    pub related_table_type: u8,
    pub related_index: i32,
    pub related_table_page: i32,
    pub cascade_updates: bool,
    pub cascade_deletes: bool,
    pub index_type: IndexType,
}

/// Usage maps of a variable-length column's long values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VarColumnMaps {
    pub column: u16,
    pub used_pages: u32,
    pub free_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TableType {
    User,
    System,
    Other(u8),
}

impl From<u8> for TableType {
    fn from(value: u8) -> Self {
        match value {
            0x4E => TableType::User,
            0x53 => TableType::System,
            other => TableType::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub definition_page: u32,
    pub table_type: TableType,
    pub row_count: u32,
    pub next_autonumber: u32,
    pub autonumber_increment: Option<u32>,
    pub max_columns: u16,
    pub variable_column_count: u16,
    /// Ordered by `number_incl_deleted`
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub real_indexes: Vec<RealIndex>,
    pub var_column_maps: Vec<VarColumnMaps>,
    /// Packed row pointer to the used-pages usage map
    pub used_pages: u32,
    /// Packed row pointer to the free-pages usage map
    pub free_pages: u32,
}

impl Table {
    /// Look a column up by name, ignoring case like Access does
    pub fn column_index(&self, name: &str) -> JetResult<usize> {
        self.column_index_with(name, TableNameComparison::IgnoreCase)
    }

    /// Look a column up by name under an explicit comparison
    pub fn column_index_with(&self, name: &str, comparison: TableNameComparison) -> JetResult<usize> {
        self.columns
            .iter()
            .position(|c| comparison.matches(&c.name, name))
            .ok_or_else(|| JetError::ColumnNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> JetResult<&Column> {
        Ok(&self.columns[self.column_index(name)?])
    }

    pub fn has_variable_columns(&self) -> bool {
        self.variable_column_count > 0
    }

    pub fn is_system(&self) -> bool {
        self.table_type == TableType::System
    }
}
