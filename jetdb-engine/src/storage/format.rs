//! Per-version byte layouts
//!
//! Jet3 (Access 97) and Jet4 (Access 2000 onward, including every ACE
//! release) differ in page size and in the position of nearly every field.
//! All offsets live here so the parsers never hard-code a version check.
//!
//! Table-definition offsets are relative to the assembled definition buffer,
//! which starts at byte 8 of the first definition page.

use serde::Serialize;
use tracing::warn;

/// Format version byte stored at offset 0x14 of page 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JetVersion {
    /// Access 97
    Jet3,
    /// Access 2000 / 2002 / 2003
    Jet4,
    Access2007,
    Access2010,
    Access2013,
    Access2016,
    /// A version byte this reader does not know; read with the Jet4 layout
    Unknown(u8),
}

impl From<u8> for JetVersion {
    fn from(value: u8) -> Self {
        match value {
            0 => JetVersion::Jet3,
            1 => JetVersion::Jet4,
            2 => JetVersion::Access2007,
            3 => JetVersion::Access2010,
            5 => JetVersion::Access2013,
            6 => JetVersion::Access2016,
            other => JetVersion::Unknown(other),
        }
    }
}

impl JetVersion {
    /// Whether this version uses the Jet3 layout
    pub fn is_jet3(&self) -> bool {
        matches!(self, JetVersion::Jet3)
    }

    /// File format id expected at offset 4 of page 0
    pub fn format_id(&self) -> &'static [u8] {
        match self {
            JetVersion::Jet3 | JetVersion::Jet4 => JET_FORMAT_ID,
            _ => ACE_FORMAT_ID,
        }
    }
}

/// Magic number at offset 0 of page 0
pub const MAGIC: u32 = 0x0000_0100;

/// Format id for Jet3 and Jet4 files
pub const JET_FORMAT_ID: &[u8] = b"Standard Jet DB";

/// Format id for Access 2007 and later
pub const ACE_FORMAT_ID: &[u8] = b"Standard ACE DB";

/// Offset of the format id on page 0
pub const FORMAT_ID_OFFSET: usize = 4;

/// Offset of the version byte on page 0
pub const VERSION_OFFSET: usize = 0x14;

/// Offset of the RC4-obfuscated header region on page 0
pub const ENCRYPTED_HEADER_OFFSET: usize = 0x18;

/// Fixed key used to obfuscate the header region
pub const HEADER_KEY: [u8; 4] = [0xC7, 0xDA, 0x39, 0x6B];

/// Smallest page size; page 0 is always read with this size first
pub const MIN_PAGE_SIZE: usize = 2048;

/// Files shorter than three minimum-size pages cannot hold a catalog
pub const MIN_FILE_SIZE: u64 = 3 * MIN_PAGE_SIZE as u64;

/// Definition page of the system catalog (MSysObjects)
pub const CATALOG_PAGE: u32 = 2;

/// Tag at offset 4 of every long-value page
pub const LVAL_TAG: &[u8; 4] = b"LVAL";

/// Sentinel column number terminating the variable-column pointer records
pub const VAR_COL_SENTINEL: u16 = 0xFFFF;

/// Number of (column, order) pairs in a real-index record
pub const REAL_INDEX_COLUMNS: usize = 10;

/// Fields inside the RC4-obfuscated header region (relative to its start)
#[derive(Debug, Clone, Copy)]
pub struct HeaderLayout {
    pub encrypted_len: usize,
    pub collation: usize,
    pub codepage: usize,
    pub db_key: usize,
    pub password: usize,
    pub password_len: usize,
    pub creation_date: usize,
}

/// Data page header
#[derive(Debug, Clone, Copy)]
pub struct DataPageLayout {
    /// Offset of the 16-bit row count
    pub row_count: usize,
    /// Header size; the row-offset directory starts here
    pub header_size: usize,
}

/// Table-definition record offsets
#[derive(Debug, Clone, Copy)]
pub struct TdefLayout {
    // Table-level fields
    pub num_rows: usize,
    pub next_autonum: usize,
    pub autonum_increment: Option<usize>,
    pub complex_autonum: Option<usize>,
    pub table_type: usize,
    pub max_cols: usize,
    pub num_var_cols: usize,
    pub num_cols: usize,
    pub num_indexes: usize,
    pub num_real_indexes: usize,
    pub used_pages: usize,
    pub free_pages: usize,
    pub cursor_start: usize,

    // First real-index block
    pub real_index1_len: usize,
    pub real_index1_rows: usize,

    // Column record
    pub column_len: usize,
    pub col_type: usize,
    pub col_num_incl_deleted: usize,
    pub col_offset_var: usize,
    pub col_num: usize,
    pub col_misc: usize,
    pub col_flags: usize,
    pub col_offset_fixed: usize,
    pub col_length: usize,

    /// Width of the length prefix in front of column and index names
    pub name_len_size: usize,

    // Second real-index block
    pub real_index2_len: usize,
    pub real_index2_columns: usize,
    pub real_index2_used_pages: usize,
    pub real_index2_first_data: usize,
    pub real_index2_flags: usize,
    /// Flags are a byte on Jet3 and a 16-bit word on Jet4
    pub real_index2_flags_wide: bool,

    // Logical index record
    pub index_len: usize,
    pub index_num: usize,
    pub index_num2: usize,
    pub index_rel_table_type: usize,
    pub index_rel_index_num: usize,
    pub index_rel_table_page: usize,
    pub index_cascade_updates: usize,
    pub index_cascade_deletes: usize,
    pub index_type: usize,
}

/// Variable-column pointer record: column number, used pages, free pages
pub const VAR_COL_RECORD_LEN: usize = 10;

/// Complete layout for one format family
#[derive(Debug, Clone, Copy)]
pub struct Format {
    pub page_size: usize,
    pub header: HeaderLayout,
    pub data: DataPageLayout,
    pub tdef: TdefLayout,
    /// Offset of the definition payload on each definition page
    pub tdef_page_header: usize,
    /// Offset of the bitmap on a usage-bitmap page
    pub usage_bitmap_header: usize,
    /// Offset at which fixed-length column data starts in a row
    pub row_fixed_start: usize,
    /// Width of the column and variable-column counts in a row
    pub row_count_size: usize,
}

impl Format {
    /// Select the layout for a version; unknown versions get the Jet4 layout
    pub fn for_version(version: JetVersion) -> &'static Format {
        match version {
            JetVersion::Jet3 => &JET3,
            JetVersion::Unknown(raw) => {
                warn!(
                    "Unknown JET version byte 0x{:02X}, assuming Jet4 layout",
                    raw
                );
                &JET4
            }
            _ => &JET4,
        }
    }

    /// Number of payload bytes a definition page contributes
    pub fn tdef_payload_per_page(&self) -> usize {
        self.page_size - self.tdef_page_header
    }

    /// Number of pages described by one usage-bitmap page
    pub fn usage_bitmap_capacity(&self) -> usize {
        (self.page_size - self.usage_bitmap_header) * 8
    }

    /// Whether rows and definitions use the narrow Jet3 encodings
    pub fn is_jet3(&self) -> bool {
        self.row_count_size == 1
    }
}

pub static JET3: Format = Format {
    page_size: 2048,
    header: HeaderLayout {
        encrypted_len: 126,
        collation: 0x22,
        codepage: 0x24,
        db_key: 0x26,
        password: 0x2A,
        password_len: 20,
        creation_date: 0x5A,
    },
    data: DataPageLayout {
        row_count: 8,
        header_size: 10,
    },
    tdef: TdefLayout {
        num_rows: 4,
        next_autonum: 8,
        autonum_increment: None,
        complex_autonum: None,
        table_type: 12,
        max_cols: 13,
        num_var_cols: 15,
        num_cols: 17,
        num_indexes: 19,
        num_real_indexes: 23,
        used_pages: 27,
        free_pages: 31,
        cursor_start: 35,

        real_index1_len: 8,
        real_index1_rows: 4,

        column_len: 18,
        col_type: 0,
        col_num_incl_deleted: 1,
        col_offset_var: 3,
        col_num: 5,
        col_misc: 9,
        col_flags: 13,
        col_offset_fixed: 14,
        col_length: 16,

        name_len_size: 1,

        real_index2_len: 39,
        real_index2_columns: 0,
        real_index2_used_pages: 30,
        real_index2_first_data: 34,
        real_index2_flags: 38,
        real_index2_flags_wide: false,

        index_len: 20,
        index_num: 0,
        index_num2: 4,
        index_rel_table_type: 8,
        index_rel_index_num: 9,
        index_rel_table_page: 13,
        index_cascade_updates: 17,
        index_cascade_deletes: 18,
        index_type: 19,
    },
    tdef_page_header: 8,
    usage_bitmap_header: 4,
    row_fixed_start: 1,
    row_count_size: 1,
};

pub static JET4: Format = Format {
    page_size: 4096,
    header: HeaderLayout {
        encrypted_len: 128,
        collation: 0x56,
        codepage: 0x24,
        db_key: 0x26,
        password: 0x2A,
        password_len: 40,
        creation_date: 0x5A,
    },
    data: DataPageLayout {
        row_count: 12,
        header_size: 14,
    },
    tdef: TdefLayout {
        num_rows: 8,
        next_autonum: 12,
        autonum_increment: Some(16),
        complex_autonum: Some(20),
        table_type: 32,
        max_cols: 33,
        num_var_cols: 35,
        num_cols: 37,
        num_indexes: 39,
        num_real_indexes: 43,
        used_pages: 47,
        free_pages: 51,
        cursor_start: 55,

        real_index1_len: 12,
        real_index1_rows: 4,

        column_len: 25,
        col_type: 0,
        col_num_incl_deleted: 5,
        col_offset_var: 7,
        col_num: 9,
        col_misc: 11,
        col_flags: 15,
        col_offset_fixed: 21,
        col_length: 23,

        name_len_size: 2,

        real_index2_len: 52,
        real_index2_columns: 4,
        real_index2_used_pages: 36,
        real_index2_first_data: 40,
        real_index2_flags: 44,
        real_index2_flags_wide: true,

        index_len: 28,
        index_num: 4,
        index_num2: 8,
        index_rel_table_type: 12,
        index_rel_index_num: 13,
        index_rel_table_page: 17,
        index_cascade_updates: 22,
        index_cascade_deletes: 23,
        index_type: 24,
    },
    tdef_page_header: 8,
    usage_bitmap_header: 4,
    row_fixed_start: 2,
    row_count_size: 2,
};
