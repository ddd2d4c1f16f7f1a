//! Page types and the data-page row directory
//!
//! Every page starts with a one-byte type tag. Data pages (and the long-value
//! pages that share their layout) carry a row count followed by a directory
//! of 16-bit row offsets; row regions are packed from the end of the page
//! backwards, so a row ends where the previous row starts.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::error::{JetError, JetResult};
use crate::storage::format::Format;

/// Page type identifiers (first byte of each page)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageType {
    /// Database definition - page 0
    DatabaseDefinition = 0x00,
    /// Data page - rows and long values
    Data = 0x01,
    /// Table definition
    TableDefinition = 0x02,
    /// Intermediate index node
    IntermediateIndex = 0x03,
    /// Leaf index node
    LeafIndex = 0x04,
    /// Usage bitmap page
    UsageBitmap = 0x05,
    /// Unknown page type
    Unknown = 0xFF,
}

impl From<u8> for PageType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => PageType::DatabaseDefinition,
            0x01 => PageType::Data,
            0x02 => PageType::TableDefinition,
            0x03 => PageType::IntermediateIndex,
            0x04 => PageType::LeafIndex,
            0x05 => PageType::UsageBitmap,
            _ => PageType::Unknown,
        }
    }
}

/// Packed (page, row) pointer used by usage maps, long values and overflow rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowPointer {
    pub page: u32,
    pub row: u8,
}

impl RowPointer {
    /// Unpack: page in the upper 24 bits, row in the low byte
    pub fn from_raw(raw: u32) -> Self {
        RowPointer {
            page: raw >> 8,
            row: (raw & 0xFF) as u8,
        }
    }

    pub fn to_raw(&self) -> u32 {
        (self.page << 8) | self.row as u32
    }

    /// Read a pointer stored little-endian at `offset`
    pub fn read(data: &[u8], offset: usize) -> Option<Self> {
        data.get(offset..offset + 4)
            .map(|raw| Self::from_raw(LittleEndian::read_u32(raw)))
    }
}

/// One entry of the row-offset directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSlot(pub u16);

impl RowSlot {
    /// Row holds a pointer to the real row on another page
    pub const OVERFLOW: u16 = 0x8000;
    /// Row has been deleted
    pub const DELETED: u16 = 0x4000;
    /// Remaining bits hold the start offset
    pub const OFFSET_MASK: u16 = 0x1FFF;

    pub fn offset(&self) -> usize {
        (self.0 & Self::OFFSET_MASK) as usize
    }

    pub fn is_overflow(&self) -> bool {
        self.0 & Self::OVERFLOW != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.0 & Self::DELETED != 0
    }
}

/// A data (or long-value) page with its row directory
#[derive(Clone)]
pub struct DataPage {
    page_number: u32,
    data: Bytes,
    header_size: usize,
    row_count: usize,
}

impl DataPage {
    /// Wrap a page that has already been type-checked
    pub fn new(page_number: u32, data: Bytes, format: &Format) -> JetResult<Self> {
        let layout = format.data;
        if data.len() < layout.header_size {
            return Err(JetError::invalid_data(page_number, "data page is truncated"));
        }

        let row_count = LittleEndian::read_u16(&data[layout.row_count..]) as usize;
        let directory_end = layout.header_size + row_count * 2;
        if directory_end > data.len() {
            return Err(JetError::invalid_data(
                page_number,
                format!("row directory of {} rows does not fit the page", row_count),
            ));
        }

        Ok(DataPage {
            page_number,
            data,
            header_size: layout.header_size,
            row_count,
        })
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Raw page bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Directory entry for a row
    pub fn slot(&self, row: usize) -> JetResult<RowSlot> {
        if row >= self.row_count {
            return Err(JetError::invalid_data(
                self.page_number,
                format!("row {} out of range ({} rows)", row, self.row_count),
            ));
        }
        let at = self.header_size + row * 2;
        Ok(RowSlot(LittleEndian::read_u16(&self.data[at..])))
    }

    /// Byte range of a row: from its start to the previous row's start
    pub fn row_range(&self, row: usize) -> JetResult<Range<usize>> {
        let start = self.slot(row)?.offset();
        let end = if row == 0 {
            self.data.len()
        } else {
            self.slot(row - 1)?.offset()
        };

        let directory_end = self.header_size + self.row_count * 2;
        if start < directory_end || start > end || end > self.data.len() {
            return Err(JetError::invalid_data(
                self.page_number,
                format!("row {} spans invalid range {}..{}", row, start, end),
            ));
        }
        Ok(start..end)
    }

    /// Bytes of a row, sharing the page buffer
    pub fn row_bytes(&self, row: usize) -> JetResult<Bytes> {
        let range = self.row_range(row)?;
        Ok(self.data.slice(range))
    }
}

impl std::fmt::Debug for DataPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPage")
            .field("page_number", &self.page_number)
            .field("page_size", &self.data.len())
            .field("row_count", &self.row_count)
            .finish()
    }
}
