//! Long values (Memo and OLE)
//!
//! A Memo or OLE column stores a 12-byte "first data pointer" in the row:
//!
//! ```text
//! [length u32, top two bits are flags][page/row pointer u32][reserved u32][inline data...]
//! ```
//!
//! Flag 0x80 means the data follows inline, flag 0x40 means it fills one row
//! of an LVAL page, and no flag means a chain of LVAL rows where each row
//! starts with the pointer to the next.

use std::collections::HashSet;
use std::io;

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, Bytes};
use tracing::trace;

use crate::error::{JetError, JetResult};
use crate::file_manager::reader::PageReader;
use crate::file_manager::source::PageSource;
use crate::schema::ColumnType;
use crate::storage::format::LVAL_TAG;
use crate::storage::page::{DataPage, PageType, RowPointer};
use crate::storage::text::TextEncoding;

/// Size of the first data pointer in front of inline data
pub const FIRST_POINTER_SIZE: usize = 12;

const LENGTH_MASK: u32 = 0x3FFF_FFFF;
const INLINE_FLAG: u32 = 0x8000_0000;
const SINGLE_PAGE_FLAG: u32 = 0x4000_0000;

/// Offset of the next-row pointer in front of each multi-page chunk
const CHAIN_POINTER_SIZE: usize = 4;

/// Pages worth of buffer reserved up front by `read_to_end`
const PREALLOCATE_PAGES: usize = 16;

/// Where the bytes of a long value live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongValueKind {
    Inline,
    SinglePage,
    MultiPage,
}

/// First data pointer of a Memo or OLE value
#[derive(Debug, Clone, PartialEq)]
pub struct LongValue {
    pointer: Bytes,
    /// Memo text encoding; `None` for OLE
    encoding: Option<TextEncoding>,
}

impl LongValue {
    pub fn new(pointer: Bytes, encoding: Option<TextEncoding>, page: u32) -> JetResult<Self> {
        if pointer.len() < FIRST_POINTER_SIZE {
            return Err(JetError::invalid_data(
                page,
                format!(
                    "long value pointer is {} bytes, {} needed",
                    pointer.len(),
                    FIRST_POINTER_SIZE
                ),
            ));
        }
        Ok(LongValue { pointer, encoding })
    }

    fn header(&self) -> u32 {
        LittleEndian::read_u32(&self.pointer)
    }

    /// Declared length in bytes
    pub fn len(&self) -> usize {
        (self.header() & LENGTH_MASK) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> LongValueKind {
        let header = self.header();
        if header & INLINE_FLAG != 0 {
            LongValueKind::Inline
        } else if header & SINGLE_PAGE_FLAG != 0 {
            LongValueKind::SinglePage
        } else {
            LongValueKind::MultiPage
        }
    }

    /// First LVAL row of a paged value
    pub fn row_pointer(&self) -> RowPointer {
        RowPointer::from_raw(LittleEndian::read_u32(&self.pointer[4..]))
    }

    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    pub fn column_type(&self) -> ColumnType {
        if self.encoding.is_some() {
            ColumnType::Memo
        } else {
            ColumnType::Ole
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ChainState {
    Start,
    Next(RowPointer),
    Done,
}

/// Forward-only reader over one long value
///
/// Single owner: [`LongValueReader::reset`] rewinds to the first data
/// pointer for another pass.
pub struct LongValueReader<'a, S> {
    reader: &'a PageReader<S>,
    value: &'a LongValue,
    max_size: Option<usize>,
    state: ChainState,
    consumed: usize,
    /// Rows of the chain read so far in this pass
    visited: HashSet<RowPointer>,
    /// Unread part of the last chunk, for `io::Read`
    pending: Bytes,
}

impl<'a, S: PageSource> LongValueReader<'a, S> {
    pub fn new(reader: &'a PageReader<S>, value: &'a LongValue, max_size: Option<usize>) -> Self {
        LongValueReader {
            reader,
            value,
            max_size,
            state: ChainState::Start,
            consumed: 0,
            visited: HashSet::new(),
            pending: Bytes::new(),
        }
    }

    /// Bytes returned so far
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Rewind to the start of the value
    pub fn reset(&mut self) {
        self.state = ChainState::Start;
        self.consumed = 0;
        self.visited.clear();
        self.pending = Bytes::new();
    }

    /// Next chunk of the value; empty once the declared length has been read
    pub fn read_next(&mut self) -> JetResult<Bytes> {
        let total = self.value.len();
        let chunk = match (self.state, self.value.kind()) {
            (ChainState::Done, _) => {
                if self.consumed < total {
                    return Err(JetError::invalid_data(
                        self.value.row_pointer().page,
                        format!(
                            "long value chain ends after {} of {} bytes",
                            self.consumed, total
                        ),
                    ));
                }
                return Ok(Bytes::new());
            }
            (ChainState::Start, LongValueKind::Inline) => {
                self.state = ChainState::Done;
                let end = FIRST_POINTER_SIZE + total;
                if end > self.value.pointer.len() {
                    return Err(JetError::invalid_data(
                        self.value.row_pointer().page,
                        format!("inline long value of {} bytes is truncated", total),
                    ));
                }
                self.value.pointer.slice(FIRST_POINTER_SIZE..end)
            }
            (ChainState::Start, LongValueKind::SinglePage) => {
                let pointer = self.value.row_pointer();
                let row = self.lval_row(pointer)?;
                self.state = ChainState::Done;
                if row.len() < total {
                    return Err(JetError::invalid_data(
                        pointer.page,
                        format!("long value row holds {} of {} bytes", row.len(), total),
                    ));
                }
                row.slice(..total)
            }
            (ChainState::Start, LongValueKind::MultiPage) => {
                self.read_link(self.value.row_pointer())?
            }
            (ChainState::Next(pointer), _) => self.read_link(pointer)?,
        };

        self.consumed += chunk.len();
        Ok(chunk)
    }

    /// One row of a multi-page chain; advances the state
    fn read_link(&mut self, pointer: RowPointer) -> JetResult<Bytes> {
        let total = self.value.len();
        if self.consumed >= total {
            self.state = ChainState::Done;
            return Ok(Bytes::new());
        }

        if !self.visited.insert(pointer) {
            return Err(JetError::invalid_data(
                pointer.page,
                format!(
                    "long value chain returns to row {}:{} after {} bytes",
                    pointer.page, pointer.row, self.consumed
                ),
            ));
        }

        let row = self.lval_row(pointer)?;
        if row.len() < CHAIN_POINTER_SIZE {
            return Err(JetError::invalid_data(
                pointer.page,
                "long value row is too short for its next pointer",
            ));
        }
        let next = LittleEndian::read_u32(&row);
        let take = (row.len() - CHAIN_POINTER_SIZE).min(total - self.consumed);
        if take == 0 {
            // Each link must make progress, which bounds the chain by the length
            return Err(JetError::invalid_data(
                pointer.page,
                "long value row holds no data",
            ));
        }

        self.state = if next == 0 {
            ChainState::Done
        } else {
            ChainState::Next(RowPointer::from_raw(next))
        };
        Ok(row.slice(CHAIN_POINTER_SIZE..CHAIN_POINTER_SIZE + take))
    }

    fn lval_row(&self, pointer: RowPointer) -> JetResult<Bytes> {
        trace!("Reading long value row {}:{}", pointer.page, pointer.row);
        let data = self.reader.read_page(pointer.page, PageType::Data)?;
        if &data[4..8] != LVAL_TAG {
            return Err(JetError::invalid_data(
                pointer.page,
                format!("expected LVAL tag, found {:02X?}", &data[4..8]),
            ));
        }
        DataPage::new(pointer.page, data, self.reader.format())?.row_bytes(pointer.row as usize)
    }

    /// Materialize the whole value
    ///
    /// Fails if part of the value has already been read, and with
    /// [`JetError::Overflow`] if the value is larger than the configured cap.
    pub fn read_to_end(&mut self) -> JetResult<Vec<u8>> {
        if self.consumed > 0 || !matches!(self.state, ChainState::Start) {
            return Err(JetError::InvalidOperation(
                "long value has already been partially read; reset it first".into(),
            ));
        }

        let total = self.value.len();
        if let Some(limit) = self.max_size {
            if total > limit {
                return Err(JetError::Overflow {
                    actual: total,
                    limit,
                });
            }
        }

        // The declared length is untrusted until the chain has been walked
        let mut out = Vec::with_capacity(total.min(self.reader.page_size() * PREALLOCATE_PAGES));
        loop {
            let chunk = self.read_next()?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Materialize a Memo and decode it with its column encoding
    pub fn read_text(&mut self) -> JetResult<String> {
        let encoding = self.value.encoding().ok_or(JetError::InvalidCast {
            column_type: ColumnType::Ole,
            requested: "string",
        })?;
        Ok(encoding.decode(&self.read_to_end()?))
    }
}

impl<S: PageSource> io::Read for LongValueReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            self.pending = self.read_next().map_err(io::Error::other)?;
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}
