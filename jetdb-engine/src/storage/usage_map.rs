//! Usage maps: which pages belong to a table
//!
//! The map is a row on a data page, addressed by a packed row pointer from
//! the table definition. Its first byte selects the encoding:
//!
//! - type 0: a start page followed by a bitmap, bit `j` meaning `start + j`
//! - type 1: an array of pointers to usage-bitmap pages, each covering
//!   `(page_size - 4) * 8` pages
//!
//! Enumeration is lazy and uncached; bitmap pages of a type-1 map are read
//! one at a time as the iterator reaches them.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::error::{JetError, JetResult};
use crate::file_manager::reader::PageReader;
use crate::file_manager::source::PageSource;
use crate::storage::page::{DataPage, PageType, RowPointer};

const INLINE_MAP: u8 = 0x00;
const REFERENCE_MAP: u8 = 0x01;

/// Offset of the bitmap in a type-0 map
const INLINE_BITMAP_START: usize = 5;

/// Raw usage-map bytes
#[derive(Debug, Clone)]
pub struct UsageMap {
    blob: Bytes,
    /// Page the map row lives on, for error reports
    page: u32,
}

impl UsageMap {
    pub fn new(blob: Bytes, page: u32) -> JetResult<Self> {
        match blob.first() {
            None => Err(JetError::invalid_data(page, "usage map is empty")),
            Some(&INLINE_MAP) if blob.len() < INLINE_BITMAP_START => {
                Err(JetError::invalid_data(page, "usage map has no start page"))
            }
            Some(&INLINE_MAP) | Some(&REFERENCE_MAP) => Ok(UsageMap { blob, page }),
            Some(&other) => Err(JetError::InvalidUsageMap { map_type: other }),
        }
    }

    pub fn map_type(&self) -> u8 {
        self.blob[0]
    }

    /// Page holding the map row
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Page numbers in map order
    pub fn pages<'a, S: PageSource>(&self, reader: &'a PageReader<S>) -> UsagePages<'a, S> {
        let cursor = if self.map_type() == INLINE_MAP {
            Cursor::Inline {
                start: LittleEndian::read_u32(&self.blob[1..]),
                bit: 0,
            }
        } else {
            Cursor::Reference {
                slot: 0,
                bitmap: None,
            }
        };
        UsagePages {
            reader,
            map: self.clone(),
            cursor,
        }
    }
}

/// Read the usage map a packed row pointer refers to
pub fn read_usage_map<S: PageSource>(reader: &PageReader<S>, raw_pointer: u32) -> JetResult<UsageMap> {
    let pointer = RowPointer::from_raw(raw_pointer);
    let page = reader.read_page(pointer.page, PageType::Data)?;
    let page = DataPage::new(pointer.page, page, reader.format())?;
    UsageMap::new(page.row_bytes(pointer.row as usize)?, pointer.page)
}

struct BitmapPage {
    base: u32,
    bits: Bytes,
    bit: usize,
}

enum Cursor {
    Inline { start: u32, bit: usize },
    Reference { slot: usize, bitmap: Option<BitmapPage> },
    Done,
}

/// Next set bit at or after `*bit`, advancing past it
fn next_set_bit(bits: &[u8], bit: &mut usize) -> Option<usize> {
    while *bit < bits.len() * 8 {
        let j = *bit;
        *bit += 1;
        if bits[j / 8] & (1 << (j % 8)) != 0 {
            return Some(j);
        }
    }
    None
}

/// Page `offset` bits past `base`; a corrupt map can point past `u32::MAX`
fn page_at(base: u32, offset: usize, map_page: u32) -> JetResult<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| {
            JetError::invalid_data(
                map_page,
                format!("usage map entry {} + {} is past the last page number", base, offset),
            )
        })
}

/// Lazy page-number iterator over a [`UsageMap`]
pub struct UsagePages<'a, S> {
    reader: &'a PageReader<S>,
    map: UsageMap,
    cursor: Cursor,
}

impl<S: PageSource> Iterator for UsagePages<'_, S> {
    type Item = JetResult<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let blob = &self.map.blob;
        let map_page = self.map.page;
        loop {
            match &mut self.cursor {
                Cursor::Inline { start, bit } => {
                    let start = *start;
                    match next_set_bit(&blob[INLINE_BITMAP_START..], bit) {
                        Some(j) => {
                            let page = page_at(start, j, map_page);
                            if page.is_err() {
                                self.cursor = Cursor::Done;
                            }
                            return Some(page);
                        }
                        None => {
                            self.cursor = Cursor::Done;
                            return None;
                        }
                    }
                }
                Cursor::Reference { slot, bitmap } => {
                    if let Some(page) = bitmap {
                        if let Some(j) = next_set_bit(&page.bits, &mut page.bit) {
                            let page = page_at(page.base, j, map_page);
                            if page.is_err() {
                                self.cursor = Cursor::Done;
                            }
                            return Some(page);
                        }
                        *bitmap = None;
                    }

                    let at = 1 + *slot * 4;
                    if at + 4 > blob.len() {
                        self.cursor = Cursor::Done;
                        return None;
                    }
                    let index = *slot;
                    *slot += 1;

                    let pointer = LittleEndian::read_u32(&blob[at..]);
                    if pointer == 0 {
                        continue;
                    }

                    let format = self.reader.format();
                    match self.reader.read_page(pointer, PageType::UsageBitmap) {
                        Ok(data) => {
                            let base = match page_at(0, index * format.usage_bitmap_capacity(), map_page) {
                                Ok(base) => base,
                                Err(e) => {
                                    self.cursor = Cursor::Done;
                                    return Some(Err(e));
                                }
                            };
                            *bitmap = Some(BitmapPage {
                                base,
                                bits: data.slice(format.usage_bitmap_header..),
                                bit: 0,
                            });
                        }
                        Err(e) => {
                            self.cursor = Cursor::Done;
                            return Some(Err(e));
                        }
                    }
                }
                Cursor::Done => return None,
            }
        }
    }
}
