//! Page reader layered over a [`PageSource`]
//!
//! Turns page numbers into byte offsets, decrypts keyed pages, checks the
//! page-type tag, and refuses to read once the database has been closed or
//! the cancel token has fired.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::trace;

use crate::error::{JetError, JetResult};
use crate::file_manager::source::PageSource;
use crate::options::CancelToken;
use crate::storage::format::Format;
use crate::storage::page::PageType;
use crate::storage::rc4;

pub struct PageReader<S> {
    source: S,
    format: &'static Format,
    /// Zero when pages are stored in the clear
    db_key: u32,
    cancel: CancelToken,
    closed: AtomicBool,
}

impl<S: PageSource> PageReader<S> {
    pub fn new(source: S, format: &'static Format, db_key: u32, cancel: CancelToken) -> Self {
        PageReader {
            source,
            format,
            db_key,
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> &'static Format {
        self.format
    }

    pub fn page_size(&self) -> usize {
        self.format.page_size
    }

    /// Number of whole pages in the source
    pub fn page_count(&self) -> JetResult<u32> {
        self.check_usable()?;
        Ok((self.source.byte_len()? / self.page_size() as u64) as u32)
    }

    /// Mark the reader closed; later reads fail with [`JetError::Disposed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_usable(&self) -> JetResult<()> {
        if self.is_closed() {
            return Err(JetError::Disposed);
        }
        if self.cancel.is_cancelled() {
            return Err(JetError::Cancelled);
        }
        Ok(())
    }

    fn is_encrypted(&self, page_number: u32) -> bool {
        self.db_key != 0 && page_number != 0
    }

    fn read_raw(&self, page_number: u32, start: usize, buf: &mut [u8]) -> JetResult<()> {
        self.check_usable()?;
        let offset = page_number as u64 * self.page_size() as u64 + start as u64;
        self.source.read_at(offset, buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                JetError::invalid_data(page_number, "page lies beyond the end of the file")
            } else {
                JetError::Io(e)
            }
        })
    }

    fn read_decrypted(&self, page_number: u32) -> JetResult<Vec<u8>> {
        let mut page = vec![0u8; self.page_size()];
        self.read_raw(page_number, 0, &mut page)?;
        if self.is_encrypted(page_number) {
            rc4::apply_in_place(&mut page, &rc4::page_key(self.db_key, page_number));
        }
        Ok(page)
    }

    /// Read a whole page and check its type tag
    pub fn read_page(&self, page_number: u32, expected: PageType) -> JetResult<Bytes> {
        trace!("Reading page {} as {:?}", page_number, expected);
        let page = self.read_decrypted(page_number)?;
        if page[0] != expected as u8 {
            return Err(JetError::WrongPageType {
                page: page_number,
                expected,
                observed: page[0],
            });
        }
        Ok(Bytes::from(page))
    }

    /// Read part of a page without checking its type tag
    ///
    /// Keyed pages are decrypted as a whole, since the keystream starts at
    /// the first byte of the page.
    pub fn read_partial(&self, page_number: u32, range: Range<usize>) -> JetResult<Bytes> {
        if range.start > range.end || range.end > self.page_size() {
            return Err(JetError::InvalidOperation(format!(
                "range {}..{} is outside a {} byte page",
                range.start,
                range.end,
                self.page_size()
            )));
        }

        if self.is_encrypted(page_number) {
            let page = self.read_decrypted(page_number)?;
            return Ok(Bytes::copy_from_slice(&page[range]));
        }

        let mut buf = vec![0u8; range.len()];
        self.read_raw(page_number, range.start, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Type tag of a page
    pub fn page_type(&self, page_number: u32) -> JetResult<PageType> {
        let tag = self.read_partial(page_number, 0..1)?;
        Ok(PageType::from(tag[0]))
    }
}
