//! Database header (page 0)
//!
//! Page 0 holds the magic number, the format id, the version byte and an
//! RC4-obfuscated region with collation, codepage, database key and creation
//! date. Only the first 2048 bytes are needed, whatever the page size.

use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{JetError, JetResult};
use crate::storage::format::{
    Format, JetVersion, ENCRYPTED_HEADER_OFFSET, FORMAT_ID_OFFSET, HEADER_KEY, JET_FORMAT_ID,
    ACE_FORMAT_ID, MAGIC, MIN_PAGE_SIZE, VERSION_OFFSET,
};
use crate::storage::rc4;
use crate::storage::text::TextEncoding;
use crate::storage::value::ole_date;

/// Immutable facts read from page 0
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHeader {
    pub version: JetVersion,
    pub page_size: usize,
    pub collation: u16,
    pub codepage: u16,
    /// Encoding for text stored in this database
    pub encoding: TextEncoding,
    /// Zero when pages are not encrypted
    pub db_key: u32,
    /// Password bytes as stored (still masked)
    #[serde(skip)]
    pub password: Vec<u8>,
    pub creation_date: Option<NaiveDateTime>,
}

impl DatabaseHeader {
    /// Parse the first 2048 bytes of the file
    pub fn parse(page: &[u8]) -> JetResult<Self> {
        if page.len() < MIN_PAGE_SIZE {
            return Err(JetError::NotJetDatabase("header page is truncated".into()));
        }

        if LittleEndian::read_u32(page) != MAGIC {
            return Err(JetError::NotJetDatabase("missing magic number".into()));
        }

        let version = JetVersion::from(page[VERSION_OFFSET]);
        let format = Format::for_version(version);

        let format_id = &page[FORMAT_ID_OFFSET..FORMAT_ID_OFFSET + JET_FORMAT_ID.len()];
        let id_ok = match version {
            JetVersion::Unknown(_) => format_id == JET_FORMAT_ID || format_id == ACE_FORMAT_ID,
            known => format_id == known.format_id(),
        };
        if !id_ok {
            return Err(JetError::NotJetDatabase("invalid file format id".into()));
        }

        let layout = format.header;
        let mut region =
            page[ENCRYPTED_HEADER_OFFSET..ENCRYPTED_HEADER_OFFSET + layout.encrypted_len].to_vec();
        rc4::apply_in_place(&mut region, &HEADER_KEY);

        let collation = LittleEndian::read_u16(&region[layout.collation..]);
        let codepage = LittleEndian::read_u16(&region[layout.codepage..]);
        let db_key = LittleEndian::read_u32(&region[layout.db_key..]);
        let password = region[layout.password..layout.password + layout.password_len].to_vec();
        let creation_date = ole_date(LittleEndian::read_f64(&region[layout.creation_date..]));

        let encoding = if format.is_jet3() {
            TextEncoding::for_codepage(codepage)
        } else {
            TextEncoding::compressed(codepage)
        };

        Ok(DatabaseHeader {
            version,
            page_size: format.page_size,
            collation,
            codepage,
            encoding,
            db_key,
            password,
            creation_date,
        })
    }

    /// Byte layout for this database
    pub fn format(&self) -> &'static Format {
        match self.version {
            JetVersion::Jet3 => &crate::storage::format::JET3,
            _ => &crate::storage::format::JET4,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.db_key != 0
    }
}
