//! Text decoding: codepages and Jet4 compressed Unicode
//!
//! Jet3 stores text in the codepage named by the database header or by the
//! column. Jet4 and later store UTF-16LE, optionally "compressed": a leading
//! `FF FE` marker switches to a scheme where each character is a single
//! byte of the base codepage until a `00` byte toggles to two-byte UTF-16
//! units (and back).

use std::collections::HashMap;

use encoding_rs::{Encoding, WINDOWS_1252};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tracing::warn;

/// Marker that opens a compressed string
pub const COMPRESSED_MARKER: [u8; 2] = [0xFF, 0xFE];

/// Codepage assumed when the header or column names none we can decode
pub const DEFAULT_CODEPAGE: u16 = 1252;

lazy_static! {
    /// Resolved codepages, filled on first use of each number
    static ref CODEPAGES: RwLock<HashMap<u16, &'static Encoding>> = RwLock::new(HashMap::new());
}

/// Resolve a Windows codepage number to an encoding
///
/// Unknown codepages fall back to Windows-1252; the fallback is logged once
/// per codepage number.
pub fn codepage_encoding(codepage: u16) -> &'static Encoding {
    if let Some(encoding) = CODEPAGES.read().get(&codepage).copied() {
        return encoding;
    }

    let encoding = match codepage {
        0 => WINDOWS_1252,
        cp => match codepage::to_encoding(cp) {
            Some(encoding) => encoding,
            None => {
                warn!(
                    "Codepage {} is not supported, decoding text as windows-1252",
                    cp
                );
                WINDOWS_1252
            }
        },
    };

    CODEPAGES.write().insert(codepage, encoding);
    encoding
}

/// How the bytes of a text value map to characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// A single- or multi-byte codepage (Jet3)
    Codepage(&'static Encoding),
    /// Plain UTF-16LE
    Utf16,
    /// Jet4 compressed Unicode over a base codepage
    Compressed(&'static Encoding),
}

impl TextEncoding {
    /// Encoding for a Jet3 codepage number
    pub fn for_codepage(codepage: u16) -> Self {
        TextEncoding::Codepage(codepage_encoding(codepage))
    }

    /// Compressed-Unicode encoding over a codepage number
    pub fn compressed(codepage: u16) -> Self {
        TextEncoding::Compressed(codepage_encoding(codepage))
    }

    /// Decode bytes to a string; unmappable input becomes U+FFFD
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Codepage(encoding) => {
                encoding.decode_without_bom_handling(bytes).0.into_owned()
            }
            TextEncoding::Utf16 => decode_utf16(bytes),
            TextEncoding::Compressed(base) => decode_compressed(bytes, base),
        }
    }

    /// Human readable name
    pub fn name(&self) -> String {
        match self {
            TextEncoding::Codepage(encoding) => encoding.name().to_string(),
            TextEncoding::Utf16 => "UTF-16LE".to_string(),
            TextEncoding::Compressed(base) => format!("compressed UTF-16 ({})", base.name()),
        }
    }
}

impl Serialize for TextEncoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// Decode little-endian UTF-16; a trailing odd byte is replaced
pub fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let mut text = String::from_utf16_lossy(&units);
    if bytes.len() % 2 == 1 {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// Decode Jet4 compressed Unicode
///
/// Input without the `FF FE` marker is plain UTF-16LE.
pub fn decode_compressed(bytes: &[u8], base: &'static Encoding) -> String {
    let body = match bytes.strip_prefix(&COMPRESSED_MARKER) {
        Some(body) => body,
        None => return decode_utf16(bytes),
    };

    let mut units: Vec<u16> = Vec::with_capacity(body.len());
    let mut compressed = true;
    let mut i = 0;

    while i < body.len() {
        if body[i] == 0 {
            compressed = !compressed;
            i += 1;
            continue;
        }

        if compressed {
            let decoded = base.decode_without_bom_handling(&body[i..i + 1]).0;
            let mut chars = decoded.chars();
            let ch = match (chars.next(), chars.next()) {
                (Some(ch), None) => ch,
                _ => char::REPLACEMENT_CHARACTER,
            };
            let mut buf = [0u16; 2];
            units.extend_from_slice(ch.encode_utf16(&mut buf));
            i += 1;
        } else if i + 1 < body.len() {
            units.push(u16::from_le_bytes([body[i], body[i + 1]]));
            i += 2;
        } else {
            units.push(char::REPLACEMENT_CHARACTER as u16);
            i += 1;
        }
    }

    String::from_utf16_lossy(&units)
}
