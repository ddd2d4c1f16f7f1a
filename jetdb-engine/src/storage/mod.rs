//! Storage layer for the JET page format
//!
//! This module handles the low-level binary format of Access files:
//! - Per-version layouts and the header page
//! - RC4 page decryption and text decoding
//! - Table definitions and usage maps
//! - Row cracking, long values and value decoding

pub mod format;
pub mod header;
pub mod lval;
pub mod page;
pub mod rc4;
pub mod row;
pub mod tdef;
pub mod text;
pub mod usage_map;
pub mod value;

pub use format::{Format, JetVersion};
pub use page::{DataPage, PageType, RowPointer};
pub use text::TextEncoding;
pub use usage_map::UsageMap;
