//! Page access for open databases
//!
//! Byte sources and the page reader layered over them.

pub mod reader;
pub mod source;

pub use reader::PageReader;
pub use source::{FactorySource, FileSource, PageSource, SharedStream, UnlockedStream};
