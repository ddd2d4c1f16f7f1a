//! jetdump configuration file
//!
//! ```toml
//! [reader]
//! table_name_comparison = "ordinal"
//! max_long_value_size = 1048576
//!
//! [export]
//! format = "delimited"    # or "json", one object per row
//! delimiter = ";"
//! null_text = "NULL"
//! memo_preview = 200
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use jetdb_engine::ReaderOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reader: ReaderOptions,
    pub export: ExportConfig,
}

/// Row output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Header line, then one delimited line per row
    #[default]
    Delimited,
    /// JSON Lines: one object per row, keyed by column name
    Json,
}

/// How rows are written by `export` and `dump`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub format: ExportFormat,
    pub delimiter: String,
    /// Written in place of NULL
    pub null_text: String,
    pub include_system_tables: bool,
    /// Memo characters shown per cell; 0 prints only the stored length
    pub memo_preview: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            format: ExportFormat::Delimited,
            delimiter: "\t".to_string(),
            null_text: String::new(),
            include_system_tables: false,
            memo_preview: 80,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
