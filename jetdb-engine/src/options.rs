//! Reader configuration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;

/// How table names are compared when looking a table up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableNameComparison {
    /// Exact, byte-for-byte comparison
    Ordinal,
    /// Case-insensitive comparison (Access itself ignores case)
    #[default]
    IgnoreCase,
}

impl TableNameComparison {
    pub fn matches(&self, a: &str, b: &str) -> bool {
        match self {
            TableNameComparison::Ordinal => a == b,
            TableNameComparison::IgnoreCase => a.to_lowercase() == b.to_lowercase(),
        }
    }
}

/// Cooperative cancellation flag, checked before every page read
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options applied when opening a database
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Table lookup comparison
    pub table_name_comparison: TableNameComparison,
    /// Largest long value (memo/OLE) that may be materialized in memory
    pub max_long_value_size: Option<usize>,
    /// Largest table definition accepted before the chain is treated as corrupt
    pub max_table_definition_size: usize,
    /// Cancellation signal
    #[serde(skip)]
    pub cancel: CancelToken,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            table_name_comparison: TableNameComparison::IgnoreCase,
            max_long_value_size: None,
            max_table_definition_size: 16 * 1024 * 1024,
            cancel: CancelToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_comparison() {
        assert!(TableNameComparison::IgnoreCase.matches("Customers", "CUSTOMERS"));
        assert!(!TableNameComparison::Ordinal.matches("Customers", "CUSTOMERS"));
        assert!(TableNameComparison::Ordinal.matches("Orders", "Orders"));
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
