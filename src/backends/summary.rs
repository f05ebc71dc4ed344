use std::fmt::Write;

use anyhow::Result;

use super::Backend;
use crate::document::Document;

/// One line per block type with its instance count, then the total.
pub struct SummaryBackend;

impl Backend for SummaryBackend {
    fn name(&self) -> &'static str {
        "summary"
    }
    fn file_extension(&self) -> &'static str {
        "txt"
    }
    fn generate(&self, doc: &Document) -> Result<String> {
        let width = doc.types().map(str::len).max().unwrap_or(0);
        let mut out = String::new();
        let mut total = 0;
        for (type_key, blocks) in doc.iter() {
            writeln!(out, "{type_key:<width$}  {}", blocks.len())?;
            total += blocks.len();
        }
        writeln!(out, "{total} block(s)")?;
        Ok(out)
    }
}
