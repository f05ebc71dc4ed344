use anyhow::Result;

use crate::document::Document;

pub mod json;
pub mod summary;

pub trait Backend {
    fn name(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn generate(&self, doc: &Document) -> Result<String>;
}

pub fn get_backend(name: &str) -> Option<Box<dyn Backend>> {
    match name.to_lowercase().as_str() {
        "json" => Some(Box::new(json::JsonBackend)),
        "summary" | "text" => Some(Box::new(summary::SummaryBackend)),
        _ => None,
    }
}
