use anyhow::Result;

use super::Backend;
use crate::document::Document;

pub struct JsonBackend;

impl Backend for JsonBackend {
    fn name(&self) -> &'static str {
        "json"
    }
    fn file_extension(&self) -> &'static str {
        "json"
    }
    fn generate(&self, doc: &Document) -> Result<String> {
        let mut out = serde_json::to_string_pretty(doc)?;
        out.push('\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_an_empty_object() {
        assert_eq!(JsonBackend.generate(&Document::default()).unwrap(), "{}\n");
    }
}
