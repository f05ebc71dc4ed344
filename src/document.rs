//! JSON projection of evaluated blocks.
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::ir::{Block, NestedBlock, SourceRange};

/// Blocks grouped by type key, in order of first occurrence.
///
/// Resources and data sources group under their type label (`aws_s3_bucket`), every other
/// block under its identifier (`variable`, `module`, `locals`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Document(IndexMap<String, Vec<Json>>);

impl Document {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        let mut groups: IndexMap<String, Vec<Json>> = IndexMap::new();
        for block in blocks {
            groups
                .entry(block.kind.type_key().to_string())
                .or_default()
                .push(block_json(block));
        }
        Document(groups)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, type_key: &str) -> Option<&[Json]> {
        self.0.get(type_key).map(Vec::as_slice)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Json])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Keep only the groups `keep` accepts.
    pub fn filter(&self, keep: impl Fn(&str) -> bool) -> Document {
        Document(
            self.0
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn to_json(&self) -> Json {
        Json::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Json::Array(v.clone())))
                .collect(),
        )
    }
}

fn source_meta(source: &SourceRange) -> JsonMap<String, Json> {
    let mut meta = JsonMap::new();
    meta.insert("filename".into(), json!(source.filename));
    meta.insert("line_start".into(), json!(source.line_start));
    meta.insert("line_end".into(), json!(source.line_end));
    meta
}

fn block_json(block: &Block) -> Json {
    let mut object = attributes_json(&block.attributes);
    insert_nested(&mut object, &block.blocks);
    object.insert("id".into(), json!(block.id));

    let mut meta = source_meta(&block.source);
    if let Some(label) = block.kind.label() {
        meta.insert("label".into(), json!(label));
    }
    meta.insert("path".into(), json!(block.path));
    if let Some(kind) = block.kind.meta_type() {
        meta.insert("type".into(), json!(kind));
    }
    if !block.references.is_empty() {
        meta.insert("references".into(), json!(block.references));
    }
    object.insert("__tfmeta".into(), Json::Object(meta));
    Json::Object(object)
}

fn nested_json(block: &NestedBlock) -> Json {
    let mut object = attributes_json(&block.attributes);
    insert_nested(&mut object, &block.blocks);
    object.insert("id".into(), json!(block.id));

    let mut meta = source_meta(&block.source);
    if !block.labels.is_empty() {
        meta.insert("label".into(), json!(block.labels.join(".")));
    }
    object.insert("__tfmeta".into(), Json::Object(meta));
    Json::Object(object)
}

fn attributes_json(attributes: &crate::frontend::value::Map) -> JsonMap<String, Json> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.to_attribute_json()))
        .collect()
}

/// A single occurrence of a nested block type is an object, several are an array.
fn insert_nested(object: &mut JsonMap<String, Json>, blocks: &[NestedBlock]) {
    let mut grouped: IndexMap<&str, Vec<Json>> = IndexMap::new();
    for block in blocks {
        grouped
            .entry(block.identifier.as_str())
            .or_default()
            .push(nested_json(block));
    }
    for (identifier, mut items) in grouped {
        let value = if items.len() == 1 {
            items.remove(0)
        } else {
            Json::Array(items)
        };
        object.insert(identifier.to_string(), value);
    }
}
