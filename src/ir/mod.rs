//! Evaluated blocks, ready for reference resolution and document assembly.
use std::cell::Cell;

use serde::Serialize;
use uuid::Uuid;

use crate::frontend::ast::{BlockKind, InstanceKey};
use crate::frontend::value::Map;

/// Where a block was declared.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceRange {
    /// Relative to the root directory, `/` separated.
    pub filename: String,
    pub line_start: usize,
    pub line_end: usize,
}

/// Edge from one top-level block to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub id: String,
    /// Resource or data type, or `module`.
    pub label: String,
    pub name: String,
}

/// A block nested in another block, static or generated by `dynamic`.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedBlock {
    pub identifier: String,
    pub labels: Vec<String>,
    pub source: SourceRange,
    pub attributes: Map,
    pub blocks: Vec<NestedBlock>,
    pub id: String,
}

/// One evaluated instance of a top-level block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    /// Declaration path including the module prefix and instance key,
    /// e.g. `module.net.aws_subnet.a[0]`.
    pub path: String,
    /// Address within the owning module without instance key, e.g. `aws_subnet.a`.
    pub address: String,
    pub key: Option<InstanceKey>,
    pub source: SourceRange,
    pub attributes: Map,
    pub blocks: Vec<NestedBlock>,
    pub references: Vec<Reference>,
    pub id: String,
}

/// Hands out block ids for one invocation.
///
/// Ids are uuid-shaped but sequential, so evaluating the same tree twice yields the same
/// ids.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: Cell<u128>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let n = self.next.get() + 1;
        self.next.set(n);
        Uuid::from_u128(n).hyphenated().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_and_unique() {
        let ids = IdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert_eq!(a, "00000000-0000-0000-0000-000000000001");
        assert_eq!(IdGenerator::new().next_id(), a);
    }
}
