//! Parsed, not yet evaluated, configuration blocks.
use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::frontend::value::Value;

/// 1-based inclusive line range of a block in its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// Line ranges of a block and, in declaration order, of every block nested in it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpanTree {
    pub lines: LineRange,
    pub children: Vec<SpanTree>,
}

impl SpanTree {
    pub fn child(&self, index: usize) -> Option<&SpanTree> {
        self.children.get(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Resource {
        r#type: String,
        name: String,
    },
    Data {
        r#type: String,
        name: String,
    },
    Variable {
        name: String,
    },
    Output {
        name: String,
    },
    Module {
        name: String,
    },
    Provider {
        name: String,
    },
    Locals,
    Moved,
    Terraform,
    Other {
        identifier: String,
        labels: Vec<String>,
    },
}

impl BlockKind {
    /// Classify a top-level block, rejecting blocks that miss required labels.
    pub fn from_block(identifier: &str, labels: &[String]) -> Result<Self> {
        let want = |n: usize| -> Result<()> {
            if labels.len() < n {
                bail!(
                    "{identifier} block requires {n} label(s), found {}",
                    labels.len()
                );
            }
            Ok(())
        };
        Ok(match identifier {
            "resource" => {
                want(2)?;
                BlockKind::Resource {
                    r#type: labels[0].clone(),
                    name: labels[1].clone(),
                }
            }
            "data" => {
                want(2)?;
                BlockKind::Data {
                    r#type: labels[0].clone(),
                    name: labels[1].clone(),
                }
            }
            "variable" => {
                want(1)?;
                BlockKind::Variable {
                    name: labels[0].clone(),
                }
            }
            "output" => {
                want(1)?;
                BlockKind::Output {
                    name: labels[0].clone(),
                }
            }
            "module" => {
                want(1)?;
                BlockKind::Module {
                    name: labels[0].clone(),
                }
            }
            "provider" => {
                want(1)?;
                BlockKind::Provider {
                    name: labels[0].clone(),
                }
            }
            "locals" => BlockKind::Locals,
            "moved" => BlockKind::Moved,
            "terraform" => BlockKind::Terraform,
            other => BlockKind::Other {
                identifier: other.to_string(),
                labels: labels.to_vec(),
            },
        })
    }

    pub fn identifier(&self) -> &str {
        match self {
            BlockKind::Resource { .. } => "resource",
            BlockKind::Data { .. } => "data",
            BlockKind::Variable { .. } => "variable",
            BlockKind::Output { .. } => "output",
            BlockKind::Module { .. } => "module",
            BlockKind::Provider { .. } => "provider",
            BlockKind::Locals => "locals",
            BlockKind::Moved => "moved",
            BlockKind::Terraform => "terraform",
            BlockKind::Other { identifier, .. } => identifier,
        }
    }

    /// Key the block is grouped under in the document.
    pub fn type_key(&self) -> &str {
        match self {
            BlockKind::Resource { r#type, .. } | BlockKind::Data { r#type, .. } => r#type,
            other => other.identifier(),
        }
    }

    /// Label reported in block metadata.
    pub fn label(&self) -> Option<String> {
        match self {
            BlockKind::Resource { r#type, .. } | BlockKind::Data { r#type, .. } => {
                Some(r#type.clone())
            }
            BlockKind::Variable { name }
            | BlockKind::Output { name }
            | BlockKind::Module { name }
            | BlockKind::Provider { name } => Some(name.clone()),
            BlockKind::Other { labels, .. } if !labels.is_empty() => Some(labels.join(".")),
            _ => None,
        }
    }

    /// Block kind reported in metadata for typed blocks.
    pub fn meta_type(&self) -> Option<&'static str> {
        match self {
            BlockKind::Resource { .. } => Some("resource"),
            BlockKind::Data { .. } => Some("data"),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            BlockKind::Resource { name, .. }
            | BlockKind::Data { name, .. }
            | BlockKind::Variable { name }
            | BlockKind::Output { name }
            | BlockKind::Module { name }
            | BlockKind::Provider { name } => Some(name),
            _ => None,
        }
    }

    /// Whether the block can carry `count`/`for_each`.
    pub fn is_replicable(&self) -> bool {
        matches!(
            self,
            BlockKind::Resource { .. } | BlockKind::Data { .. } | BlockKind::Module { .. }
        )
    }

    /// Declaration path within the owning module, without instance suffix.
    pub fn address(&self) -> String {
        match self {
            BlockKind::Resource { r#type, name } => format!("{}.{}", r#type, name),
            BlockKind::Data { r#type, name } => format!("data.{}.{}", r#type, name),
            BlockKind::Variable { name } => format!("variable.{name}"),
            BlockKind::Output { name } => format!("output.{name}"),
            BlockKind::Module { name } => format!("module.{name}"),
            BlockKind::Provider { name } => format!("provider.{name}"),
            BlockKind::Locals => "locals".to_string(),
            BlockKind::Moved => "moved".to_string(),
            BlockKind::Terraform => "terraform".to_string(),
            BlockKind::Other { identifier, labels } => {
                let mut parts = vec![identifier.clone()];
                parts.extend(labels.iter().cloned());
                parts.join(".")
            }
        }
    }
}

/// Key of one replicated instance: `count` index or `for_each` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    Index(usize),
    Key(String),
}

impl InstanceKey {
    pub fn to_value(&self) -> Value {
        match self {
            InstanceKey::Index(i) => Value::from(*i),
            InstanceKey::Key(k) => Value::from(k.as_str()),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::Index(i) => write!(f, "[{i}]"),
            InstanceKey::Key(k) => write!(f, "[\"{k}\"]"),
        }
    }
}

/// A top-level block as written in a file.
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub body: hcl::Body,
    /// File path relative to the root directory, `/` separated.
    pub filename: String,
    /// Absolute path of the containing file.
    pub file_path: PathBuf,
    pub spans: SpanTree,
}

impl Block {
    pub fn address(&self) -> String {
        self.kind.address()
    }
}

/// All blocks of one module directory, files ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ModuleSource {
    pub dir: PathBuf,
    pub blocks: Vec<Block>,
}

impl ModuleSource {
    pub fn blocks_of<'a>(
        &'a self,
        pred: impl Fn(&BlockKind) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| pred(&b.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resource_kind_paths() {
        let kind = BlockKind::from_block("resource", &labels(&["aws_s3_bucket", "logs"])).unwrap();
        assert_eq!(kind.type_key(), "aws_s3_bucket");
        assert_eq!(kind.address(), "aws_s3_bucket.logs");
        assert_eq!(kind.label().as_deref(), Some("aws_s3_bucket"));
        assert_eq!(kind.meta_type(), Some("resource"));
    }

    #[test]
    fn data_kind_path_is_prefixed() {
        let kind = BlockKind::from_block("data", &labels(&["aws_region", "current"])).unwrap();
        assert_eq!(kind.address(), "data.aws_region.current");
        assert_eq!(kind.type_key(), "aws_region");
    }

    #[test]
    fn untyped_kinds_group_by_identifier() {
        let kind = BlockKind::from_block("variable", &labels(&["region"])).unwrap();
        assert_eq!(kind.type_key(), "variable");
        assert_eq!(kind.address(), "variable.region");
        assert_eq!(kind.meta_type(), None);

        let locals = BlockKind::from_block("locals", &[]).unwrap();
        assert_eq!(locals.address(), "locals");
        assert_eq!(locals.label(), None);
    }

    #[test]
    fn missing_labels_are_rejected() {
        let err = BlockKind::from_block("resource", &labels(&["x"])).unwrap_err();
        assert!(err.to_string().contains("requires 2 label"));
    }

    #[test]
    fn instance_key_suffixes() {
        assert_eq!(InstanceKey::Index(0).to_string(), "[0]");
        assert_eq!(InstanceKey::Key("a".into()).to_string(), "[\"a\"]");
    }
}
