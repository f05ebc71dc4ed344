//! Block replication: `count`, `for_each` and `dynamic` blocks.
use anyhow::{anyhow, bail, Result};
use hcl::expr::Expression;
use log::warn;

use crate::error::Error;
use crate::frontend::ast::{InstanceKey, SpanTree};
use crate::frontend::core::{self, find_attr};
use crate::frontend::env::EnvVars;
use crate::frontend::value::{Map, Unknown, Value};
use crate::ir::{IdGenerator, NestedBlock, SourceRange};

/// One instance of a top-level block and the iteration bindings it evaluates with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instance {
    pub key: Option<InstanceKey>,
    pub each: Option<(Value, Value)>,
    pub count: Option<Value>,
}

impl Instance {
    pub fn env<'a>(&self, env: &EnvVars<'a>) -> EnvVars<'a> {
        let mut env = env.clone();
        env.each = self.each.clone();
        env.count = self.count.clone();
        env
    }
}

/// Expand `count` / `for_each` of a block body into its instances.
///
/// Unknown or null iteration sources degrade to a single instance whose bindings are
/// unknown.
pub fn instances(body: &hcl::Body, env: &EnvVars) -> Result<Vec<Instance>> {
    let count_attr = find_attr(body, "count");
    let for_each_attr = find_attr(body, "for_each");
    match (count_attr, for_each_attr) {
        (Some(_), Some(_)) => bail!("cannot use both count and for_each on the same block"),
        (Some(attr), None) => count_instances(core::expr_to_value(attr.expr(), env)?),
        (None, Some(attr)) => for_each_instances(core::expr_to_value(attr.expr(), env)?),
        (None, None) => Ok(vec![Instance::default()]),
    }
}

fn count_instances(value: Value) -> Result<Vec<Instance>> {
    let n = match value {
        Value::Unknown(_) | Value::Null => {
            return Ok(vec![Instance {
                count: Some(Unknown::new("count.index", "index").into()),
                ..Instance::default()
            }])
        }
        Value::Number(_) => value.as_i64(),
        Value::String(ref s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let n = n
        .filter(|n| *n >= 0)
        .ok_or_else(|| anyhow!("count must be a non-negative whole number, got {value}"))?;
    Ok((0..n as usize)
        .map(|i| Instance {
            key: Some(InstanceKey::Index(i)),
            each: None,
            count: Some(Value::from(i)),
        })
        .collect())
}

/// Entries of a `for_each` collection ordered by key.
///
/// Maps keep their values; lists and sets must hold strings, which serve as key and value.
pub fn for_each_entries(value: Value) -> Result<Vec<(String, Value)>> {
    let mut entries: Vec<(String, Value)> = match value {
        Value::Map(map) => map.into_iter().collect(),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok((s.clone(), Value::String(s))),
                Value::Number(_) | Value::Bool(_) => {
                    let s = item.to_template_string().map_err(|e| anyhow!(e))?;
                    Ok((s.clone(), Value::String(s)))
                }
                other => bail!(
                    "for_each over a list requires strings, got {}",
                    other.type_name()
                ),
            })
            .collect::<Result<_>>()?,
        other => bail!(
            "for_each requires a map or a set of strings, got {}",
            other.type_name()
        ),
    };
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.dedup_by(|a, b| a.0 == b.0);
    Ok(entries)
}

fn for_each_instances(value: Value) -> Result<Vec<Instance>> {
    if value.is_unknown() || value.is_null() {
        return Ok(vec![Instance {
            each: Some((
                Unknown::new("each.key", "key").into(),
                Unknown::new("each.value", "value").into(),
            )),
            ..Instance::default()
        }]);
    }
    Ok(for_each_entries(value)?
        .into_iter()
        .map(|(key, value)| Instance {
            key: Some(InstanceKey::Key(key.clone())),
            each: Some((Value::from(key), value)),
            count: None,
        })
        .collect())
}

/// Meta-arguments whose value is a list of addresses, rendered as text.
const ADDRESS_ATTRS: &[&str] = &[
    "depends_on",
    "provider",
    "providers",
    "ignore_changes",
    "replace_triggered_by",
];

fn address_value(expr: &Expression) -> Value {
    match expr {
        Expression::Array(items) => Value::List(items.iter().map(address_value).collect()),
        Expression::Object(obj) => Value::Map(
            obj.iter()
                .map(|(k, v)| (k.to_string(), address_value(v)))
                .collect(),
        ),
        Expression::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Settings for evaluating the body of one top-level block instance.
pub struct BodyContext<'a> {
    pub filename: &'a str,
    /// Address attribute failures are reported under.
    pub address: &'a str,
    pub stop_on_error: bool,
    /// Suppress warnings for failures that become unknowns.
    pub quiet: bool,
    pub ids: &'a IdGenerator,
}

/// Attributes and nested blocks of an evaluated body.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EvaluatedBody {
    pub attributes: Map,
    pub blocks: Vec<NestedBlock>,
}

/// Evaluate every attribute of `body` and expand its nested and `dynamic` blocks in
/// declaration order.
///
/// A failing attribute becomes unknown at its own address unless `stop_on_error` is set.
pub fn evaluate_body(
    body: &hcl::Body,
    spans: &SpanTree,
    env: &EnvVars,
    ctx: &BodyContext,
) -> Result<EvaluatedBody> {
    let mut out = EvaluatedBody::default();
    for attr in body.attributes() {
        let key = attr.key();
        let value = if ADDRESS_ATTRS.contains(&key) {
            address_value(attr.expr())
        } else {
            match core::expr_to_value(attr.expr(), env) {
                Ok(v) => v,
                Err(e) if ctx.stop_on_error => {
                    return Err(Error::Evaluation {
                        address: format!("{}.{key}", ctx.address),
                        message: format!("{e:#}"),
                    }
                    .into())
                }
                Err(e) => {
                    if !ctx.quiet {
                        warn!("{}: {}.{key}: {e:#}", ctx.filename, ctx.address);
                    }
                    Unknown::new(format!("{}.{key}", ctx.address), key).into()
                }
            }
        };
        out.attributes.insert(key.to_string(), value);
    }

    let default_spans = SpanTree::default();
    for (i, block) in body.blocks().enumerate() {
        let span = spans.child(i).unwrap_or(&default_spans);
        if block.identifier() == "dynamic" {
            out.blocks.extend(expand_dynamic(block, span, env, ctx)?);
        } else {
            let inner = evaluate_body(block.body(), span, env, ctx)?;
            out.blocks.push(nested_block(
                block.identifier().to_string(),
                block
                    .labels()
                    .iter()
                    .map(|l| l.as_str().to_string())
                    .collect(),
                span,
                inner,
                ctx,
            ));
        }
    }
    Ok(out)
}

fn nested_block(
    identifier: String,
    labels: Vec<String>,
    span: &SpanTree,
    body: EvaluatedBody,
    ctx: &BodyContext,
) -> NestedBlock {
    NestedBlock {
        identifier,
        labels,
        source: SourceRange {
            filename: ctx.filename.to_string(),
            line_start: span.lines.start,
            line_end: span.lines.end,
        },
        attributes: body.attributes,
        blocks: body.blocks,
        id: ctx.ids.next_id(),
    }
}

/// Expand `dynamic "X" { for_each, iterator, labels, content {} }` into `X` blocks that
/// carry the line range of `content`.
///
/// A malformed block or a source that cannot be iterated yields no blocks unless
/// `stop_on_error` is set.
fn expand_dynamic(
    block: &hcl::Block,
    span: &SpanTree,
    env: &EnvVars,
    ctx: &BodyContext,
) -> Result<Vec<NestedBlock>> {
    let skip = |message: String| -> Result<Vec<NestedBlock>> {
        if ctx.stop_on_error {
            return Err(Error::Evaluation {
                address: ctx.address.to_string(),
                message,
            }
            .into());
        }
        if !ctx.quiet {
            warn!("{}: {}: {message}", ctx.filename, ctx.address);
        }
        Ok(Vec::new())
    };
    let Some(identifier) = block.labels().first().map(|l| l.as_str().to_string()) else {
        return skip("dynamic block requires a label".to_string());
    };
    let body = block.body();
    let content_index = body.blocks().position(|b| b.identifier() == "content");
    let (Some(for_each), Some(index)) = (find_attr(body, "for_each"), content_index) else {
        return skip(format!(
            "dynamic \"{identifier}\" requires for_each and content"
        ));
    };
    let Some(content) = body.blocks().nth(index) else {
        return Ok(Vec::new());
    };
    let default_spans = SpanTree::default();
    let content_span = span.child(index).unwrap_or(&default_spans);

    let iterator = match find_attr(body, "iterator").map(|a| a.expr()) {
        Some(Expression::Variable(v)) => v.as_str().to_string(),
        Some(other) => other.to_string(),
        None => identifier.clone(),
    };

    let source = match core::expr_to_value(for_each.expr(), env) {
        Ok(v) => v,
        Err(e) => return skip(format!("dynamic \"{identifier}\": {e:#}")),
    };
    let entries = match source {
        Value::Unknown(_) | Value::Null => Vec::new(),
        Value::Map(map) => {
            let mut entries: Vec<(Value, Value)> =
                map.into_iter().map(|(k, v)| (Value::from(k), v)).collect();
            entries.sort_by(|a, b| a.0.as_str().cmp(&b.0.as_str()));
            entries
        }
        other => match core::collection_entries(other) {
            Ok(entries) => entries,
            Err(e) => return skip(format!("dynamic \"{identifier}\": {e:#}")),
        },
    };

    let mut blocks = Vec::new();
    for (key, value) in entries {
        let mut iteration = Map::new();
        iteration.insert("key".to_string(), key);
        iteration.insert("value".to_string(), value);
        let iter_env = env.with_binding(iterator.as_str(), Value::Map(iteration));
        let labels = match find_attr(body, "labels") {
            Some(attr) => match core::expr_to_value(attr.expr(), &iter_env) {
                Ok(Value::List(items)) => items.iter().filter_map(label_text).collect(),
                Ok(_) => Vec::new(),
                Err(e) => {
                    skip(format!("dynamic \"{identifier}\" labels: {e:#}"))?;
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let inner = evaluate_body(content.body(), content_span, &iter_env, ctx)?;
        blocks.push(nested_block(
            identifier.clone(),
            labels,
            content_span,
            inner,
            ctx,
        ));
    }
    Ok(blocks)
}

/// Text of a dynamic block label. Unknown labels render as the expression they stand for.
fn label_text(value: &Value) -> Option<String> {
    match value {
        Value::Unknown(u) => Some(u.template.clone().unwrap_or_else(|| u.address.clone())),
        other => other.to_template_string().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::builtins::create_function_table;
    use crate::frontend::env::Scope;
    use crate::frontend::parser::parse_file;
    use serde_json::json;
    use std::path::Path;

    fn body_of(src: &str) -> hcl::Body {
        hcl::from_str(src).unwrap()
    }

    fn with_env<T>(f: impl FnOnce(&EnvVars) -> T) -> T {
        let functions = create_function_table(Path::new("."));
        let scope = Scope::new(Path::new("."), Path::new("."));
        let env = EnvVars::new(&scope, &functions);
        f(&env)
    }

    #[test]
    fn count_yields_indexed_instances() {
        let instances = with_env(|env| instances(&body_of("count = 2"), env)).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].key, Some(InstanceKey::Index(1)));
        assert_eq!(instances[1].count, Some(Value::from(1)));
    }

    #[test]
    fn zero_count_yields_nothing() {
        let instances = with_env(|env| instances(&body_of("count = 0"), env)).unwrap();
        assert!(instances.is_empty());
    }

    #[test]
    fn negative_count_is_an_error() {
        assert!(with_env(|env| instances(&body_of("count = -1"), env)).is_err());
    }

    #[test]
    fn for_each_orders_keys_lexicographically() {
        let instances =
            with_env(|env| instances(&body_of("for_each = { b = 2, a = 1, c = 3 }"), env)).unwrap();
        let keys: Vec<_> = instances.iter().map(|i| i.key.clone().unwrap()).collect();
        assert_eq!(
            keys,
            vec![
                InstanceKey::Key("a".into()),
                InstanceKey::Key("b".into()),
                InstanceKey::Key("c".into()),
            ]
        );
        assert_eq!(instances[0].each, Some((Value::from("a"), Value::from(1))));
    }

    #[test]
    fn for_each_over_set_uses_element_as_key_and_value() {
        let instances =
            with_env(|env| instances(&body_of("for_each = toset([\"y\", \"x\", \"y\"])"), env))
                .unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(
            instances[0].each,
            Some((Value::from("x"), Value::from("x")))
        );
    }

    #[test]
    fn unknown_for_each_degrades_to_one_instance() {
        let instances = with_env(|env| instances(&body_of("for_each = var.items"), env)).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].key, None);
        assert!(instances[0].each.as_ref().unwrap().1.is_unknown());
    }

    #[test]
    fn count_and_for_each_conflict() {
        let err = with_env(|env| instances(&body_of("count = 1\nfor_each = {}"), env)).unwrap_err();
        assert!(err.to_string().contains("both count and for_each"));
    }

    const DYNAMIC: &str = r#"resource "some_resource" "this" {
  name = "x"

  static {
    n = 0
  }

  dynamic "loop" {
    for_each = [true, false]
    content {
      other = loop.value
    }
  }

  static {
    n = 1
  }

  dynamic "outer" {
    for_each = { a = ["p", "q"] }
    iterator = o
    content {
      name = o.key
      dynamic "inner" {
        for_each = o.value
        content {
          v = inner.value
        }
      }
    }
  }
}
"#;

    #[test]
    fn dynamic_blocks_interleave_with_static_siblings() {
        let parsed = parse_file(DYNAMIC, "main.tf", Path::new("/m/main.tf")).unwrap();
        let block = &parsed.blocks[0];
        let ids = IdGenerator::new();
        let ctx = BodyContext {
            filename: "main.tf",
            address: "some_resource.this",
            stop_on_error: false,
            quiet: false,
            ids: &ids,
        };
        let body = with_env(|env| evaluate_body(&block.body, &block.spans, env, &ctx)).unwrap();

        let names: Vec<_> = body.blocks.iter().map(|b| b.identifier.as_str()).collect();
        assert_eq!(names, vec!["static", "loop", "loop", "static", "outer"]);

        let loops: Vec<_> = body
            .blocks
            .iter()
            .filter(|b| b.identifier == "loop")
            .collect();
        assert_eq!(loops[0].attributes["other"], Value::Bool(true));
        assert_eq!(loops[1].attributes["other"], Value::Bool(false));
        assert_eq!(
            (loops[0].source.line_start, loops[0].source.line_end),
            (10, 12)
        );

        let outer = &body.blocks[4];
        assert_eq!(outer.attributes["name"], Value::from("a"));
        let inner: Vec<_> = outer
            .blocks
            .iter()
            .map(|b| b.attributes["v"].to_json())
            .collect();
        assert_eq!(inner, vec![json!("p"), json!("q")]);
    }

    #[test]
    fn failing_attributes_become_unknown() {
        let ids = IdGenerator::new();
        let ctx = BodyContext {
            filename: "main.tf",
            address: "x.y",
            stop_on_error: false,
            quiet: false,
            ids: &ids,
        };
        let body = with_env(|env| {
            evaluate_body(
                &body_of("a = 1 + \"x\"\nb = 2"),
                &SpanTree::default(),
                env,
                &ctx,
            )
        })
        .unwrap();
        assert_eq!(
            body.attributes["a"].to_attribute_json(),
            json!({"__attribute__": "x.y.a", "__name__": "a"})
        );
        assert_eq!(body.attributes["b"], Value::from(2));

        let strict = BodyContext {
            stop_on_error: true,
            ..ctx
        };
        assert!(with_env(|env| {
            evaluate_body(
                &body_of("a = 1 + \"x\""),
                &SpanTree::default(),
                env,
                &strict,
            )
        })
        .is_err());
    }

    #[test]
    fn meta_arguments_render_as_addresses() {
        let ids = IdGenerator::new();
        let ctx = BodyContext {
            filename: "main.tf",
            address: "x.y",
            stop_on_error: false,
            quiet: false,
            ids: &ids,
        };
        let body = with_env(|env| {
            evaluate_body(
                &body_of("depends_on = [aws_s3_bucket.a]\nprovider = aws.west"),
                &SpanTree::default(),
                env,
                &ctx,
            )
        })
        .unwrap();
        assert_eq!(
            body.attributes["depends_on"].to_json(),
            json!(["aws_s3_bucket.a"])
        );
        assert_eq!(body.attributes["provider"], Value::from("aws.west"));
    }

    fn expand(src: &str, stop_on_error: bool) -> Result<EvaluatedBody> {
        let ids = IdGenerator::new();
        let ctx = BodyContext {
            filename: "main.tf",
            address: "aws_security_group.sg",
            stop_on_error,
            quiet: true,
            ids: &ids,
        };
        with_env(|env| evaluate_body(&body_of(src), &SpanTree::default(), env, &ctx))
    }

    #[test]
    fn dynamic_sources_that_yield_nothing() {
        for source in ["[]", "{}", "var.ports", "null", "\"abc\"", "42", "true"] {
            let src = format!(
                "name = \"sg\"\ndynamic \"ingress\" {{\n  for_each = {source}\n  content {{\n    a = 1\n  }}\n}}\negress {{\n  b = 2\n}}\n"
            );
            let body = expand(&src, false).unwrap_or_else(|e| panic!("{source}: {e:#}"));
            let names: Vec<_> = body.blocks.iter().map(|b| b.identifier.as_str()).collect();
            assert_eq!(names, vec!["egress"], "{source}");
            assert_eq!(body.attributes["name"], Value::from("sg"));
        }
    }

    #[test]
    fn non_collection_dynamic_source_fails_only_when_stopping() {
        let src = "dynamic \"ingress\" {\n  for_each = \"abc\"\n  content {}\n}\n";
        let err = expand(src, true).unwrap_err();
        assert!(
            format!("{err:#}").contains("cannot iterate over"),
            "{err:#}"
        );
    }

    #[test]
    fn unlabelled_dynamic_block_is_skipped() {
        let src = "dynamic {\n  for_each = [1]\n  content {}\n}\negress {}\n";
        let body = expand(src, false).unwrap();
        assert_eq!(body.blocks.len(), 1);
        assert_eq!(body.blocks[0].identifier, "egress");
        assert!(expand(src, true).is_err());
    }

    #[test]
    fn unknown_dynamic_labels_render_their_address() {
        let src = r#"
dynamic "setting" {
  for_each = ["a", "b"]
  labels   = [setting.value, var.suffix, null]
  content {}
}
"#;
        let body = expand(src, false).unwrap();
        let labels: Vec<_> = body.blocks.iter().map(|b| b.labels.clone()).collect();
        assert_eq!(
            labels,
            vec![
                vec!["a".to_string(), "var.suffix".to_string()],
                vec!["b".to_string(), "var.suffix".to_string()],
            ]
        );
    }

    #[test]
    fn failing_dynamic_labels_drop_only_the_labels() {
        let src = "dynamic \"setting\" {\n  for_each = [\"a\"]\n  labels = [1 + \"x\"]\n  content {\n    v = setting.value\n  }\n}\n";
        let body = expand(src, false).unwrap();
        assert_eq!(body.blocks.len(), 1);
        assert!(body.blocks[0].labels.is_empty());
        assert_eq!(body.blocks[0].attributes["v"], Value::from("a"));
        assert!(expand(src, true).is_err());
    }
}
