//! Reference graph between the top-level blocks of one module.
use hcl::expr::{Expression, ObjectKey, TraversalOperator};
use hcl::template::{Directive, Element, Template};

use crate::frontend::ast::{self, BlockKind};
use crate::frontend::core::{find_attr, literal_instance_key};
use crate::frontend::value::{BlockTarget, Value};
use crate::ir::{self, NestedBlock, Reference};

/// Roots that never address a block.
const RESERVED_ROOTS: &[&str] = &["var", "local", "each", "count", "path", "terraform", "self"];

fn get_attr(op: Option<&TraversalOperator>) -> Option<&str> {
    match op? {
        TraversalOperator::GetAttr(name) => Some(name.as_str()),
        _ => None,
    }
}

fn traversal_target(root: &str, ops: &[TraversalOperator]) -> Option<BlockTarget> {
    match root {
        "module" => {
            let name = get_attr(ops.first())?;
            Some(BlockTarget::module(name).with_key(literal_instance_key(ops.get(1))))
        }
        "data" => {
            let r#type = get_attr(ops.first())?;
            let name = get_attr(ops.get(1))?;
            Some(BlockTarget::data(r#type, name).with_key(literal_instance_key(ops.get(2))))
        }
        root if RESERVED_ROOTS.contains(&root) => None,
        r#type => {
            let name = get_attr(ops.first())?;
            Some(BlockTarget::resource(r#type, name).with_key(literal_instance_key(ops.get(1))))
        }
    }
}

/// Names bound by enclosing `for` expressions and `dynamic` iterators.
type Bound = Vec<String>;

/// Block addresses written in an expression, in source order.
fn expression_targets(expr: &Expression, bound: &mut Bound, out: &mut Vec<BlockTarget>) {
    match expr {
        Expression::Traversal(tr) => {
            match &tr.expr {
                Expression::Variable(v) if bound.iter().any(|b| b == v.as_str()) => {}
                Expression::Variable(v) => out.extend(traversal_target(v.as_str(), &tr.operators)),
                other => expression_targets(other, bound, out),
            }
            for op in &tr.operators {
                if let TraversalOperator::Index(index) = op {
                    expression_targets(index, bound, out);
                }
            }
        }
        Expression::Array(items) => items.iter().for_each(|e| expression_targets(e, bound, out)),
        Expression::Object(obj) => {
            for (key, value) in obj.iter() {
                if let ObjectKey::Expression(k) = key {
                    expression_targets(k, bound, out);
                }
                expression_targets(value, bound, out);
            }
        }
        Expression::TemplateExpr(t) => {
            if let Ok(template) = Template::from_expr(t) {
                template_targets(&template, bound, out);
            }
        }
        Expression::FuncCall(call) => call
            .args
            .iter()
            .for_each(|e| expression_targets(e, bound, out)),
        Expression::Parenthesis(inner) => expression_targets(inner, bound, out),
        Expression::Conditional(c) => {
            expression_targets(&c.cond_expr, bound, out);
            expression_targets(&c.true_expr, bound, out);
            expression_targets(&c.false_expr, bound, out);
        }
        Expression::Operation(op) => match op.as_ref() {
            hcl::expr::Operation::Unary(u) => expression_targets(&u.expr, bound, out),
            hcl::expr::Operation::Binary(b) => {
                expression_targets(&b.lhs_expr, bound, out);
                expression_targets(&b.rhs_expr, bound, out);
            }
        },
        Expression::ForExpr(fe) => {
            expression_targets(&fe.collection_expr, bound, out);
            let depth = bound.len();
            bound.extend(fe.key_var.iter().map(|k| k.to_string()));
            bound.push(fe.value_var.to_string());
            if let Some(k) = &fe.key_expr {
                expression_targets(k, bound, out);
            }
            expression_targets(&fe.value_expr, bound, out);
            if let Some(c) = &fe.cond_expr {
                expression_targets(c, bound, out);
            }
            bound.truncate(depth);
        }
        _ => {}
    }
}

fn template_targets(template: &Template, bound: &mut Bound, out: &mut Vec<BlockTarget>) {
    for element in template.elements() {
        match element {
            Element::Literal(_) => {}
            Element::Interpolation(i) => expression_targets(&i.expr, bound, out),
            Element::Directive(dir) => match &**dir {
                Directive::If(d) => {
                    expression_targets(&d.cond_expr, bound, out);
                    template_targets(&d.true_template, bound, out);
                    if let Some(f) = &d.false_template {
                        template_targets(f, bound, out);
                    }
                }
                Directive::For(d) => {
                    expression_targets(&d.collection_expr, bound, out);
                    let depth = bound.len();
                    bound.extend(d.key_var.iter().map(|k| k.to_string()));
                    bound.push(d.value_var.to_string());
                    template_targets(&d.template, bound, out);
                    bound.truncate(depth);
                }
            },
        }
    }
}

/// Name a `dynamic` block binds for its `content` and `labels`.
fn dynamic_iterator(block: &hcl::Block) -> Option<String> {
    match find_attr(block.body(), "iterator").map(|a| a.expr()) {
        Some(Expression::Variable(v)) => Some(v.to_string()),
        Some(_) => None,
        None => block.labels().first().map(|l| l.as_str().to_string()),
    }
}

fn body_targets(body: &hcl::Body, bound: &mut Bound, out: &mut Vec<BlockTarget>) {
    for attr in body.attributes() {
        expression_targets(attr.expr(), bound, out);
    }
    for block in body.blocks() {
        if block.identifier() != "dynamic" {
            body_targets(block.body(), bound, out);
            continue;
        }
        if let Some(for_each) = find_attr(block.body(), "for_each") {
            expression_targets(for_each.expr(), bound, out);
        }
        let depth = bound.len();
        bound.extend(dynamic_iterator(block));
        for attr in block.body().attributes().filter(|a| a.key() != "for_each") {
            expression_targets(attr.expr(), bound, out);
        }
        for inner in block.body().blocks() {
            body_targets(inner.body(), bound, out);
        }
        bound.truncate(depth);
    }
}

fn nested_unknown_targets(blocks: &[NestedBlock], out: &mut Vec<BlockTarget>) {
    for block in blocks {
        for value in block.attributes.values() {
            value_targets(value, out);
        }
        nested_unknown_targets(&block.blocks, out);
    }
}

fn value_targets(value: &Value, out: &mut Vec<BlockTarget>) {
    value.for_each_unknown(&mut |u| out.extend(u.target.clone()));
}

/// Reference candidates of one evaluated block: addresses written in its source, then
/// unknown values that point at a block.
pub fn candidates(source: &ast::Block, block: &ir::Block) -> Vec<BlockTarget> {
    let mut out = Vec::new();
    body_targets(&source.body, &mut Bound::new(), &mut out);
    for value in block.attributes.values() {
        value_targets(value, &mut out);
    }
    nested_unknown_targets(&block.blocks, &mut out);
    out
}

fn matches_target(kind: &BlockKind, target: &BlockTarget) -> bool {
    use crate::frontend::value::TargetKind;
    match (kind, target.kind) {
        (BlockKind::Resource { r#type, name }, TargetKind::Resource)
        | (BlockKind::Data { r#type, name }, TargetKind::Data) => {
            *r#type == target.label && *name == target.name
        }
        (BlockKind::Module { name }, TargetKind::Module) => *name == target.name,
        _ => false,
    }
}

/// Resolve `targets` against the blocks of the module.
///
/// A literal instance key selects that instance; otherwise, or when no instance carries
/// the key, every instance of the addressed block is referenced. Duplicates and
/// references to `self_id` are dropped.
pub fn resolve(targets: &[BlockTarget], blocks: &[ir::Block], self_id: &str) -> Vec<Reference> {
    let mut refs: Vec<Reference> = Vec::new();
    for target in targets {
        let instances: Vec<&ir::Block> = blocks
            .iter()
            .filter(|b| matches_target(&b.kind, target))
            .collect();
        let keyed: Vec<&ir::Block> = match &target.key {
            Some(key) => instances
                .iter()
                .copied()
                .filter(|b| b.key.as_ref() == Some(key))
                .collect(),
            None => Vec::new(),
        };
        let selected = if keyed.is_empty() { instances } else { keyed };
        for block in selected {
            if block.id == self_id || refs.iter().any(|r| r.id == block.id) {
                continue;
            }
            refs.push(Reference {
                id: block.id.clone(),
                label: target.label.clone(),
                name: target.name.clone(),
            });
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::InstanceKey;
    use crate::frontend::value::Map;
    use crate::ir::SourceRange;

    fn targets_of(src: &str) -> Vec<BlockTarget> {
        let body: hcl::Body = hcl::from_str(src).unwrap();
        let mut out = Vec::new();
        body_targets(&body, &mut Bound::new(), &mut out);
        out
    }

    fn block(kind: BlockKind, key: Option<InstanceKey>, id: &str) -> ir::Block {
        ir::Block {
            address: kind.address(),
            path: kind.address(),
            kind,
            key,
            source: SourceRange::default(),
            attributes: Map::new(),
            blocks: Vec::new(),
            references: Vec::new(),
            id: id.to_string(),
        }
    }

    fn bucket(name: &str) -> BlockKind {
        BlockKind::Resource {
            r#type: "aws_s3_bucket".into(),
            name: name.into(),
        }
    }

    #[test]
    fn collects_addresses_from_all_expression_forms() {
        let targets = targets_of(
            r#"
            bucket = aws_s3_bucket.logs.id
            name   = "${data.aws_region.current.name}-x"
            ids    = [for s in aws_subnet.a : s.id]
            vpc    = module.network.vpc_id
            tags   = merge(var.tags, { env = local.env })
            nested {
              target = aws_s3_bucket.sample[0].arn
            }
            "#,
        );
        let refs: Vec<String> = targets.iter().map(BlockTarget::reference).collect();
        assert_eq!(
            refs,
            vec![
                "aws_s3_bucket.logs",
                "aws_region.current",
                "aws_subnet.a",
                "module.network",
                "aws_s3_bucket.sample",
            ]
        );
        assert_eq!(targets[4].key, Some(InstanceKey::Index(0)));
    }

    #[test]
    fn bound_names_are_not_block_addresses() {
        let targets = targets_of(
            r#"
            names = { for k, s in aws_subnet.a : k => s.id if s.public }
            text  = "%{ for u in aws_iam_user.all }${u.name}%{ endfor }"
            nested = [for x in [1] : [for y in x.items : y.v]]
            dynamic "ingress" {
              for_each = aws_security_group.base.rules
              labels   = [ingress.key]
              content {
                port = ingress.value.port
                cidr = aws_vpc.main.cidr_block
              }
            }
            dynamic "egress" {
              for_each = var.rules
              iterator = rule
              content {
                port = rule.value
              }
            }
            "#,
        );
        let refs: Vec<String> = targets.iter().map(BlockTarget::reference).collect();
        assert_eq!(
            refs,
            vec![
                "aws_subnet.a",
                "aws_iam_user.all",
                "aws_security_group.base",
                "aws_vpc.main",
            ]
        );
    }

    #[test]
    fn resolves_instances_deduplicated_without_self() {
        let blocks = vec![
            block(bucket("a"), Some(InstanceKey::Index(0)), "1"),
            block(bucket("a"), Some(InstanceKey::Index(1)), "2"),
            block(bucket("b"), None, "3"),
        ];
        let targets = vec![
            BlockTarget::resource("aws_s3_bucket", "a"),
            BlockTarget::resource("aws_s3_bucket", "a").with_key(Some(InstanceKey::Index(1))),
            BlockTarget::resource("aws_s3_bucket", "b"),
            BlockTarget::resource("aws_s3_bucket", "missing"),
        ];
        let refs = resolve(&targets, &blocks, "3");
        let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(refs[0].label, "aws_s3_bucket");
        assert_eq!(refs[0].name, "a");
    }

    #[test]
    fn literal_key_selects_one_instance() {
        let blocks = vec![
            block(bucket("a"), Some(InstanceKey::Key("x".into())), "1"),
            block(bucket("a"), Some(InstanceKey::Key("y".into())), "2"),
        ];
        let targets = vec![BlockTarget::resource("aws_s3_bucket", "a")
            .with_key(Some(InstanceKey::Key("y".into())))];
        let refs = resolve(&targets, &blocks, "0");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "2");
    }

    #[test]
    fn module_references_use_module_label() {
        let blocks = vec![block(BlockKind::Module { name: "net".into() }, None, "7")];
        let refs = resolve(&[BlockTarget::module("net")], &blocks, "0");
        assert_eq!(refs[0].label, "module");
        assert_eq!(refs[0].name, "net");
    }
}
