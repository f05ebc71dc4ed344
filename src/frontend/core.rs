use anyhow::{anyhow, bail, Context, Result};
use hcl::expr::{
    BinaryOperator, Conditional, Expression, ForExpr, FuncCall, ObjectKey, Operation, TemplateExpr,
    Traversal, TraversalOperator, UnaryOperator,
};
use hcl::template::{Directive, Element, Template};

use crate::frontend::ast::InstanceKey;
use crate::frontend::env::EnvVars;
use crate::frontend::value::{values_equal, BlockTarget, Map, Unknown, Value};

pub fn expr_to_value(expr: &Expression, env: &EnvVars) -> Result<Value> {
    match expr {
        Expression::Null => Ok(Value::Null),
        Expression::Bool(b) => Ok(Value::Bool(*b)),
        Expression::Number(n) => Ok(Value::Number(n.clone())),
        Expression::String(s) => Ok(Value::String(s.clone())),
        Expression::Array(items) => items
            .iter()
            .map(|e| expr_to_value(e, env))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Expression::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj.iter() {
                let key = match object_key(k, env)? {
                    Ok(key) => key,
                    Err(unknown) => return Ok(Value::Unknown(unknown)),
                };
                map.insert(key, expr_to_value(v, env)?);
            }
            Ok(Value::Map(map))
        }
        Expression::TemplateExpr(t) => eval_template(t, env),
        Expression::Variable(v) => resolve_variable(v.as_str(), env),
        Expression::Traversal(t) => resolve_traversal(t, env),
        Expression::FuncCall(call) => eval_func_call(call, env),
        Expression::Parenthesis(inner) => expr_to_value(inner, env),
        Expression::Conditional(c) => eval_conditional(c, env),
        Expression::Operation(op) => eval_operation(op, env),
        Expression::ForExpr(fe) => eval_for_expr(fe, env),
        #[allow(unreachable_patterns)]
        other => bail!("unsupported expression: {other}"),
    }
}

/// Evaluate to a string, failing on unknowns.
pub fn expr_to_string(expr: &Expression, env: &EnvVars) -> Result<String> {
    match expr_to_value(expr, env)? {
        Value::Unknown(u) => bail!("value of {} is not known", u.address),
        other => other.to_template_string().map_err(|e| anyhow!(e)),
    }
}

pub fn find_attr<'a>(body: &'a hcl::Body, name: &str) -> Option<&'a hcl::Attribute> {
    body.attributes().find(|a| a.key() == name)
}

pub fn get_attr_string(body: &hcl::Body, name: &str, env: &EnvVars) -> Result<Option<String>> {
    Ok(match find_attr(body, name) {
        Some(attr) => Some(
            expr_to_string(attr.expr(), env)
                .with_context(|| format!("evaluating attribute '{name}'"))?,
        ),
        None => None,
    })
}

/// Object keys evaluate to strings; an unknown key makes the whole object unknown.
fn object_key(key: &ObjectKey, env: &EnvVars) -> Result<std::result::Result<String, Unknown>> {
    let value = match key {
        ObjectKey::Identifier(id) => return Ok(Ok(id.as_str().to_string())),
        ObjectKey::Expression(Expression::Variable(v)) => return Ok(Ok(v.as_str().to_string())),
        ObjectKey::Expression(expr) => expr_to_value(expr, env)?,
        #[allow(unreachable_patterns)]
        _ => bail!("unsupported object key"),
    };
    match value {
        Value::Unknown(u) => Ok(Err(u)),
        other => other
            .to_template_string()
            .map(Ok)
            .map_err(|e| anyhow!("invalid object key: {e}")),
    }
}

/// Entries of a collection as (key, value) pairs: list index or map key.
pub fn collection_entries(value: Value) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::List(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), v))
            .collect()),
        Value::Map(map) => Ok(map.into_iter().map(|(k, v)| (Value::from(k), v)).collect()),
        other => bail!("cannot iterate over {}", other.type_name()),
    }
}

fn eval_template(expr: &TemplateExpr, env: &EnvVars) -> Result<Value> {
    let template = Template::from_expr(expr)?;

    // A lone interpolation yields the interpolated value itself.
    if let [Element::Interpolation(interp)] = template.elements() {
        return expr_to_value(&interp.expr, env);
    }

    render_template_value(&template, &expr.to_string(), env)
}

/// Render a whole template. An unknown interpolation yields an unknown carrying `raw`.
pub fn render_template_value(template: &Template, raw: &str, env: &EnvVars) -> Result<Value> {
    let mut out = String::new();
    match render_template(template, env, &mut out)? {
        None => Ok(Value::String(out)),
        Some(unknown) => Ok(Value::Unknown(unknown.with_template(raw))),
    }
}

/// Render `template` into `out`, stopping at the first unknown it meets.
fn render_template(
    template: &Template,
    env: &EnvVars,
    out: &mut String,
) -> Result<Option<Unknown>> {
    for element in template.elements() {
        match element {
            Element::Literal(s) => out.push_str(s),
            Element::Interpolation(interp) => {
                let value = expr_to_value(&interp.expr, env)?;
                if let Some(u) = value.find_unknown() {
                    return Ok(Some(Unknown {
                        template: None,
                        ..u.clone()
                    }));
                }
                out.push_str(&value.to_template_string().map_err(|e| anyhow!(e))?);
            }
            Element::Directive(dir) => match &**dir {
                Directive::If(d) => {
                    let branch = match expr_to_value(&d.cond_expr, env)? {
                        Value::Unknown(u) => return Ok(Some(u)),
                        Value::Bool(true) => Some(&d.true_template),
                        Value::Bool(false) => d.false_template.as_ref(),
                        other => {
                            bail!("template condition must be bool, got {}", other.type_name())
                        }
                    };
                    if let Some(branch) = branch {
                        if let Some(u) = render_template(branch, env, out)? {
                            return Ok(Some(u));
                        }
                    }
                }
                Directive::For(d) => {
                    let collection = match expr_to_value(&d.collection_expr, env)? {
                        Value::Unknown(u) => return Ok(Some(u)),
                        other => other,
                    };
                    for (key, value) in collection_entries(collection)? {
                        let mut iter_env = env.with_binding(d.value_var.as_str(), value);
                        if let Some(kv) = &d.key_var {
                            iter_env.bindings.insert(kv.as_str().to_string(), key);
                        }
                        if let Some(u) = render_template(&d.template, &iter_env, out)? {
                            return Ok(Some(u));
                        }
                    }
                }
            },
        }
    }
    Ok(None)
}

fn resolve_variable(name: &str, env: &EnvVars) -> Result<Value> {
    if let Some(v) = env.bindings.get(name) {
        return Ok(v.clone());
    }
    match name {
        "self" => Ok(Unknown::new("self", "self").into()),
        other => bail!("unknown variable '{other}'"),
    }
}

/// Text form of a traversal, used as the address of unknowns it produces.
fn traversal_address(root: &str, ops: &[TraversalOperator]) -> String {
    let mut out = root.to_string();
    for op in ops {
        match op {
            TraversalOperator::GetAttr(name) => {
                out.push('.');
                out.push_str(name.as_str());
            }
            TraversalOperator::Index(expr) => out.push_str(&format!("[{expr}]")),
            TraversalOperator::LegacyIndex(i) => out.push_str(&format!(".{i}")),
            TraversalOperator::AttrSplat => out.push_str(".*"),
            TraversalOperator::FullSplat => out.push_str("[*]"),
        }
    }
    out
}

fn attr_head(ops: &[TraversalOperator]) -> Option<(&str, &[TraversalOperator])> {
    match ops.split_first() {
        Some((TraversalOperator::GetAttr(name), rest)) => Some((name.as_str(), rest)),
        _ => None,
    }
}

/// Instance key written literally right after a block address, e.g. `x.y[0]`.
pub fn literal_instance_key(op: Option<&TraversalOperator>) -> Option<InstanceKey> {
    match op? {
        TraversalOperator::Index(Expression::Number(n)) => {
            n.as_u64().map(|i| InstanceKey::Index(i as usize))
        }
        TraversalOperator::Index(Expression::String(s)) => Some(InstanceKey::Key(s.clone())),
        TraversalOperator::LegacyIndex(i) => Some(InstanceKey::Index(*i as usize)),
        _ => None,
    }
}

/// What a traversal turns into once it leaves known data.
struct Walk {
    unknown: Option<Unknown>,
}

impl Walk {
    fn plain() -> Self {
        Walk { unknown: None }
    }

    fn missing(&self, message: String) -> Result<Value> {
        match &self.unknown {
            Some(u) => Ok(Value::Unknown(u.clone())),
            None => Err(anyhow!(message)),
        }
    }
}

fn walk(mut current: Value, ops: &[TraversalOperator], env: &EnvVars, ctx: &Walk) -> Result<Value> {
    for (i, op) in ops.iter().enumerate() {
        if current.is_unknown() {
            return Ok(ctx.unknown.clone().map(Value::Unknown).unwrap_or(current));
        }
        current = match op {
            TraversalOperator::GetAttr(name) => match current {
                Value::Map(mut map) => match map.swap_remove(name.as_str()) {
                    Some(v) => v,
                    None => return ctx.missing(format!("unsupported attribute '{name}'")),
                },
                other => {
                    return ctx.missing(format!(
                        "cannot access attribute '{name}' on {}",
                        other.type_name()
                    ))
                }
            },
            TraversalOperator::Index(expr) => {
                let key = expr_to_value(expr, env)?;
                match index_value(current, key, ctx)? {
                    Ok(v) => v,
                    Err(early) => return Ok(early),
                }
            }
            TraversalOperator::LegacyIndex(n) => {
                match index_value(current, Value::from(*n as usize), ctx)? {
                    Ok(v) => v,
                    Err(early) => return Ok(early),
                }
            }
            TraversalOperator::AttrSplat | TraversalOperator::FullSplat => {
                let rest = &ops[i + 1..];
                let split = match op {
                    TraversalOperator::AttrSplat => rest
                        .iter()
                        .position(|o| !matches!(o, TraversalOperator::GetAttr(_)))
                        .unwrap_or(rest.len()),
                    _ => rest.len(),
                };
                let (inner, after) = rest.split_at(split);
                let items = match current {
                    Value::List(items) => items,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                let mapped = items
                    .into_iter()
                    .map(|item| walk(item, inner, env, ctx))
                    .collect::<Result<Vec<_>>>()?;
                return walk(Value::List(mapped), after, env, ctx);
            }
        };
    }
    Ok(current)
}

/// Index into a list or map. `Err` carries a value that ends the traversal early.
fn index_value(
    current: Value,
    key: Value,
    ctx: &Walk,
) -> Result<std::result::Result<Value, Value>> {
    if let Value::Unknown(u) = key {
        return Ok(Err(ctx
            .unknown
            .clone()
            .map(Value::Unknown)
            .unwrap_or(Value::Unknown(u))));
    }
    match current {
        Value::List(mut items) => {
            let index = key
                .as_i64()
                .or_else(|| key.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| anyhow!("list index must be a number, got {}", key.type_name()))?;
            if index < 0 || index as usize >= items.len() {
                return ctx.missing(format!("index {index} out of range")).map(Err);
            }
            Ok(Ok(items.swap_remove(index as usize)))
        }
        Value::Map(mut map) => {
            let key = key.to_template_string().map_err(|e| anyhow!(e))?;
            match map.swap_remove(&key) {
                Some(v) => Ok(Ok(v)),
                None => ctx.missing(format!("key {key:?} not found")).map(Err),
            }
        }
        other => ctx
            .missing(format!("cannot index into {}", other.type_name()))
            .map(Err),
    }
}

/// Resolve a reference to a resource, data source or module call.
fn resolve_block(
    key: String,
    target: BlockTarget,
    ops: &[TraversalOperator],
    address: String,
    env: &EnvVars,
) -> Result<Value> {
    let target = target.with_key(literal_instance_key(ops.first()));
    let name = target.name.clone();
    if !env.scope.declared.contains(&key) {
        return Ok(Unknown::new(address, name).into());
    }
    let ctx = Walk {
        unknown: Some(Unknown::new(address, name).with_target(target)),
    };
    match env.scope.blocks.get(&key) {
        Some(value) => walk(value.clone(), ops, env, &ctx),
        None => ctx.missing(String::new()),
    }
}

fn resolve_traversal(tr: &Traversal, env: &EnvVars) -> Result<Value> {
    let ops = tr.operators.as_slice();
    let root = match &tr.expr {
        Expression::Variable(v) => v.as_str(),
        other => {
            let base = expr_to_value(other, env)?;
            return walk(base, ops, env, &Walk::plain());
        }
    };
    if let Some(bound) = env.bindings.get(root) {
        return walk(bound.clone(), ops, env, &Walk::plain());
    }
    let address = traversal_address(root, ops);

    match root {
        "var" => {
            let (name, rest) = attr_head(ops).context("expected var.<name>")?;
            let value = env
                .scope
                .vars
                .get(name)
                .cloned()
                .unwrap_or_else(|| Unknown::new(format!("var.{name}"), name).into());
            walk(value, rest, env, &Walk::plain())
        }
        "local" => {
            let (name, rest) = attr_head(ops).context("expected local.<name>")?;
            let value = env
                .scope
                .locals
                .get(name)
                .cloned()
                .unwrap_or_else(|| Unknown::new(format!("local.{name}"), name).into());
            walk(value, rest, env, &Walk::plain())
        }
        "module" => {
            let (name, rest) = attr_head(ops).context("expected module.<name>")?;
            resolve_block(
                format!("module.{name}"),
                BlockTarget::module(name),
                rest,
                address,
                env,
            )
        }
        "data" => {
            let (r#type, rest) = attr_head(ops).context("expected data.<type>.<name>")?;
            let (name, rest) = attr_head(rest).context("expected data.<type>.<name>")?;
            resolve_block(
                format!("data.{}.{}", r#type, name),
                BlockTarget::data(r#type, name),
                rest,
                address,
                env,
            )
        }
        "each" => {
            let (attr, rest) = attr_head(ops).context("expected each.key or each.value")?;
            let (key, value) = env
                .each
                .as_ref()
                .ok_or_else(|| anyhow!("'each' is only available inside for_each blocks"))?;
            let current = match attr {
                "key" => key.clone(),
                "value" => value.clone(),
                other => bail!("unsupported each attribute '{other}': expected key or value"),
            };
            walk(current, rest, env, &Walk::plain())
        }
        "count" => {
            let (attr, _) = attr_head(ops).context("expected count.index")?;
            if attr != "index" {
                bail!("unsupported count attribute '{attr}': expected index");
            }
            env.count
                .clone()
                .ok_or_else(|| anyhow!("'count' is only available inside count iterations"))
        }
        "path" => {
            let (attr, _) = attr_head(ops).context("expected path.<attribute>")?;
            match attr {
                "module" => Ok(Value::from(env.scope.path_module())),
                "root" => Ok(Value::from(".")),
                "cwd" => Ok(Value::from(env.scope.cwd.to_string_lossy().into_owned())),
                other => bail!("unsupported path attribute '{other}'"),
            }
        }
        "terraform" => match attr_head(ops) {
            Some(("workspace", _)) => Ok(Value::from(env.scope.workspace.as_str())),
            _ => bail!("unsupported terraform attribute in '{address}'"),
        },
        "self" => Ok(Unknown::new(address, "self").into()),
        resource_type => {
            let (name, rest) =
                attr_head(ops).with_context(|| format!("unknown variable '{resource_type}'"))?;
            resolve_block(
                format!("{resource_type}.{name}"),
                BlockTarget::resource(resource_type, name),
                rest,
                address,
                env,
            )
        }
    }
}

fn eval_func_call(call: &FuncCall, env: &EnvVars) -> Result<Value> {
    let name = call.name.to_string();
    match name.as_str() {
        "try" => {
            let mut last = anyhow!("try requires at least one argument");
            for arg in &call.args {
                match expr_to_value(arg, env) {
                    Ok(v) => return Ok(v),
                    Err(e) => last = e,
                }
            }
            return Err(last.context("no expression passed to try succeeded"));
        }
        "can" => {
            let [arg] = call.args.as_slice() else {
                bail!("can expects exactly one argument");
            };
            return Ok(match expr_to_value(arg, env) {
                Ok(Value::Unknown(u)) => Value::Unknown(u),
                Ok(_) => Value::Bool(true),
                Err(_) => Value::Bool(false),
            });
        }
        _ => {}
    }

    let mut args = call
        .args
        .iter()
        .map(|e| expr_to_value(e, env))
        .collect::<Result<Vec<_>>>()?;
    if call.expand_final {
        match args.pop() {
            Some(Value::List(rest)) => args.extend(rest),
            Some(Value::Unknown(u)) => return Ok(Value::Unknown(u)),
            Some(other) => bail!("cannot expand {} argument of {name}", other.type_name()),
            None => bail!("{name}: nothing to expand"),
        }
    }
    env.functions.call(&name, args).map_err(|e| anyhow!(e))
}

fn eval_conditional(c: &Conditional, env: &EnvVars) -> Result<Value> {
    match expr_to_value(&c.cond_expr, env)? {
        Value::Unknown(u) => Ok(Value::Unknown(u)),
        Value::Bool(true) => expr_to_value(&c.true_expr, env),
        Value::Bool(false) => expr_to_value(&c.false_expr, env),
        Value::String(s) if s == "true" || s == "false" => expr_to_value(
            if s == "true" {
                &c.true_expr
            } else {
                &c.false_expr
            },
            env,
        ),
        other => bail!(
            "conditional expression must evaluate to bool, got {}",
            other.type_name()
        ),
    }
}

fn to_number(v: &Value, op: &str) -> Result<f64> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("invalid number")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| anyhow!("unsupported operand for {op}: {s:?} is not a number")),
        other => bail!("unsupported operand type for {op}: {}", other.type_name()),
    }
}

fn to_bool(v: &Value, op: &str) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" || s == "false" => Ok(s == "true"),
        other => bail!("unsupported operand type for {op}: {}", other.type_name()),
    }
}

fn eval_operation(op: &Operation, env: &EnvVars) -> Result<Value> {
    match op {
        Operation::Unary(u) => {
            let v = expr_to_value(&u.expr, env)?;
            if v.is_unknown() {
                return Ok(v);
            }
            match u.operator {
                UnaryOperator::Not => Ok(Value::Bool(!to_bool(&v, "!")?)),
                UnaryOperator::Neg => match v.as_i64().and_then(i64::checked_neg) {
                    Some(i) => Ok(Value::from(i)),
                    None => Ok(Value::from_f64(-to_number(&v, "-")?)),
                },
            }
        }
        Operation::Binary(b) => {
            let lhs = expr_to_value(&b.lhs_expr, env)?;
            let rhs = expr_to_value(&b.rhs_expr, env)?;
            if let Some(u) = lhs.as_unknown().or_else(|| rhs.as_unknown()) {
                return Ok(Value::Unknown(u.clone()));
            }
            binary(b.operator, &lhs, &rhs)
        }
    }
}

fn binary(operator: BinaryOperator, lhs: &Value, rhs: &Value) -> Result<Value> {
    use BinaryOperator::*;
    let sym = &format!("{operator:?}");
    Ok(match operator {
        Eq => Value::Bool(values_equal(lhs, rhs)),
        NotEq => Value::Bool(!values_equal(lhs, rhs)),
        And => Value::Bool(to_bool(lhs, sym)? && to_bool(rhs, sym)?),
        Or => Value::Bool(to_bool(lhs, sym)? || to_bool(rhs, sym)?),
        Less | LessEq | Greater | GreaterEq => {
            let (l, r) = (to_number(lhs, sym)?, to_number(rhs, sym)?);
            Value::Bool(match operator {
                Less => l < r,
                LessEq => l <= r,
                Greater => l > r,
                _ => l >= r,
            })
        }
        Plus | Minus | Mul | Div | Mod => {
            let (l, r) = (to_number(lhs, sym)?, to_number(rhs, sym)?);
            match operator {
                Plus => Value::from_f64(l + r),
                Minus => Value::from_f64(l - r),
                Mul => Value::from_f64(l * r),
                Div if r == 0.0 => bail!("division by zero"),
                Div => Value::from_f64(l / r),
                _ if r == 0.0 => bail!("modulo by zero"),
                _ => Value::from_f64(l % r),
            }
        }
    })
}

fn eval_for_expr(fe: &ForExpr, env: &EnvVars) -> Result<Value> {
    let collection = match expr_to_value(&fe.collection_expr, env)? {
        Value::Unknown(u) => return Ok(Value::Unknown(u)),
        other => other,
    };
    let mut list = Vec::new();
    let mut map = Map::new();

    for (key, value) in collection_entries(collection)? {
        let mut iter_env = env.with_binding(fe.value_var.as_str(), value);
        if let Some(kv) = &fe.key_var {
            iter_env.bindings.insert(kv.as_str().to_string(), key);
        }

        if let Some(cond_expr) = &fe.cond_expr {
            match expr_to_value(cond_expr, &iter_env)? {
                Value::Bool(true) => {}
                Value::Bool(false) => continue,
                Value::Unknown(u) => return Ok(Value::Unknown(u)),
                other => bail!(
                    "for expression condition must evaluate to bool, got {}",
                    other.type_name()
                ),
            }
        }

        let value = expr_to_value(&fe.value_expr, &iter_env)?;
        match &fe.key_expr {
            Some(key_expr) => {
                let key = match expr_to_value(key_expr, &iter_env)? {
                    Value::Unknown(u) => return Ok(Value::Unknown(u)),
                    other => other
                        .to_template_string()
                        .map_err(|e| anyhow!("for expression key: {e}"))?,
                };
                if fe.grouping {
                    if let Value::List(items) =
                        map.entry(key).or_insert_with(|| Value::List(Vec::new()))
                    {
                        items.push(value);
                    }
                } else if map.contains_key(&key) {
                    bail!("duplicate key {key:?} in for expression");
                } else {
                    map.insert(key, value);
                }
            }
            None => list.push(value),
        }
    }

    if fe.key_expr.is_some() {
        Ok(Value::Map(map))
    } else {
        Ok(Value::List(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::builtins::create_function_table;
    use crate::frontend::builtins::test_support::eval;
    use crate::frontend::env::Scope;
    use serde_json::json;
    use std::path::Path;

    fn eval_with(scope: &Scope, expr: &str) -> Value {
        let body: hcl::Body = hcl::from_str(&format!("test = {expr}")).unwrap();
        let functions = create_function_table(Path::new("."));
        let env = EnvVars::new(scope, &functions);
        expr_to_value(find_attr(&body, "test").unwrap().expr(), &env).unwrap()
    }

    fn scope() -> Scope {
        let mut scope = Scope::new(Path::new("/root"), Path::new("/root"));
        scope.vars.insert("region".into(), Value::from("us-east-1"));
        scope
            .vars
            .insert("tags".into(), Unknown::new("var.tags", "tags").into());
        let mut bucket = Map::new();
        bucket.insert("bucket".into(), Value::from("logs"));
        scope
            .blocks
            .insert("aws_s3_bucket.logs".into(), Value::Map(bucket));
        scope.declared.insert("aws_s3_bucket.logs".into());
        scope
            .declared
            .insert("data.aws_caller_identity.current".into());
        scope
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::from(7));
        assert_eq!(eval("7 / 2").unwrap(), Value::from_f64(3.5));
        assert_eq!(eval("5 % 2 == 1").unwrap(), Value::Bool(true));
        assert_eq!(eval("!(1 > 2) && true").unwrap(), Value::Bool(true));
        assert_eq!(eval("-3").unwrap(), Value::from(-3));

        let mut scope = scope();
        scope.vars.insert("min".into(), Value::from(i64::MIN));
        assert_eq!(
            eval_with(&scope, "-var.min"),
            Value::from_f64(9.223372036854775808e18)
        );
    }

    #[test]
    fn for_expressions() {
        assert_eq!(
            eval("[for s in [\"a\", \"b\"] : upper(s)]")
                .unwrap()
                .to_json(),
            json!(["A", "B"])
        );
        assert_eq!(
            eval("{for k, v in {a = 1, b = 2} : v => k if v > 1}")
                .unwrap()
                .to_json(),
            json!({"2": "b"})
        );
        assert_eq!(
            eval("{for s in [\"x\", \"y\", \"x\"] : s => s...}")
                .unwrap()
                .to_json(),
            json!({"x": ["x", "x"], "y": ["y"]})
        );
    }

    #[test]
    fn templates_and_directives() {
        assert_eq!(eval("\"a-${1 + 1}-b\"").unwrap(), Value::from("a-2-b"));
        assert_eq!(
            eval("\"%{ for x in [1, 2] }${x},%{ endfor }\"").unwrap(),
            Value::from("1,2,")
        );
        assert_eq!(
            eval("\"%{ if true }yes%{ else }no%{ endif }\"").unwrap(),
            Value::from("yes")
        );
    }

    #[test]
    fn splat_and_index() {
        assert_eq!(
            eval("[{a = 1}, {a = 2}][*].a").unwrap().to_json(),
            json!([1, 2])
        );
        assert_eq!(eval("[10, 20][1]").unwrap(), Value::from(20));
        assert_eq!(eval("{k = \"v\"}[\"k\"]").unwrap(), Value::from("v"));
    }

    #[test]
    fn try_and_can() {
        assert_eq!(
            eval("try([][0], \"fallback\")").unwrap(),
            Value::from("fallback")
        );
        assert_eq!(eval("can([][0])").unwrap(), Value::Bool(false));
        assert_eq!(eval("can([1][0])").unwrap(), Value::Bool(true));
    }

    #[test]
    fn function_argument_expansion() {
        assert_eq!(eval("min([3, 1, 2]...)").unwrap(), Value::from(1));
    }

    #[test]
    fn variables_and_resources_resolve() {
        let scope = scope();
        assert_eq!(eval_with(&scope, "var.region"), Value::from("us-east-1"));
        assert_eq!(
            eval_with(&scope, "aws_s3_bucket.logs.bucket"),
            Value::from("logs")
        );
    }

    #[test]
    fn computed_attributes_are_targeted_unknowns() {
        let scope = scope();
        let v = eval_with(&scope, "aws_s3_bucket.logs.arn");
        assert_eq!(
            v.to_attribute_json(),
            json!({
                "__attribute__": "aws_s3_bucket.logs.arn",
                "__name__": "logs",
                "__ref__": "aws_s3_bucket.logs",
                "__type__": "aws_s3_bucket",
            })
        );
        let v = eval_with(&scope, "data.aws_caller_identity.current.account_id");
        assert_eq!(
            v.as_unknown().and_then(|u| u.target.clone()),
            Some(BlockTarget::data("aws_caller_identity", "current"))
        );
    }

    #[test]
    fn undeclared_blocks_are_untargeted_unknowns() {
        let scope = scope();
        assert_eq!(
            eval_with(&scope, "aws_instance.a").to_attribute_json(),
            json!({"__attribute__": "aws_instance.a", "__name__": "a"})
        );
    }

    #[test]
    fn interpolated_unknowns_keep_template_text() {
        let scope = scope();
        let v = eval_with(
            &scope,
            "\"arn:aws:iam::${data.aws_caller_identity.current.account_id}:policy/Boundary\"",
        );
        assert_eq!(
            v.to_attribute_json(),
            json!("arn:aws:iam::${data.aws_caller_identity.current.account_id}:policy/Boundary")
        );
    }

    #[test]
    fn unknowns_propagate_through_operators_and_functions() {
        let scope = scope();
        assert!(eval_with(&scope, "var.tags == null").is_unknown());
        assert!(eval_with(&scope, "upper(var.tags)").is_unknown());
        assert_eq!(
            eval_with(&scope, "merge({a = 1}, {b = var.tags})").to_json(),
            json!({"a": 1, "b": null})
        );
    }

    #[test]
    fn path_and_workspace() {
        let mut scope = scope();
        scope.workspace = "staging".into();
        assert_eq!(eval_with(&scope, "path.module"), Value::from("."));
        assert_eq!(
            eval_with(&scope, "terraform.workspace"),
            Value::from("staging")
        );
    }
}
