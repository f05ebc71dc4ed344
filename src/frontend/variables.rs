//! Variable declarations, type constraints and the override sources that set them.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use hcl::expr::{Expression, ObjectKey};
use indexmap::IndexMap;
use log::{debug, warn};

use crate::config::Options;
use crate::error::Error;
use crate::frontend::ast::{BlockKind, ModuleSource};
use crate::frontend::builtins::collection::to_set;
use crate::frontend::core::{expr_to_value, find_attr};
use crate::frontend::env::EnvVars;
use crate::frontend::value::{Map, Unknown, Value};
use crate::Loader;

/// Type constraint of a `variable` block.
#[derive(Debug, Clone, PartialEq)]
pub enum VarType {
    Any,
    String,
    Number,
    Bool,
    List(Box<VarType>),
    Set(Box<VarType>),
    Map(Box<VarType>),
    Object(Vec<ObjectAttr>),
    Tuple(Vec<VarType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttr {
    pub name: String,
    pub ty: VarType,
    pub optional: bool,
    pub default: Option<Value>,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Any => write!(f, "dynamic"),
            VarType::String => write!(f, "string"),
            VarType::Number => write!(f, "number"),
            VarType::Bool => write!(f, "bool"),
            VarType::List(inner) => write!(f, "list of {inner}"),
            VarType::Set(inner) => write!(f, "set of {inner}"),
            VarType::Map(inner) => write!(f, "map of {inner}"),
            VarType::Object(_) => write!(f, "object"),
            VarType::Tuple(_) => write!(f, "tuple"),
        }
    }
}

fn keyword(name: &str) -> Option<VarType> {
    Some(match name {
        "any" => VarType::Any,
        "string" => VarType::String,
        "number" => VarType::Number,
        "bool" => VarType::Bool,
        "list" => VarType::List(Box::new(VarType::Any)),
        "set" => VarType::Set(Box::new(VarType::Any)),
        "map" => VarType::Map(Box::new(VarType::Any)),
        _ => return None,
    })
}

impl VarType {
    /// Parse a type expression such as `map(list(string))`. Quoted legacy forms
    /// (`"string"`, `"list"`, `"map"`) are accepted.
    pub fn parse(expr: &Expression, env: &EnvVars) -> Result<VarType> {
        match expr {
            Expression::Variable(v) => {
                keyword(v.as_str()).ok_or_else(|| anyhow!("unknown type '{}'", v.as_str()))
            }
            Expression::String(s) => keyword(s).ok_or_else(|| anyhow!("unknown type {s:?}")),
            Expression::TemplateExpr(t) => {
                keyword(&t.to_string()).ok_or_else(|| anyhow!("unknown type {:?}", t.to_string()))
            }
            Expression::Parenthesis(inner) => VarType::parse(inner, env),
            Expression::FuncCall(call) => {
                let name = call.name.to_string();
                let single = || -> Result<&Expression> {
                    match call.args.as_slice() {
                        [arg] => Ok(arg),
                        _ => bail!("{name}() takes exactly one argument"),
                    }
                };
                match name.as_str() {
                    "list" => Ok(VarType::List(Box::new(VarType::parse(single()?, env)?))),
                    "set" => Ok(VarType::Set(Box::new(VarType::parse(single()?, env)?))),
                    "map" => Ok(VarType::Map(Box::new(VarType::parse(single()?, env)?))),
                    "tuple" => match single()? {
                        Expression::Array(items) => items
                            .iter()
                            .map(|e| VarType::parse(e, env))
                            .collect::<Result<Vec<_>>>()
                            .map(VarType::Tuple),
                        _ => bail!("tuple() expects a list of types"),
                    },
                    "object" => match single()? {
                        Expression::Object(obj) => {
                            let mut attrs = Vec::new();
                            for (key, value) in obj.iter() {
                                let name = match key {
                                    ObjectKey::Identifier(id) => id.as_str().to_string(),
                                    ObjectKey::Expression(Expression::String(s)) => s.clone(),
                                    ObjectKey::Expression(Expression::Variable(v)) => {
                                        v.as_str().to_string()
                                    }
                                    _ => bail!("object attribute names must be identifiers"),
                                };
                                attrs.push(object_attr(name, value, env)?);
                            }
                            Ok(VarType::Object(attrs))
                        }
                        _ => bail!("object() expects an object of types"),
                    },
                    other => bail!("unknown type constructor '{other}'"),
                }
            }
            other => bail!("invalid type expression: {other}"),
        }
    }
}

fn object_attr(name: String, expr: &Expression, env: &EnvVars) -> Result<ObjectAttr> {
    if let Expression::FuncCall(call) = expr {
        if call.name.to_string() == "optional" {
            let (ty, default) = match call.args.as_slice() {
                [ty] => (ty, None),
                [ty, default] => (ty, Some(expr_to_value(default, env)?)),
                _ => bail!("optional() takes one or two arguments"),
            };
            return Ok(ObjectAttr {
                name,
                ty: VarType::parse(ty, env)?,
                optional: true,
                default,
            });
        }
    }
    Ok(ObjectAttr {
        name,
        ty: VarType::parse(expr, env)?,
        optional: false,
        default: None,
    })
}

/// Convert `value` to `ty`, element-wise for collections.
pub fn coerce(value: Value, ty: &VarType) -> Result<Value, String> {
    match (ty, value) {
        (_, v @ (Value::Unknown(_) | Value::Null)) => Ok(v),
        (VarType::Any, v) => Ok(v),
        (VarType::String, Value::String(s)) => Ok(Value::String(s)),
        (VarType::String, v @ (Value::Number(_) | Value::Bool(_))) => {
            v.to_template_string().map(Value::String)
        }
        (VarType::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (VarType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::from_f64)
            .map_err(|_| format!("cannot convert {s:?} to number")),
        (VarType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (VarType::Bool, Value::String(s)) if s == "true" || s == "false" => {
            Ok(Value::Bool(s == "true"))
        }
        (VarType::List(inner), Value::List(items)) => items
            .into_iter()
            .map(|v| coerce(v, inner))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (VarType::Set(inner), Value::List(items)) => {
            let items = items
                .into_iter()
                .map(|v| coerce(v, inner))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(to_set(&items)))
        }
        (VarType::Map(inner), Value::Map(map)) => map
            .into_iter()
            .map(|(k, v)| coerce(v, inner).map(|v| (k, v)))
            .collect::<Result<Map, _>>()
            .map(Value::Map),
        (VarType::Object(attrs), Value::Map(mut map)) => {
            let mut out = Map::new();
            for attr in attrs {
                let value = match map.swap_remove(&attr.name) {
                    Some(v) => coerce(v, &attr.ty)?,
                    None if attr.optional => attr.default.clone().unwrap_or(Value::Null),
                    None => return Err(format!("attribute '{}' is required", attr.name)),
                };
                out.insert(attr.name.clone(), value);
            }
            Ok(Value::Map(out))
        }
        (VarType::Tuple(types), Value::List(items)) => {
            if types.len() != items.len() {
                return Err(format!(
                    "tuple requires {} element(s), got {}",
                    types.len(),
                    items.len()
                ));
            }
            items
                .into_iter()
                .zip(types)
                .map(|(v, t)| coerce(v, t))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        (ty, v) => Err(format!("cannot convert {} to {ty}", v.type_name())),
    }
}

/// A `variable` block of a module.
#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: String,
    pub ty: Option<VarType>,
    pub default: Option<Value>,
}

/// Collect the variable declarations of a module. Defaults are evaluated without access
/// to other variables.
pub fn declarations(module: &ModuleSource, env: &EnvVars) -> Vec<VariableDecl> {
    let mut decls = Vec::new();
    for block in module.blocks_of(|k| matches!(k, BlockKind::Variable { .. })) {
        let BlockKind::Variable { name } = &block.kind else {
            continue;
        };
        let ty = find_attr(&block.body, "type").and_then(|attr| {
            VarType::parse(attr.expr(), env)
                .map_err(|e| warn!("variable '{name}': ignoring type: {e}"))
                .ok()
        });
        let default = find_attr(&block.body, "default").and_then(|attr| {
            expr_to_value(attr.expr(), env)
                .map_err(|e| warn!("variable '{name}': ignoring default: {e}"))
                .ok()
        });
        decls.push(VariableDecl {
            name: name.clone(),
            ty,
            default,
        });
    }
    decls
}

/// Resolved value of every declared variable: `overrides`, then the default, then unknown.
///
/// Override values are coerced to the declared type; a failed coercion keeps the raw
/// value. Defaults are taken as written.
pub fn resolve(
    decls: &[VariableDecl],
    overrides: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut vars = HashMap::new();
    for decl in decls {
        let value = match (overrides.get(&decl.name), &decl.default) {
            (Some(value), _) => match &decl.ty {
                Some(ty) => coerce(value.clone(), ty).unwrap_or_else(|e| {
                    warn!("variable '{}': {e}; keeping value as given", decl.name);
                    value.clone()
                }),
                None => value.clone(),
            },
            (None, Some(default)) => default.clone(),
            (None, None) => Unknown::new(format!("var.{}", decl.name), decl.name.as_str()).into(),
        };
        vars.insert(decl.name.clone(), value);
    }
    vars
}

/// Parse a variable definitions file: HCL attributes, or a JSON object for `.json` files.
pub fn parse_var_file(text: &str, path: &Path, env: &EnvVars) -> Result<IndexMap<String, Value>> {
    let mut values = IndexMap::new();
    if path.extension().map(|e| e == "json").unwrap_or(false) {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| anyhow!("invalid JSON in {}: {e}", path.display()))?;
        match Value::from(json) {
            Value::Map(map) => values.extend(map),
            _ => bail!("{} must contain a JSON object", path.display()),
        }
    } else {
        let body: hcl::Body =
            hcl::parse(text).map_err(|e| anyhow!("invalid syntax in {}: {e}", path.display()))?;
        for attr in body.attributes() {
            let value = expr_to_value(attr.expr(), env)
                .map_err(|e| anyhow!("{}: {}: {e}", path.display(), attr.key()))?;
            values.insert(attr.key().to_string(), value);
        }
    }
    Ok(values)
}

fn is_auto_var_file(name: &str) -> bool {
    name.ends_with(".auto.tfvars") || name.ends_with(".auto.tfvars.json")
}

/// Merge the override sources of the root module, lowest precedence first:
/// `terraform.tfvars`, `*.auto.tfvars`, the workspace file, `vars_paths`, then `vars`.
pub fn root_overrides(
    loader: &dyn Loader,
    root: &Path,
    options: &Options,
    env: &EnvVars,
) -> Result<HashMap<String, Value>> {
    let mut files: Vec<PathBuf> = Vec::new();
    let entries = loader.read_dir(root).map_err(|e| Error::path(root, e))?;
    let named = |name: &str| {
        entries
            .iter()
            .find(|p| p.file_name().map(|f| f == name).unwrap_or(false))
    };

    for name in ["terraform.tfvars", "terraform.tfvars.json"] {
        files.extend(named(name).cloned());
    }
    let mut auto: Vec<PathBuf> = entries
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|f| f.to_str())
                .map(is_auto_var_file)
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    auto.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files.extend(auto);
    for ext in ["tfvars", "tfvars.json"] {
        files.extend(named(&format!("{}.{ext}", options.workspace_name)).cloned());
    }

    let mut overrides = HashMap::new();
    for file in files {
        debug!("loading variables from {}", file.display());
        let text = loader.load(&file).map_err(|e| Error::path(&file, e))?;
        overrides.extend(parse_var_file(&text, &file, env)?);
    }
    for path in &options.vars_paths {
        let file = if path.is_absolute() {
            path.clone()
        } else {
            root.join(path)
        };
        debug!("loading variables from {}", file.display());
        let text = loader.load(&file).map_err(|e| Error::path(&file, e))?;
        overrides.extend(parse_var_file(&text, &file, env)?);
    }
    for (name, value) in &options.vars {
        overrides.insert(name.clone(), Value::from(value.clone()));
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::builtins::create_function_table;
    use crate::frontend::env::Scope;
    use serde_json::json;

    fn parse_type(src: &str) -> VarType {
        let body: hcl::Body = hcl::from_str(&format!("type = {src}")).unwrap();
        let functions = create_function_table(Path::new("."));
        let scope = Scope::new(Path::new("."), Path::new("."));
        let env = EnvVars::new(&scope, &functions);
        VarType::parse(body.attributes().next().unwrap().expr(), &env).unwrap()
    }

    #[test]
    fn friendly_type_names() {
        assert_eq!(parse_type("string").to_string(), "string");
        assert_eq!(parse_type("set(string)").to_string(), "set of string");
        assert_eq!(parse_type("map(number)").to_string(), "map of number");
        assert_eq!(parse_type("list(any)").to_string(), "list of dynamic");
        assert_eq!(parse_type("object({ a = string })").to_string(), "object");
        assert_eq!(parse_type("tuple([string, number])").to_string(), "tuple");
    }

    #[test]
    fn quoted_legacy_types() {
        assert_eq!(parse_type("\"string\""), VarType::String);
        assert_eq!(
            parse_type("\"list\""),
            VarType::List(Box::new(VarType::Any))
        );
        assert_eq!(parse_type("\"map\""), VarType::Map(Box::new(VarType::Any)));
    }

    #[test]
    fn primitive_coercions() {
        assert_eq!(
            coerce(Value::from(789), &VarType::String),
            Ok(Value::from("789"))
        );
        assert_eq!(
            coerce(Value::from("12"), &VarType::Number),
            Ok(Value::from(12))
        );
        assert_eq!(
            coerce(Value::from("true"), &VarType::Bool),
            Ok(Value::Bool(true))
        );
        assert!(coerce(Value::from("abc"), &VarType::Number).is_err());
    }

    #[test]
    fn sets_are_deduplicated_and_sorted() {
        let value = Value::from(json!(["b", "a", "b"]));
        let set = coerce(value, &parse_type("set(string)")).unwrap();
        assert_eq!(set.to_json(), json!(["a", "b"]));
    }

    #[test]
    fn optional_object_attributes() {
        let ty = parse_type("object({ name = string, size = optional(number, 10) })");
        let value = coerce(Value::from(json!({"name": "x"})), &ty).unwrap();
        assert_eq!(value.to_json(), json!({"name": "x", "size": 10}));
        assert!(coerce(Value::from(json!({})), &ty).is_err());
    }

    #[test]
    fn overrides_beat_defaults_and_unset_is_unknown() {
        let decls = vec![
            VariableDecl {
                name: "a".into(),
                ty: Some(VarType::String),
                default: Some(Value::from("default")),
            },
            VariableDecl {
                name: "b".into(),
                ty: None,
                default: Some(Value::from("huh")),
            },
            VariableDecl {
                name: "c".into(),
                ty: None,
                default: None,
            },
        ];
        let overrides = HashMap::from([("a".to_string(), Value::from(5))]);
        let vars = resolve(&decls, &overrides);
        assert_eq!(vars["a"], Value::from("5"));
        assert_eq!(vars["b"], Value::from("huh"));
        assert_eq!(
            vars["c"].to_attribute_json(),
            json!({"__attribute__": "var.c", "__name__": "c"})
        );
    }

    #[test]
    fn failed_coercion_keeps_raw_value() {
        let decls = vec![VariableDecl {
            name: "n".into(),
            ty: Some(VarType::Number),
            default: None,
        }];
        let overrides = HashMap::from([("n".to_string(), Value::from("many"))]);
        assert_eq!(resolve(&decls, &overrides)["n"], Value::from("many"));
    }

    #[test]
    fn var_files_in_both_syntaxes() {
        let functions = create_function_table(Path::new("."));
        let scope = Scope::new(Path::new("."), Path::new("."));
        let env = EnvVars::new(&scope, &functions);

        let hcl = parse_var_file("abc = \"my\"\nn = 1 + 2\n", Path::new("a.tfvars"), &env).unwrap();
        assert_eq!(hcl["abc"], Value::from("my"));
        assert_eq!(hcl["n"], Value::from(3));

        let json = parse_var_file("{\"abc\": [1, 2]}", Path::new("a.tfvars.json"), &env).unwrap();
        assert_eq!(json["abc"].to_json(), json!([1, 2]));
    }
}
