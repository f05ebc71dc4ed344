//! Evaluated values.
//!
//! [`Value`] mirrors `hcl::Value` with one extra variant: [`Value::Unknown`], a marker for
//! anything that cannot be known without applying the configuration (provider computed
//! attributes, unset variables, values of modules that could not be loaded, ...).
use std::cmp::Ordering;
use std::fmt;

use hcl::Number;
use indexmap::IndexMap;
use serde_json::json;

use crate::frontend::ast::InstanceKey;

pub type Map = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Value>),
    Map(Map),
    Unknown(Unknown),
}

/// Kind of block an [`Unknown`] or a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Resource,
    Data,
    Module,
}

/// A block addressed by an expression, e.g. `data.aws_region.current` or `module.vpc[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockTarget {
    pub kind: TargetKind,
    /// Resource/data type, `module` for module calls.
    pub label: String,
    pub name: String,
    pub key: Option<InstanceKey>,
}

impl BlockTarget {
    pub fn resource(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Resource,
            label: label.into(),
            name: name.into(),
            key: None,
        }
    }

    pub fn data(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Data,
            label: label.into(),
            name: name.into(),
            key: None,
        }
    }

    pub fn module(name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Module,
            label: "module".to_string(),
            name: name.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: Option<InstanceKey>) -> Self {
        self.key = key;
        self
    }

    /// `type.name` for resources and data sources, `module.name` for modules.
    pub fn reference(&self) -> String {
        format!("{}.{}", self.label, self.name)
    }
}

/// Marker for a value that cannot be determined statically.
#[derive(Debug, Clone, PartialEq)]
pub struct Unknown {
    /// Address of the expression that could not be resolved, e.g. `var.tags`.
    pub address: String,
    pub name: String,
    pub target: Option<BlockTarget>,
    /// Raw source of a template that interpolated this unknown.
    pub template: Option<String>,
}

impl Unknown {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            target: None,
            template: None,
        }
    }

    pub fn with_target(mut self, target: BlockTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Object representation used when an unknown is the whole value of an attribute.
    pub fn marker(&self) -> serde_json::Value {
        if let Some(template) = &self.template {
            return serde_json::Value::String(template.clone());
        }
        let mut marker = json!({
            "__attribute__": self.address,
            "__name__": self.name,
        });
        if let Some(target) = &self.target {
            marker["__ref__"] = json!(target.reference());
            marker["__type__"] = json!(target.label);
        }
        marker
    }
}

impl From<Unknown> for Value {
    fn from(u: Unknown) -> Self {
        Value::Unknown(u)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_unknown(&self) -> Option<&Unknown> {
        match self {
            Value::Unknown(u) => Some(u),
            _ => None,
        }
    }

    /// First unknown found in a depth-first walk of the value.
    pub fn find_unknown(&self) -> Option<&Unknown> {
        match self {
            Value::Unknown(u) => Some(u),
            Value::List(items) => items.iter().find_map(Value::find_unknown),
            Value::Map(map) => map.values().find_map(Value::find_unknown),
            _ => None,
        }
    }

    /// Visit every unknown nested in the value.
    pub fn for_each_unknown<'a>(&'a self, f: &mut impl FnMut(&'a Unknown)) {
        match self {
            Value::Unknown(u) => f(u),
            Value::List(items) => items.iter().for_each(|v| v.for_each_unknown(f)),
            Value::Map(map) => map.values().for_each(|v| v.for_each_unknown(f)),
            _ => {}
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Unknown(_) => "unknown",
        }
    }

    pub fn from_f64(f: f64) -> Value {
        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            Value::Number(Number::from(f as i64))
        } else {
            Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }

    /// String conversion applied by interpolation and `tostring`.
    pub fn to_template_string(&self) -> Result<String, String> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Err("cannot interpolate a null value".to_string()),
            other => Err(format!("cannot convert {} to string", other.type_name())),
        }
    }

    /// JSON projection of a value nested inside a collection: unknowns collapse to `null`
    /// unless they carry a template.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Unknown(u) => match &u.template {
                Some(t) => serde_json::Value::String(t.clone()),
                None => serde_json::Value::Null,
            },
        }
    }

    /// JSON projection of a value at the top of an attribute.
    pub fn to_attribute_json(&self) -> serde_json::Value {
        match self {
            Value::Unknown(u) => u.marker(),
            other => other.to_json(),
        }
    }
}

fn number_to_json(n: &Number) -> serde_json::Value {
    if let Some(i) = n.as_i64() {
        serde_json::Value::from(i)
    } else if let Some(u) = n.as_u64() {
        serde_json::Value::from(u)
    } else {
        n.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Semantic equality used by `==`, `contains`, `distinct` and friends: numbers compare by
/// numeric value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Total order used by `sort`, `toset` and set functions.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_json().to_string().cmp(&b.to_json().to_string()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Unknown(u) => write!(f, "<unknown {}>", u.address),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<hcl::Value> for Value {
    fn from(v: hcl::Value) -> Self {
        match v {
            hcl::Value::Null => Value::Null,
            hcl::Value::Bool(b) => Value::Bool(b),
            hcl::Value::Number(n) => Value::Number(n),
            hcl::Value::String(s) => Value::String(s),
            hcl::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            hcl::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Number(Number::from(i))
                } else if let Some(u) = n.as_u64() {
                    Value::Number(Number::from(u))
                } else {
                    Value::from_f64(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Number(Number::from(i64::from(i)))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(Number::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Number(Number::from(i as u64))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}
