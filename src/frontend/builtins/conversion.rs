use super::collection::to_set;
use super::{FuncArgs, FuncDef, ParamType};
use crate::frontend::value::Value;

pub fn create_tostring_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match &args[0] {
            Value::Null => Ok(Value::Null),
            other => other.to_template_string().map(Value::from),
        })
}

pub fn create_tonumber_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => Ok(Value::Number(n.clone())),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from_f64)
                .map_err(|_| format!("cannot convert {s:?} to number")),
            other => Err(format!("cannot convert {} to number", other.type_name())),
        })
}

pub fn create_tobool_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match &args[0] {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
            other => Err(format!("cannot convert {other} to bool")),
        })
}

pub fn create_tolist_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .unknown_tolerant()
        .build(|args: FuncArgs| match &args[0] {
            Value::List(items) => Ok(Value::List(items.clone())),
            Value::Null => Ok(Value::Null),
            other => Err(format!("cannot convert {} to list", other.type_name())),
        })
}

pub fn create_toset_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .unknown_tolerant()
        .build(|args: FuncArgs| match &args[0] {
            Value::List(items) => Ok(Value::List(to_set(items))),
            Value::Null => Ok(Value::Null),
            other => Err(format!("cannot convert {} to set", other.type_name())),
        })
}

pub fn create_tomap_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .unknown_tolerant()
        .build(|args: FuncArgs| match &args[0] {
            Value::Map(map) => Ok(Value::Map(map.clone())),
            Value::Null => Ok(Value::Null),
            other => Err(format!("cannot convert {} to map", other.type_name())),
        })
}

pub fn create_jsonencode_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| {
            serde_json::to_string(&args[0].to_json())
                .map(Value::from)
                .map_err(|e| e.to_string())
        })
}

pub fn create_jsondecode_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            serde_json::from_str::<serde_json::Value>(args.str(0)?)
                .map(Value::from)
                .map_err(|e| format!("invalid JSON: {e}"))
        })
}

#[cfg(test)]
mod tests {
    use crate::frontend::builtins::test_support::eval;
    use crate::frontend::value::Value;
    use serde_json::json;

    #[test]
    fn test_primitive_conversions() {
        assert_eq!(eval("tostring(42)").unwrap(), Value::from("42"));
        assert_eq!(eval("tonumber(\"3\")").unwrap(), Value::from(3));
        assert_eq!(eval("tobool(\"true\")").unwrap(), Value::Bool(true));
        assert!(eval("tonumber(\"abc\")").is_err());
    }

    #[test]
    fn test_collection_conversions() {
        assert_eq!(
            eval("tolist([\"a\", \"b\", \"c\"])").unwrap().to_json(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            eval("toset([3, 1, 2, 1])").unwrap().to_json(),
            json!([1, 2, 3])
        );
        assert_eq!(
            eval("toset([\"c\", \"a\", \"b\"])").unwrap().to_json(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            eval("tomap({a = 1, b = 2})").unwrap().to_json(),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn test_json_round_trip() {
        assert_eq!(
            eval("jsonencode({a = [1, true]})").unwrap(),
            Value::from("{\"a\":[1,true]}")
        );
        assert_eq!(
            eval("jsondecode(\"{\\\"a\\\": 1}\")").unwrap().to_json(),
            json!({"a": 1})
        );
    }
}
