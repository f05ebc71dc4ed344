use super::{FuncArgs, FuncDef, ParamType};
use crate::frontend::value::{compare_values, values_equal, Map, Value};

/// Collection functions
pub fn create_length_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .unknown_tolerant()
        .build(|args: FuncArgs| match &args[0] {
            Value::List(items) => Ok(Value::from(items.len())),
            Value::Map(map) => Ok(Value::from(map.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            other => Err(format!("cannot take the length of {}", other.type_name())),
        })
}

pub fn create_concat_func() -> FuncDef {
    FuncDef::builder()
        .variadic_param(ParamType::List)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            Ok(Value::List(
                args.iter()
                    .filter_map(Value::as_list)
                    .flatten()
                    .cloned()
                    .collect(),
            ))
        })
}

fn flatten_into(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::List(items) => items.iter().for_each(|v| flatten_into(v, out)),
        other => out.push(other.clone()),
    }
}

pub fn create_flatten_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let mut out = Vec::new();
            for item in args.list(0)? {
                flatten_into(item, &mut out);
            }
            Ok(Value::List(out))
        })
}

pub(crate) fn dedup(items: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|seen| values_equal(seen, item)) {
            out.push(item.clone());
        }
    }
    out
}

/// Set semantics: unique elements in sorted order.
pub(crate) fn to_set(items: &[Value]) -> Vec<Value> {
    let mut out = dedup(items);
    out.sort_by(compare_values);
    out
}

pub fn create_distinct_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .build(|args: FuncArgs| Ok(Value::List(dedup(args.list(0)?))))
}

pub fn create_slice_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .param(ParamType::Number)
        .param(ParamType::Number)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let items = args.list(0)?;
            let (start, end) = (args.int(1)?, args.int(2)?);
            if start < 0 || end < start || end as usize > items.len() {
                return Err(format!("invalid slice bounds {start}..{end}"));
            }
            Ok(Value::List(items[start as usize..end as usize].to_vec()))
        })
}

pub fn create_sort_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .build(|args: FuncArgs| {
            let mut items: Vec<String> = args
                .list(0)?
                .iter()
                .map(Value::to_template_string)
                .collect::<Result<_, _>>()?;
            items.sort();
            Ok(Value::List(items.into_iter().map(Value::from).collect()))
        })
}

pub fn create_reverse_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .unknown_tolerant()
        .build(|args: FuncArgs| Ok(Value::List(args.list(0)?.iter().rev().cloned().collect())))
}

pub fn create_index_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .param(ParamType::Any)
        .build(|args: FuncArgs| {
            args.list(0)?
                .iter()
                .position(|v| values_equal(v, &args[1]))
                .map(Value::from)
                .ok_or_else(|| "item not found".to_string())
        })
}

pub fn create_element_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .param(ParamType::Number)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let items = args.list(0)?;
            if items.is_empty() {
                return Err("cannot use element function with an empty list".to_string());
            }
            let index = args.int(1)?;
            if index < 0 {
                return Err("negative index".to_string());
            }
            Ok(items[index as usize % items.len()].clone())
        })
}

pub fn create_contains_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .param(ParamType::Any)
        .build(|args: FuncArgs| {
            Ok(Value::from(
                args.list(0)?.iter().any(|v| values_equal(v, &args[1])),
            ))
        })
}

pub fn create_keys_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Map)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let mut keys: Vec<&String> = args.map(0)?.keys().collect();
            keys.sort();
            Ok(Value::List(
                keys.into_iter().map(|k| Value::from(k.as_str())).collect(),
            ))
        })
}

pub fn create_values_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Map)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let map = args.map(0)?;
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Ok(Value::List(
                keys.into_iter().map(|k| map[k].clone()).collect(),
            ))
        })
}

pub fn create_lookup_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Map)
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let key = args.str(1)?;
            match args.map(0)?.get(key) {
                Some(v) => Ok(v.clone()),
                None => args
                    .get(2)
                    .cloned()
                    .ok_or_else(|| format!("key {key:?} not found and no default given")),
            }
        })
}

pub fn create_merge_func() -> FuncDef {
    FuncDef::builder()
        .variadic_param(ParamType::Any)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let mut out = Map::new();
            for arg in args.iter() {
                match arg {
                    Value::Map(map) => {
                        for (k, v) in map {
                            out.insert(k.clone(), v.clone());
                        }
                    }
                    Value::Null => {}
                    other => {
                        return Err(format!(
                            "merge arguments must be maps, got {}",
                            other.type_name()
                        ))
                    }
                }
            }
            Ok(Value::Map(out))
        })
}

pub fn create_zipmap_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .param(ParamType::List)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let keys = args.list(0)?;
            let values = args.list(1)?;
            if keys.len() != values.len() {
                return Err("number of keys and values must match".to_string());
            }
            let mut out = Map::new();
            for (k, v) in keys.iter().zip(values) {
                out.insert(k.to_template_string()?, v.clone());
            }
            Ok(Value::Map(out))
        })
}

pub fn create_range_func() -> FuncDef {
    FuncDef::builder()
        .variadic_param(ParamType::Number)
        .build(|args: FuncArgs| {
            let (start, end, step) = match args.len() {
                1 => (0.0, args.number(0)?, 1.0),
                2 => (args.number(0)?, args.number(1)?, 1.0),
                3 => (args.number(0)?, args.number(1)?, args.number(2)?),
                n => return Err(format!("range expects 1 to 3 arguments, got {n}")),
            };
            if step == 0.0 {
                return Err("step must not be zero".to_string());
            }
            let mut out = Vec::new();
            let mut current = start;
            while (step > 0.0 && current < end) || (step < 0.0 && current > end) {
                out.push(Value::from_f64(current));
                current += step;
                if out.len() > 1024 {
                    return Err("range would produce more than 1024 elements".to_string());
                }
            }
            Ok(Value::List(out))
        })
}

pub fn create_compact_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .build(|args: FuncArgs| {
            Ok(Value::List(
                args.list(0)?
                    .iter()
                    .filter(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
                    .cloned()
                    .collect(),
            ))
        })
}

pub fn create_coalesce_func() -> FuncDef {
    FuncDef::builder()
        .variadic_param(ParamType::Any)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            args.iter()
                .find(|v| !v.is_null() && v.as_str() != Some(""))
                .cloned()
                .ok_or_else(|| "no non-null, non-empty arguments".to_string())
        })
}

pub fn create_coalescelist_func() -> FuncDef {
    FuncDef::builder()
        .variadic_param(ParamType::List)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            args.iter()
                .find(|v| v.as_list().map(|l| !l.is_empty()).unwrap_or(false))
                .cloned()
                .ok_or_else(|| "no non-empty list arguments".to_string())
        })
}

pub fn create_chunklist_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .param(ParamType::Number)
        .unknown_tolerant()
        .build(|args: FuncArgs| {
            let items = args.list(0)?;
            let size = args.int(1)?;
            if size < 0 {
                return Err("chunk size must not be negative".to_string());
            }
            if size == 0 {
                return Ok(Value::List(vec![Value::List(items.clone())]));
            }
            Ok(Value::List(
                items
                    .chunks(size as usize)
                    .map(|c| Value::List(c.to_vec()))
                    .collect(),
            ))
        })
}

fn set_args(args: &FuncArgs) -> Result<Vec<Vec<Value>>, String> {
    (0..args.len())
        .map(|i| args.list(i).map(|l| to_set(l)))
        .collect()
}

pub fn create_setunion_func() -> FuncDef {
    FuncDef::builder()
        .variadic_param(ParamType::List)
        .build(|args: FuncArgs| {
            let all: Vec<Value> = set_args(&args)?.into_iter().flatten().collect();
            Ok(Value::List(to_set(&all)))
        })
}

pub fn create_setintersection_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .variadic_param(ParamType::List)
        .build(|args: FuncArgs| {
            let sets = set_args(&args)?;
            let (first, rest) = sets.split_first().ok_or("missing arguments")?;
            Ok(Value::List(
                first
                    .iter()
                    .filter(|v| rest.iter().all(|s| s.iter().any(|w| values_equal(v, w))))
                    .cloned()
                    .collect(),
            ))
        })
}

pub fn create_setsubtract_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .param(ParamType::List)
        .build(|args: FuncArgs| {
            let a = to_set(args.list(0)?);
            let b = args.list(1)?;
            Ok(Value::List(
                a.into_iter()
                    .filter(|v| !b.iter().any(|w| values_equal(v, w)))
                    .collect(),
            ))
        })
}

pub fn create_one_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .unknown_tolerant()
        .build(|args: FuncArgs| match args.list(0)?.as_slice() {
            [] => Ok(Value::Null),
            [only] => Ok(only.clone()),
            _ => Err("must be a list with zero or one elements".to_string()),
        })
}

pub fn create_alltrue_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .build(|args: FuncArgs| {
            Ok(Value::from(args.list(0)?.iter().all(|v| {
                v.as_bool() == Some(true) || v.as_str() == Some("true")
            })))
        })
}

pub fn create_anytrue_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .build(|args: FuncArgs| {
            Ok(Value::from(args.list(0)?.iter().any(|v| {
                v.as_bool() == Some(true) || v.as_str() == Some("true")
            })))
        })
}

pub fn create_sum_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::List)
        .build(|args: FuncArgs| {
            let items = args.list(0)?;
            if items.is_empty() {
                return Err("cannot sum an empty list".to_string());
            }
            let mut total = 0.0;
            for item in items {
                total += item.as_f64().ok_or("sum requires a list of numbers")?;
            }
            Ok(Value::from_f64(total))
        })
}

#[cfg(test)]
mod tests {
    use crate::frontend::builtins::test_support::eval;
    use crate::frontend::value::Value;
    use serde_json::json;

    fn json_of(expr: &str) -> serde_json::Value {
        eval(expr).unwrap().to_json()
    }

    #[test]
    fn test_length_function() {
        assert_eq!(eval("length([1, 2, 3])").unwrap(), Value::from(3));
        assert_eq!(eval("length({a = 1})").unwrap(), Value::from(1));
        assert_eq!(eval("length(\"héllo\")").unwrap(), Value::from(5));
    }

    #[test]
    fn test_list_functions() {
        assert_eq!(json_of("concat([1], [2, 3])"), json!([1, 2, 3]));
        assert_eq!(json_of("flatten([[1, [2]], 3])"), json!([1, 2, 3]));
        assert_eq!(
            json_of("distinct([\"a\", \"b\", \"a\"])"),
            json!(["a", "b"])
        );
        assert_eq!(
            json_of("slice([\"a\", \"b\", \"c\"], 1, 3)"),
            json!(["b", "c"])
        );
        assert_eq!(
            json_of("sort([\"b\", \"c\", \"a\"])"),
            json!(["a", "b", "c"])
        );
        assert_eq!(json_of("reverse([1, 2])"), json!([2, 1]));
        assert_eq!(json_of("element([\"a\", \"b\"], 3)"), json!("b"));
        assert_eq!(json_of("index([\"a\", \"b\"], \"b\")"), json!(1));
        assert_eq!(json_of("contains([1, 2], 2)"), json!(true));
        assert_eq!(json_of("compact([\"a\", \"\", null])"), json!(["a"]));
        assert_eq!(json_of("chunklist([1, 2, 3], 2)"), json!([[1, 2], [3]]));
        assert_eq!(json_of("range(3)"), json!([0, 1, 2]));
        assert_eq!(json_of("range(1, 8, 3)"), json!([1, 4, 7]));
    }

    #[test]
    fn test_map_functions() {
        assert_eq!(json_of("keys({b = 1, a = 2})"), json!(["a", "b"]));
        assert_eq!(json_of("values({b = 1, a = 2})"), json!([2, 1]));
        assert_eq!(json_of("lookup({a = 1}, \"b\", 0)"), json!(0));
        assert_eq!(
            json_of("merge({a = 1, b = 2}, {b = 3})"),
            json!({"a": 1, "b": 3})
        );
        assert_eq!(
            json_of("zipmap([\"a\", \"b\"], [1, 2])"),
            json!({"a": 1, "b": 2})
        );
        assert!(eval("lookup({a = 1}, \"b\")").is_err());
    }

    #[test]
    fn test_set_functions() {
        assert_eq!(
            json_of("setunion([\"b\"], [\"a\", \"b\"])"),
            json!(["a", "b"])
        );
        assert_eq!(json_of("setintersection([1, 2], [2, 3])"), json!([2]));
        assert_eq!(json_of("setsubtract([1, 2, 3], [2])"), json!([1, 3]));
    }

    #[test]
    fn test_coalesce_and_friends() {
        assert_eq!(json_of("coalesce(null, \"\", \"x\")"), json!("x"));
        assert_eq!(json_of("coalescelist([], [1])"), json!([1]));
        assert_eq!(json_of("one([])"), json!(null));
        assert_eq!(json_of("alltrue([true, \"true\"])"), json!(true));
        assert_eq!(json_of("anytrue([false])"), json!(false));
        assert_eq!(json_of("sum([1, 2.5])"), json!(3.5));
    }
}
