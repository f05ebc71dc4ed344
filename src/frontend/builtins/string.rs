use regex::Regex;

use super::{FuncArgs, FuncDef, FuncResult, ParamType};
use crate::frontend::value::{Map, Value};

/// String manipulation functions
pub fn create_upper_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.to_uppercase())))
}

pub fn create_lower_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.to_lowercase())))
}

pub fn create_title_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let mut out = String::new();
            let mut at_word_start = true;
            for c in args.str(0)?.chars() {
                if at_word_start && c.is_alphabetic() {
                    out.extend(c.to_uppercase());
                } else {
                    out.push(c);
                }
                at_word_start = !c.is_alphanumeric();
            }
            Ok(Value::from(out))
        })
}

pub fn create_trim_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let cutset: Vec<char> = args.str(1)?.chars().collect();
            Ok(Value::from(args.str(0)?.trim_matches(cutset.as_slice())))
        })
}

pub fn create_trimspace_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.trim())))
}

pub fn create_trimprefix_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let s = args.str(0)?;
            Ok(Value::from(s.strip_prefix(args.str(1)?).unwrap_or(s)))
        })
}

pub fn create_trimsuffix_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let s = args.str(0)?;
            Ok(Value::from(s.strip_suffix(args.str(1)?).unwrap_or(s)))
        })
}

pub fn create_chomp_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.trim_end_matches(['\n', '\r']))))
}

/// `replace` treats a substring wrapped in slashes as a regular expression.
pub fn create_replace_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let s = args.str(0)?;
            let from = args.str(1)?;
            let to = args.str(2)?;
            if from.len() > 1 && from.starts_with('/') && from.ends_with('/') {
                let re = Regex::new(&from[1..from.len() - 1]).map_err(|e| e.to_string())?;
                Ok(Value::from(re.replace_all(s, to).into_owned()))
            } else {
                Ok(Value::from(s.replace(from, to)))
            }
        })
}

pub fn create_substr_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let chars: Vec<char> = args.str(0)?.chars().collect();
            let len = chars.len() as i64;
            let mut offset = args.int(1)?;
            let length = args.int(2)?;
            if offset < 0 {
                offset += len;
            }
            if offset < 0 || offset > len {
                return Err("offset out of range".to_string());
            }
            let end = if length < 0 {
                len
            } else {
                offset.saturating_add(length).min(len)
            };
            Ok(Value::from(
                chars[offset as usize..end as usize]
                    .iter()
                    .collect::<String>(),
            ))
        })
}

pub fn create_split_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let sep = args.str(0)?;
            let s = args.str(1)?;
            if s.is_empty() {
                return Ok(Value::List(vec![Value::from("")]));
            }
            Ok(Value::List(s.split(sep).map(Value::from).collect()))
        })
}

pub fn create_join_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::List)
        .build(|args: FuncArgs| {
            let sep = args.str(0)?;
            let mut parts = Vec::new();
            for list in &args[1..] {
                for item in list.as_list().into_iter().flatten() {
                    parts.push(item.to_template_string()?);
                }
            }
            Ok(Value::from(parts.join(sep)))
        })
}

/// Apply a printf-style format spec (`%s`, `%d`, `%v`, `%q`, `%f`, `%t`, `%x`, `%%`).
fn format_spec(spec: &str, values: &[Value]) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = spec.chars().peekable();
    let mut next = values.iter();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        let mut verb = chars.next().ok_or("format string ends with %")?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        if verb == '.' {
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok().map(|p| p.min(64));
            verb = chars.next().ok_or("incomplete format verb")?;
        }
        let value = next
            .next()
            .ok_or_else(|| format!("not enough arguments for %{verb}"))?;
        match verb {
            's' | 'v' => match value {
                Value::List(_) | Value::Map(_) => out.push_str(&value.to_json().to_string()),
                other => out.push_str(&other.to_template_string()?),
            },
            'q' => out.push_str(
                &serde_json::to_string(&value.to_template_string()?).map_err(|e| e.to_string())?,
            ),
            'd' => out.push_str(
                &value
                    .as_i64()
                    .ok_or("%d requires a whole number")?
                    .to_string(),
            ),
            'f' => {
                let f = value.as_f64().ok_or("%f requires a number")?;
                out.push_str(&format!("{:.*}", precision.unwrap_or(6), f));
            }
            't' => out.push_str(&value.as_bool().ok_or("%t requires a bool")?.to_string()),
            'x' => out.push_str(&format!(
                "{:x}",
                value.as_i64().ok_or("%x requires a whole number")?
            )),
            other => return Err(format!("unsupported format verb %{other}")),
        }
    }
    Ok(out)
}

pub fn create_format_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .build(|args: FuncArgs| Ok(Value::from(format_spec(args.str(0)?, &args[1..])?)))
}

pub fn create_formatlist_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .build(|args: FuncArgs| {
            let spec = args.str(0)?;
            let rest = &args[1..];
            let len = rest
                .iter()
                .filter_map(Value::as_list)
                .map(Vec::len)
                .max()
                .unwrap_or(1);
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let row: Vec<Value> = rest
                    .iter()
                    .map(|v| match v {
                        Value::List(items) => items.get(i).cloned().unwrap_or_default(),
                        other => other.clone(),
                    })
                    .collect();
                out.push(Value::from(format_spec(spec, &row)?));
            }
            Ok(Value::List(out))
        })
}

const MAX_INDENT: i64 = 1024;

pub fn create_indent_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let spaces = args.int(0)?;
            if spaces > MAX_INDENT {
                return Err(format!(
                    "indentation of {spaces} exceeds {MAX_INDENT} spaces"
                ));
            }
            let pad = " ".repeat(spaces.max(0) as usize);
            let indented = args.str(1)?.replace('\n', &format!("\n{pad}"));
            Ok(Value::from(indented))
        })
}

pub fn create_strrev_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.chars().rev().collect::<String>())))
}

pub fn create_startswith_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.starts_with(args.str(1)?))))
}

pub fn create_endswith_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.ends_with(args.str(1)?))))
}

pub fn create_strcontains_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(args.str(0)?.contains(args.str(1)?))))
}

/// Result of one regex match: the match itself, a list of groups, or a map of named groups.
fn capture_value(re: &Regex, caps: &regex::Captures<'_>) -> Value {
    let names: Vec<&str> = re.capture_names().flatten().collect();
    if !names.is_empty() {
        let mut map = Map::new();
        for name in names {
            let v = caps
                .name(name)
                .map(|m| Value::from(m.as_str()))
                .unwrap_or_default();
            map.insert(name.to_string(), v);
        }
        Value::Map(map)
    } else if re.captures_len() > 1 {
        Value::List(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| Value::from(m.as_str())).unwrap_or_default())
                .collect(),
        )
    } else {
        caps.get(0)
            .map(|m| Value::from(m.as_str()))
            .unwrap_or_default()
    }
}

pub fn create_regex_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| -> FuncResult {
            let re = Regex::new(args.str(0)?).map_err(|e| e.to_string())?;
            let caps = re.captures(args.str(1)?).ok_or("pattern did not match")?;
            Ok(capture_value(&re, &caps))
        })
}

pub fn create_regexall_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let re = Regex::new(args.str(0)?).map_err(|e| e.to_string())?;
            Ok(Value::List(
                re.captures_iter(args.str(1)?)
                    .map(|caps| capture_value(&re, &caps))
                    .collect(),
            ))
        })
}
