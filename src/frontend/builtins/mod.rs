//! Built-in function library.
//!
//! Functions are declared with the same builder shape as `hcl::eval::FuncDef` but operate
//! on [`Value`], so they can see and propagate unknowns.
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;

use crate::frontend::value::{Map, Value};

pub mod collection;
pub mod conversion;
pub mod crypto;
pub mod datetime;
pub mod encoding;
pub mod filesystem;
pub mod numeric;
pub mod string;

pub type FuncResult = Result<Value, String>;

/// Expected type of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Any,
    String,
    Number,
    Bool,
    List,
    Map,
}

impl ParamType {
    /// Check and convert one argument, applying the implicit primitive conversions.
    fn accept(self, index: usize, value: Value) -> Result<Value, String> {
        let mismatch = |v: &Value| {
            format!(
                "argument {} must be {}, got {}",
                index + 1,
                self.name(),
                v.type_name()
            )
        };
        match (self, value) {
            (ParamType::Any, v) => Ok(v),
            (ParamType::String, Value::String(s)) => Ok(Value::String(s)),
            (ParamType::String, v @ (Value::Number(_) | Value::Bool(_))) => {
                Ok(Value::String(v.to_template_string()?))
            }
            (ParamType::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::from_f64)
                .map_err(|_| format!("argument {}: cannot convert {s:?} to number", index + 1)),
            (ParamType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ParamType::Bool, Value::String(s)) if s == "true" || s == "false" => {
                Ok(Value::Bool(s == "true"))
            }
            (ParamType::List, Value::List(l)) => Ok(Value::List(l)),
            (ParamType::Map, Value::Map(m)) => Ok(Value::Map(m)),
            (_, v) => Err(mismatch(&v)),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ParamType::Any => "any value",
            ParamType::String => "a string",
            ParamType::Number => "a number",
            ParamType::Bool => "a bool",
            ParamType::List => "a list",
            ParamType::Map => "a map",
        }
    }
}

/// Checked arguments of one call.
#[derive(Debug, Clone)]
pub struct FuncArgs(Vec<Value>);

impl FuncArgs {
    pub fn new(args: Vec<Value>) -> Self {
        FuncArgs(args)
    }

    pub fn str(&self, i: usize) -> Result<&str, String> {
        self.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("argument {} must be a string", i + 1))
    }

    pub fn number(&self, i: usize) -> Result<f64, String> {
        self.get(i)
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("argument {} must be a number", i + 1))
    }

    pub fn int(&self, i: usize) -> Result<i64, String> {
        self.get(i)
            .and_then(Value::as_i64)
            .ok_or_else(|| format!("argument {} must be a whole number", i + 1))
    }

    pub fn bool(&self, i: usize) -> Result<bool, String> {
        self.get(i)
            .and_then(Value::as_bool)
            .ok_or_else(|| format!("argument {} must be a bool", i + 1))
    }

    pub fn list(&self, i: usize) -> Result<&Vec<Value>, String> {
        self.get(i)
            .and_then(Value::as_list)
            .ok_or_else(|| format!("argument {} must be a list", i + 1))
    }

    pub fn map(&self, i: usize) -> Result<&Map, String> {
        self.get(i)
            .and_then(Value::as_map)
            .ok_or_else(|| format!("argument {} must be a map", i + 1))
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl Deref for FuncArgs {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

type Func = Box<dyn Fn(FuncArgs) -> FuncResult>;

pub struct FuncDef {
    params: Vec<ParamType>,
    variadic: Option<ParamType>,
    unknown_tolerant: bool,
    func: Func,
}

impl FuncDef {
    pub fn builder() -> FuncDefBuilder {
        FuncDefBuilder {
            params: Vec::new(),
            variadic: None,
            unknown_tolerant: false,
        }
    }

    /// Call the function. Unless the function tolerates unknowns, the first unknown found
    /// in the arguments is returned instead.
    pub fn call(&self, args: Vec<Value>) -> FuncResult {
        if args.len() < self.params.len()
            || (self.variadic.is_none() && args.len() > self.params.len())
        {
            return Err(match self.variadic {
                Some(_) => format!(
                    "expected at least {} argument(s), got {}",
                    self.params.len(),
                    args.len()
                ),
                None => format!(
                    "expected {} argument(s), got {}",
                    self.params.len(),
                    args.len()
                ),
            });
        }
        let unknown = if self.unknown_tolerant {
            args.iter().find_map(Value::as_unknown)
        } else {
            args.iter().find_map(Value::find_unknown)
        };
        if let Some(u) = unknown {
            return Ok(Value::Unknown(u.clone()));
        }

        let mut checked = Vec::with_capacity(args.len());
        for (i, arg) in args.into_iter().enumerate() {
            let param = self
                .params
                .get(i)
                .copied()
                .or(self.variadic)
                .unwrap_or(ParamType::Any);
            if arg.is_null() && param != ParamType::Any {
                return Err(format!("argument {} must not be null", i + 1));
            }
            checked.push(param.accept(i, arg)?);
        }
        (self.func)(FuncArgs(checked))
    }
}

pub struct FuncDefBuilder {
    params: Vec<ParamType>,
    variadic: Option<ParamType>,
    unknown_tolerant: bool,
}

impl FuncDefBuilder {
    pub fn param(mut self, param: ParamType) -> Self {
        self.params.push(param);
        self
    }

    pub fn variadic_param(mut self, param: ParamType) -> Self {
        self.variadic = Some(param);
        self
    }

    /// Accept arguments that merely contain unknowns; only a wholly unknown argument
    /// short-circuits the call.
    pub fn unknown_tolerant(mut self) -> Self {
        self.unknown_tolerant = true;
        self
    }

    pub fn build<F>(self, func: F) -> FuncDef
    where
        F: Fn(FuncArgs) -> FuncResult + 'static,
    {
        FuncDef {
            params: self.params,
            variadic: self.variadic,
            unknown_tolerant: self.unknown_tolerant,
            func: Box::new(func),
        }
    }
}

/// Functions available to one invocation.
#[derive(Default)]
pub struct FunctionTable {
    funcs: HashMap<String, FuncDef>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_func(&mut self, name: impl Into<String>, func: FuncDef) {
        self.funcs.insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Option<&FuncDef> {
        self.funcs.get(name)
    }

    pub fn call(&self, name: &str, args: Vec<Value>) -> FuncResult {
        let func = self
            .get(name)
            .ok_or_else(|| format!("call to unknown function '{name}'"))?;
        func.call(args).map_err(|e| format!("{name}: {e}"))
    }
}

/// Build the function table; filesystem functions resolve relative paths against `root`.
pub fn create_function_table(root: &Path) -> FunctionTable {
    let mut table = FunctionTable::new();

    // String functions
    table.declare_func("upper", string::create_upper_func());
    table.declare_func("lower", string::create_lower_func());
    table.declare_func("title", string::create_title_func());
    table.declare_func("trim", string::create_trim_func());
    table.declare_func("trimspace", string::create_trimspace_func());
    table.declare_func("trimprefix", string::create_trimprefix_func());
    table.declare_func("trimsuffix", string::create_trimsuffix_func());
    table.declare_func("chomp", string::create_chomp_func());
    table.declare_func("replace", string::create_replace_func());
    table.declare_func("substr", string::create_substr_func());
    table.declare_func("split", string::create_split_func());
    table.declare_func("join", string::create_join_func());
    table.declare_func("format", string::create_format_func());
    table.declare_func("formatlist", string::create_formatlist_func());
    table.declare_func("indent", string::create_indent_func());
    table.declare_func("strrev", string::create_strrev_func());
    table.declare_func("startswith", string::create_startswith_func());
    table.declare_func("endswith", string::create_endswith_func());
    table.declare_func("strcontains", string::create_strcontains_func());
    table.declare_func("regex", string::create_regex_func());
    table.declare_func("regexall", string::create_regexall_func());

    // Collection functions
    table.declare_func("length", collection::create_length_func());
    table.declare_func("concat", collection::create_concat_func());
    table.declare_func("flatten", collection::create_flatten_func());
    table.declare_func("distinct", collection::create_distinct_func());
    table.declare_func("slice", collection::create_slice_func());
    table.declare_func("sort", collection::create_sort_func());
    table.declare_func("reverse", collection::create_reverse_func());
    table.declare_func("index", collection::create_index_func());
    table.declare_func("element", collection::create_element_func());
    table.declare_func("contains", collection::create_contains_func());
    table.declare_func("keys", collection::create_keys_func());
    table.declare_func("values", collection::create_values_func());
    table.declare_func("lookup", collection::create_lookup_func());
    table.declare_func("merge", collection::create_merge_func());
    table.declare_func("zipmap", collection::create_zipmap_func());
    table.declare_func("range", collection::create_range_func());
    table.declare_func("compact", collection::create_compact_func());
    table.declare_func("coalesce", collection::create_coalesce_func());
    table.declare_func("coalescelist", collection::create_coalescelist_func());
    table.declare_func("chunklist", collection::create_chunklist_func());
    table.declare_func("setunion", collection::create_setunion_func());
    table.declare_func("setintersection", collection::create_setintersection_func());
    table.declare_func("setsubtract", collection::create_setsubtract_func());
    table.declare_func("one", collection::create_one_func());
    table.declare_func("alltrue", collection::create_alltrue_func());
    table.declare_func("anytrue", collection::create_anytrue_func());
    table.declare_func("sum", collection::create_sum_func());

    // Numeric functions
    table.declare_func("min", numeric::create_min_func());
    table.declare_func("max", numeric::create_max_func());
    table.declare_func("abs", numeric::create_abs_func());
    table.declare_func("ceil", numeric::create_ceil_func());
    table.declare_func("floor", numeric::create_floor_func());
    table.declare_func("pow", numeric::create_pow_func());
    table.declare_func("signum", numeric::create_signum_func());
    table.declare_func("parseint", numeric::create_parseint_func());

    // Conversion functions
    table.declare_func("tostring", conversion::create_tostring_func());
    table.declare_func("tonumber", conversion::create_tonumber_func());
    table.declare_func("tobool", conversion::create_tobool_func());
    table.declare_func("tolist", conversion::create_tolist_func());
    table.declare_func("toset", conversion::create_toset_func());
    table.declare_func("tomap", conversion::create_tomap_func());
    table.declare_func("jsonencode", conversion::create_jsonencode_func());
    table.declare_func("jsondecode", conversion::create_jsondecode_func());

    // Encoding functions
    table.declare_func("base64encode", encoding::create_base64encode_func());
    table.declare_func("base64decode", encoding::create_base64decode_func());
    table.declare_func("urlencode", encoding::create_urlencode_func());

    // Cryptographic functions
    table.declare_func("md5", crypto::create_md5_func());
    table.declare_func("sha256", crypto::create_sha256_func());
    table.declare_func("sha512", crypto::create_sha512_func());
    table.declare_func("base64sha256", crypto::create_base64sha256_func());
    table.declare_func("base64sha512", crypto::create_base64sha512_func());
    table.declare_func("uuid", crypto::create_uuid_func());

    // Date and time functions
    table.declare_func("timestamp", datetime::create_timestamp_func());
    table.declare_func("formatdate", datetime::create_formatdate_func());
    table.declare_func("timeadd", datetime::create_timeadd_func());
    table.declare_func("timecmp", datetime::create_timecmp_func());

    // Filesystem functions
    table.declare_func("file", filesystem::create_file_func(root));
    table.declare_func("fileexists", filesystem::create_fileexists_func(root));
    table.declare_func("fileset", filesystem::create_fileset_func(root));
    table.declare_func("filebase64", filesystem::create_filebase64_func(root));
    table.declare_func("filemd5", filesystem::create_filemd5_func(root));
    table.declare_func("filesha256", filesystem::create_filesha256_func(root));
    table.declare_func("templatefile", filesystem::create_templatefile_func(root));
    table.declare_func("dirname", filesystem::create_dirname_func());
    table.declare_func("basename", filesystem::create_basename_func());
    table.declare_func("abspath", filesystem::create_abspath_func(root));
    table.declare_func("pathexpand", filesystem::create_pathexpand_func());

    table
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::value::Unknown;

    #[test]
    fn arity_is_checked() {
        let table = create_function_table(Path::new("."));
        let err = table.call("upper", vec![]).unwrap_err();
        assert!(err.contains("expected 1 argument"));
    }

    #[test]
    fn unknown_arguments_propagate() {
        let table = create_function_table(Path::new("."));
        let unknown = Value::from(Unknown::new("var.name", "name"));
        assert_eq!(table.call("upper", vec![unknown.clone()]), Ok(unknown));
    }

    #[test]
    fn tolerant_functions_accept_nested_unknowns() {
        let table = create_function_table(Path::new("."));
        let list = Value::List(vec![Value::from("a"), Unknown::new("x.y.id", "y").into()]);
        assert_eq!(table.call("length", vec![list]), Ok(Value::from(2)));
    }

    #[test]
    fn primitive_arguments_convert_implicitly() {
        let table = create_function_table(Path::new("."));
        assert_eq!(
            table.call("upper", vec![Value::from(true)]),
            Ok(Value::from("TRUE"))
        );
    }
}
