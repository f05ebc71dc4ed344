use super::{FuncArgs, FuncDef, ParamType};
use crate::frontend::value::Value;

/// Numeric functions
pub fn create_min_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .variadic_param(ParamType::Number)
        .build(|args: FuncArgs| {
            let mut best = args.number(0)?;
            for i in 1..args.len() {
                best = best.min(args.number(i)?);
            }
            Ok(Value::from_f64(best))
        })
}

pub fn create_max_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .variadic_param(ParamType::Number)
        .build(|args: FuncArgs| {
            let mut best = args.number(0)?;
            for i in 1..args.len() {
                best = best.max(args.number(i)?);
            }
            Ok(Value::from_f64(best))
        })
}

pub fn create_abs_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(Value::from_f64(args.number(0)?.abs())))
}

pub fn create_ceil_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(Value::from_f64(args.number(0)?.ceil())))
}

pub fn create_floor_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(Value::from_f64(args.number(0)?.floor())))
}

pub fn create_pow_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(Value::from_f64(args.number(0)?.powf(args.number(1)?))))
}

pub fn create_signum_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let n = args.number(0)?;
            let sign = if n > 0.0 {
                1
            } else if n < 0.0 {
                -1
            } else {
                0
            };
            Ok(Value::from(sign as i64))
        })
}

pub fn create_parseint_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let base = args.int(1)?;
            if !(2..=36).contains(&base) {
                return Err(format!("base must be between 2 and 36, got {base}"));
            }
            i64::from_str_radix(args.str(0)?, base as u32)
                .map(Value::from)
                .map_err(|e| {
                    format!(
                        "cannot parse {:?} as base {base}: {e}",
                        args.str(0).unwrap_or_default()
                    )
                })
        })
}

#[cfg(test)]
mod tests {
    use crate::frontend::builtins::test_support::eval;
    use crate::frontend::value::Value;

    #[test]
    fn test_min_max() {
        assert_eq!(eval("min(3, 1, 2)").unwrap(), Value::from(1));
        assert_eq!(eval("max(3, 1, 2)").unwrap(), Value::from(3));
        assert_eq!(eval("max(\"4\", 2)").unwrap(), Value::from(4));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(eval("ceil(4.1)").unwrap(), Value::from(5));
        assert_eq!(eval("floor(4.9)").unwrap(), Value::from(4));
        assert_eq!(eval("abs(-12.4)").unwrap(), Value::from_f64(12.4));
    }

    #[test]
    fn test_pow_and_signum() {
        assert_eq!(eval("pow(2, 10)").unwrap(), Value::from(1024));
        assert_eq!(eval("signum(-7)").unwrap(), Value::from(-1));
    }

    #[test]
    fn test_parseint() {
        assert_eq!(eval("parseint(\"FF\", 16)").unwrap(), Value::from(255));
        assert!(eval("parseint(\"zz\", 10)").is_err());
    }
}
