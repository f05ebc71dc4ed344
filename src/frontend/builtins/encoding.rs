use base64::{engine::general_purpose, Engine as _};

use super::{FuncArgs, FuncDef, ParamType};
use crate::frontend::value::Value;

/// Encode a string to base64
pub fn create_base64encode_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(general_purpose::STANDARD.encode(args.str(0)?))))
}

/// Decode a base64 string; the result must be valid UTF-8
pub fn create_base64decode_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let bytes = general_purpose::STANDARD
                .decode(args.str(0)?)
                .map_err(|e| e.to_string())?;
            String::from_utf8(bytes)
                .map(Value::from)
                .map_err(|e| e.to_string())
        })
}

/// Percent-encode a string for use in a URL query
pub fn create_urlencode_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let encoded: String = url::form_urlencoded::byte_serialize(args.str(0)?.as_bytes())
                .collect::<String>()
                .replace('+', "%20");
            Ok(Value::from(encoded))
        })
}
