use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256, Sha512};

use super::{FuncArgs, FuncDef, ParamType};
use crate::frontend::value::{Unknown, Value};

/// Cryptographic functions
pub fn create_md5_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let digest = md5::compute(args.str(0)?.as_bytes());
            Ok(Value::from(format!("{:x}", digest)))
        })
}

pub fn create_sha256_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let result = Sha256::digest(args.str(0)?.as_bytes());
            Ok(Value::from(format!("{:x}", result)))
        })
}

pub fn create_sha512_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let result = Sha512::digest(args.str(0)?.as_bytes());
            Ok(Value::from(format!("{:x}", result)))
        })
}

pub fn create_base64sha256_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let result = Sha256::digest(args.str(0)?.as_bytes());
            Ok(Value::from(general_purpose::STANDARD.encode(result)))
        })
}

pub fn create_base64sha512_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let result = Sha512::digest(args.str(0)?.as_bytes());
            Ok(Value::from(general_purpose::STANDARD.encode(result)))
        })
}

/// A fresh uuid is only known at apply time.
pub fn create_uuid_func() -> FuncDef {
    FuncDef::builder().build(|_: FuncArgs| Ok(Unknown::new("uuid()", "uuid").into()))
}

#[cfg(test)]
mod tests {
    use crate::frontend::builtins::test_support::eval;
    use crate::frontend::value::Value;

    #[test]
    fn test_md5_function() {
        assert_eq!(
            eval("md5(\"hello world\")").unwrap(),
            Value::from("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
    }

    #[test]
    fn test_sha256_function() {
        assert_eq!(
            eval("sha256(\"hello world\")").unwrap(),
            Value::from("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
    }

    #[test]
    fn test_sha512_function() {
        assert_eq!(
            eval("sha512(\"hello world\")").unwrap(),
            Value::from(
                "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f"
            )
        );
    }

    #[test]
    fn test_base64sha256_function() {
        assert_eq!(
            eval("base64sha256(\"hello world\")").unwrap(),
            Value::from("uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek=")
        );
    }

    #[test]
    fn test_uuid_is_unknown() {
        assert!(eval("uuid()").unwrap().is_unknown());
    }
}
