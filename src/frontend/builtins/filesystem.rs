use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use globset::GlobBuilder;
use hcl::template::Template;
use path_absolutize::Absolutize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::{create_function_table, FuncArgs, FuncDef, ParamType};
use crate::frontend::core::render_template_value;
use crate::frontend::env::{EnvVars, Scope};
use crate::frontend::value::Value;

fn resolve(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn read_bytes(root: &Path, path: &str) -> Result<Vec<u8>, String> {
    fs::read(resolve(root, path)).map_err(|e| format!("unable to read {path}: {e}"))
}

fn read_string(root: &Path, path: &str) -> Result<String, String> {
    String::from_utf8(read_bytes(root, path)?)
        .map_err(|_| format!("contents of {path} are not valid UTF-8"))
}

/// Read a file as a string
pub fn create_file_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .build(move |args: FuncArgs| read_string(&root, args.str(0)?).map(Value::from))
}

pub fn create_fileexists_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .build(move |args: FuncArgs| {
            let path = resolve(&root, args.str(0)?);
            if path.is_dir() {
                return Err(format!("{} is a directory", path.display()));
            }
            Ok(Value::Bool(path.is_file()))
        })
}

/// Enumerate files under a directory matching a glob pattern, relative to that directory
pub fn create_fileset_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(move |args: FuncArgs| {
            let base = resolve(&root, args.str(0)?);
            let matcher = GlobBuilder::new(args.str(1)?)
                .literal_separator(true)
                .build()
                .map_err(|e| format!("invalid pattern: {e}"))?
                .compile_matcher();
            let mut matches = Vec::new();
            for entry in WalkDir::new(&base).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&base) else {
                    continue;
                };
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if matcher.is_match(&rel) {
                    matches.push(rel);
                }
            }
            matches.sort();
            Ok(Value::List(matches.into_iter().map(Value::from).collect()))
        })
}

pub fn create_filebase64_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .build(move |args: FuncArgs| {
            let bytes = read_bytes(&root, args.str(0)?)?;
            Ok(Value::from(general_purpose::STANDARD.encode(bytes)))
        })
}

pub fn create_filemd5_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .build(move |args: FuncArgs| {
            let bytes = read_bytes(&root, args.str(0)?)?;
            Ok(Value::from(format!("{:x}", md5::compute(bytes))))
        })
}

pub fn create_filesha256_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .build(move |args: FuncArgs| {
            let bytes = read_bytes(&root, args.str(0)?)?;
            Ok(Value::from(format!("{:x}", Sha256::digest(bytes))))
        })
}

/// Render a template file with the given variables in scope
pub fn create_templatefile_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Map)
        .unknown_tolerant()
        .build(move |args: FuncArgs| {
            let text = read_string(&root, args.str(0)?)?;
            let template: Template = text.parse().map_err(|e| {
                format!("invalid template {}: {e}", args.str(0).unwrap_or_default())
            })?;
            let scope = Scope::new(&root, &root);
            let functions = create_function_table(&root);
            let mut env = EnvVars::new(&scope, &functions);
            for (name, value) in args.map(1)? {
                env.bindings.insert(name.clone(), value.clone());
            }
            render_template_value(&template, &text, &env).map_err(|e| e.to_string())
        })
}

pub fn create_dirname_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let path = args.str(0)?;
            let dir = match path.rfind('/') {
                Some(0) => "/",
                Some(i) => &path[..i],
                None => ".",
            };
            Ok(Value::from(dir))
        })
}

pub fn create_basename_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let path = args.str(0)?.trim_end_matches('/');
            let base = match path.rfind('/') {
                Some(i) => &path[i + 1..],
                None if path.is_empty() => "/",
                None => path,
            };
            Ok(Value::from(base))
        })
}

pub fn create_abspath_func(root: &Path) -> FuncDef {
    let root = root.to_path_buf();
    FuncDef::builder()
        .param(ParamType::String)
        .build(move |args: FuncArgs| {
            let path = resolve(&root, args.str(0)?);
            let abs = path
                .absolutize()
                .map_err(|e| format!("unable to resolve {}: {e}", path.display()))?;
            Ok(Value::from(abs.to_string_lossy().replace('\\', "/")))
        })
}

pub fn create_pathexpand_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let path = args.str(0)?;
            let home = std::env::var("HOME").ok();
            let expanded = match (path.strip_prefix('~'), home) {
                (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
                    format!("{home}{rest}")
                }
                _ => path.to_string(),
            };
            Ok(Value::from(expanded))
        })
}
