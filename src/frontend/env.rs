use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::frontend::builtins::FunctionTable;
use crate::frontend::parser::relative_to;
use crate::frontend::value::Value;

/// Everything one module run has resolved so far.
///
/// Namespaces:
/// - `var.<name>` from [`Self::vars`]
/// - `local.<name>` from [`Self::locals`]
/// - `<type>.<name>`, `data.<type>.<name>` and `module.<name>` from [`Self::blocks`], keyed
///   by the unindexed block address
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub module_dir: PathBuf,
    pub root_dir: PathBuf,
    pub cwd: PathBuf,
    pub workspace: String,
    pub vars: HashMap<String, Value>,
    pub locals: HashMap<String, Value>,
    pub blocks: HashMap<String, Value>,
    /// Addresses of every resource, data source and module call declared in the module.
    pub declared: HashSet<String>,
}

impl Scope {
    pub fn new(module_dir: &Path, root_dir: &Path) -> Self {
        Self {
            module_dir: module_dir.to_path_buf(),
            root_dir: root_dir.to_path_buf(),
            cwd: std::env::current_dir().unwrap_or_else(|_| root_dir.to_path_buf()),
            workspace: "default".to_string(),
            ..Default::default()
        }
    }

    /// `path.module`: module directory relative to the root.
    pub fn path_module(&self) -> String {
        relative_to(&self.root_dir, &self.module_dir)
    }
}

/// Evaluation context: a module [`Scope`] plus the iteration bindings in effect.
#[derive(Clone)]
pub struct EnvVars<'a> {
    pub scope: &'a Scope,
    pub functions: &'a FunctionTable,
    /// `each.key` / `each.value` inside `for_each` instances.
    pub each: Option<(Value, Value)>,
    /// `count.index` inside `count` instances; unknown when the count itself is.
    pub count: Option<Value>,
    /// for-expression variables and dynamic block iterators.
    pub bindings: HashMap<String, Value>,
}

impl<'a> EnvVars<'a> {
    pub fn new(scope: &'a Scope, functions: &'a FunctionTable) -> Self {
        Self {
            scope,
            functions,
            each: None,
            count: None,
            bindings: HashMap::new(),
        }
    }

    pub fn with_each(&self, key: Value, value: Value) -> Self {
        let mut env = self.clone();
        env.each = Some((key, value));
        env
    }

    pub fn with_count(&self, index: Value) -> Self {
        let mut env = self.clone();
        env.count = Some(index);
        env
    }

    pub fn with_binding(&self, name: impl Into<String>, value: Value) -> Self {
        let mut env = self.clone();
        env.bindings.insert(name.into(), value);
        env
    }
}
