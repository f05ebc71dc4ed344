//! Per-module evaluation.
//!
//! A module run resolves its variables, settles locals, block values and child module
//! outputs until nothing changes, then materializes every block instance once and links
//! references. Child modules are composed depth first; a child only re-runs when the
//! inputs its caller passes change between settle passes.
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;
use log::{debug, warn};

use crate::config::Options;
use crate::error::Error;
use crate::frontend::ast::{self, BlockKind, InstanceKey, ModuleSource};
use crate::frontend::builtins::{create_function_table, FunctionTable};
use crate::frontend::core::{self, find_attr, get_attr_string};
use crate::frontend::env::{EnvVars, Scope};
use crate::frontend::for_each::{self, BodyContext, EvaluatedBody, Instance};
use crate::frontend::modules::{Fetcher, GitFetcher, Manifest, ModuleResolver};
use crate::frontend::parser;
use crate::frontend::references;
use crate::frontend::value::{BlockTarget, Map, Unknown, Value};
use crate::frontend::variables::{self, VariableDecl};
use crate::ir::{self, IdGenerator, NestedBlock, SourceRange};
use crate::Loader;

/// Upper bound on settle passes per module run.
pub const MAX_PASSES: usize = 16;

/// Module block arguments that are not inputs of the child.
const MODULE_META_ARGS: &[&str] = &[
    "source",
    "version",
    "count",
    "for_each",
    "providers",
    "depends_on",
];

/// State shared by every module run of one invocation.
pub struct Session<'a> {
    pub options: &'a Options,
    pub loader: &'a dyn Loader,
    pub root: PathBuf,
    pub functions: FunctionTable,
    pub ids: IdGenerator,
    resolver: ModuleResolver,
    sources: RefCell<HashMap<PathBuf, Rc<ModuleSource>>>,
}

/// Blocks of a module run (its own first, then its children depth first) and its
/// output values.
#[derive(Debug, Default, Clone)]
pub struct ModuleRun {
    pub blocks: Vec<ir::Block>,
    pub outputs: Map,
}

/// How a module is invoked.
struct ModuleCall {
    dir: PathBuf,
    /// Path prefix of every block in the module, e.g. `module.net.`.
    prefix: String,
    /// Dotted chain of module names, used for manifest lookups.
    key: String,
    /// Caller inputs; `None` for the root module.
    inputs: Option<HashMap<String, Value>>,
}

/// A child module instance as of the latest settle pass.
struct ChildRun {
    inputs: HashMap<String, Value>,
    /// `None` when the module could not be loaded.
    run: Option<ModuleRun>,
}

#[derive(Default)]
struct Children {
    runs: HashMap<String, ChildRun>,
    /// Instance paths in declaration order as of the latest pass.
    order: Vec<String>,
}

impl<'a> Session<'a> {
    pub fn new(root: &Path, loader: &'a dyn Loader, options: &'a Options) -> Self {
        let fetcher = options
            .allow_downloads
            .then(|| Box::new(GitFetcher::default()) as Box<dyn Fetcher>);
        Self {
            options,
            loader,
            root: root.to_path_buf(),
            functions: create_function_table(root),
            ids: IdGenerator::new(),
            resolver: ModuleResolver::new(Manifest::load(loader, root), fetcher),
            sources: RefCell::new(HashMap::new()),
        }
    }

    /// Evaluate the root module and every module it calls.
    pub fn run_root(&self) -> Result<ModuleRun> {
        let call = ModuleCall {
            dir: self.root.clone(),
            prefix: String::new(),
            key: String::new(),
            inputs: None,
        };
        self.run_module(&call, &mut Vec::new())
    }

    /// Parsed blocks of a module directory, parsed once per invocation.
    fn source(&self, dir: &Path) -> Result<Rc<ModuleSource>> {
        if let Some(source) = self.sources.borrow().get(dir) {
            return Ok(source.clone());
        }
        let source = Rc::new(parser::load_module_dir(
            self.loader,
            dir,
            &self.root,
            self.options.stop_on_hcl_error,
        )?);
        self.sources
            .borrow_mut()
            .insert(dir.to_path_buf(), source.clone());
        Ok(source)
    }

    fn run_module(&self, call: &ModuleCall, stack: &mut Vec<PathBuf>) -> Result<ModuleRun> {
        let source = self.source(&call.dir)?;
        stack.push(call.dir.clone());
        let run = self.evaluate_module(&source, call, stack);
        stack.pop();
        run
    }

    fn evaluate_module(
        &self,
        source: &ModuleSource,
        call: &ModuleCall,
        stack: &mut Vec<PathBuf>,
    ) -> Result<ModuleRun> {
        let mut scope = Scope::new(&call.dir, &self.root);
        scope.workspace = self.options.workspace_name.clone();
        scope.declared = source
            .blocks
            .iter()
            .filter(|b| b.kind.is_replicable())
            .map(ast::Block::address)
            .collect();

        let (decls, vars) = {
            let env = EnvVars::new(&scope, &self.functions);
            let decls = variables::declarations(source, &env);
            let overrides = match &call.inputs {
                Some(inputs) => inputs.clone(),
                None => variables::root_overrides(self.loader, &self.root, self.options, &env)?,
            };
            let vars = variables::resolve(&decls, &overrides);
            (decls, vars)
        };
        scope.vars = vars;

        let mut children = Children::default();
        for pass in 1..=MAX_PASSES {
            let locals = self.settle_locals(source, &scope);
            let mut changed = locals != scope.locals;
            scope.locals = locals;

            let blocks = self.settle_blocks(source, &scope, call, &mut children, stack)?;
            changed |= blocks != scope.blocks;
            scope.blocks = blocks;

            if !changed {
                if self.options.debug {
                    debug!("{}: settled after {pass} pass(es)", call.dir.display());
                }
                break;
            }
            if pass == MAX_PASSES {
                debug!(
                    "{}: stopped settling after {pass} passes",
                    call.dir.display()
                );
            }
        }

        let (origins, mut blocks, outputs) = self.materialize(source, &scope, &decls, call)?;
        let links: Vec<Vec<ir::Reference>> = blocks
            .iter()
            .zip(&origins)
            .map(|(block, &origin)| {
                let targets = references::candidates(&source.blocks[origin], block);
                references::resolve(&targets, &blocks, &block.id)
            })
            .collect();
        for (block, refs) in blocks.iter_mut().zip(links) {
            block.references = refs;
        }

        for path in &children.order {
            if let Some(run) = children.runs.remove(path).and_then(|c| c.run) {
                blocks.extend(run.blocks);
            }
        }
        Ok(ModuleRun { blocks, outputs })
    }

    fn settle_locals(&self, source: &ModuleSource, scope: &Scope) -> HashMap<String, Value> {
        let env = EnvVars::new(scope, &self.functions);
        let mut locals = HashMap::new();
        for block in source.blocks_of(|k| matches!(k, BlockKind::Locals)) {
            for attr in block.body.attributes() {
                let value = core::expr_to_value(attr.expr(), &env).unwrap_or_else(|_| {
                    Unknown::new(format!("local.{}", attr.key()), attr.key()).into()
                });
                locals.insert(attr.key().to_string(), value);
            }
        }
        locals
    }

    /// Values of resources, data sources and module calls as seen by references.
    fn settle_blocks(
        &self,
        source: &ModuleSource,
        scope: &Scope,
        call: &ModuleCall,
        children: &mut Children,
        stack: &mut Vec<PathBuf>,
    ) -> Result<HashMap<String, Value>> {
        let env = EnvVars::new(scope, &self.functions);
        let scratch = IdGenerator::new();
        let mut values = HashMap::new();
        children.order.clear();

        for block in &source.blocks {
            if !block.kind.is_replicable() {
                continue;
            }
            let address = block.address();
            let instances = for_each::instances(&block.body, &env)
                .unwrap_or_else(|_| vec![Instance::default()]);
            let mut entries = Vec::with_capacity(instances.len());
            for instance in &instances {
                let instance_env = instance.env(&env);
                let value = match &block.kind {
                    BlockKind::Module { name } => self.settle_child(
                        block,
                        name,
                        instance,
                        &instance_env,
                        call,
                        children,
                        stack,
                    )?,
                    _ => {
                        let ctx = BodyContext {
                            filename: &block.filename,
                            address: &address,
                            stop_on_error: false,
                            quiet: true,
                            ids: &scratch,
                        };
                        match for_each::evaluate_body(
                            &block.body,
                            &block.spans,
                            &instance_env,
                            &ctx,
                        ) {
                            Ok(body) => instance_object(body),
                            Err(_) => continue,
                        }
                    }
                };
                entries.push((instance.key.clone(), value));
            }
            values.insert(address, collect_instances(entries));
        }
        Ok(values)
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_child(
        &self,
        block: &ast::Block,
        name: &str,
        instance: &Instance,
        env: &EnvVars,
        call: &ModuleCall,
        children: &mut Children,
        stack: &mut Vec<PathBuf>,
    ) -> Result<Value> {
        let instance_path = format!("{}{}", block.address(), key_suffix(&instance.key));
        children.order.push(instance_path.clone());

        let inputs: HashMap<String, Value> = block
            .body
            .attributes()
            .filter(|a| !MODULE_META_ARGS.contains(&a.key()))
            .map(|a| {
                let value = core::expr_to_value(a.expr(), env).unwrap_or_else(|_| {
                    Unknown::new(format!("{instance_path}.{}", a.key()), a.key()).into()
                });
                (a.key().to_string(), value)
            })
            .collect();

        let stale = match children.runs.get(&instance_path) {
            Some(child) => child.inputs != inputs,
            None => true,
        };
        if stale {
            let run = self.call_child(
                block,
                name,
                &instance_path,
                inputs.clone(),
                env,
                call,
                stack,
            )?;
            children
                .runs
                .insert(instance_path.clone(), ChildRun { inputs, run });
        }

        Ok(
            match children
                .runs
                .get(&instance_path)
                .and_then(|c| c.run.as_ref())
            {
                Some(run) => Value::Map(run.outputs.clone()),
                None => Unknown::new(instance_path, name)
                    .with_target(BlockTarget::module(name))
                    .into(),
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn call_child(
        &self,
        block: &ast::Block,
        name: &str,
        instance_path: &str,
        inputs: HashMap<String, Value>,
        env: &EnvVars,
        call: &ModuleCall,
        stack: &mut Vec<PathBuf>,
    ) -> Result<Option<ModuleRun>> {
        let full_path = format!("{}{instance_path}", call.prefix);
        let module_source = match get_attr_string(&block.body, "source", env) {
            Ok(Some(source)) => source,
            Ok(None) => return self.module_failure(&full_path, "missing source".to_string()),
            Err(e) => return self.module_failure(&full_path, format!("{e:#}")),
        };
        let version = get_attr_string(&block.body, "version", env).ok().flatten();
        let key = if call.key.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", call.key)
        };

        let dir = match self.resolver.resolve(
            self.loader,
            &call.dir,
            &key,
            &module_source,
            version.as_deref(),
        ) {
            Ok(dir) => dir,
            Err(e) => return self.module_failure(&full_path, format!("{e:#}")),
        };
        if stack.contains(&dir) {
            return self.module_failure(
                &full_path,
                format!("{} is already being evaluated", dir.display()),
            );
        }

        if self.options.debug {
            debug!("{full_path}: evaluating {}", dir.display());
        }
        let child = ModuleCall {
            dir,
            prefix: format!("{full_path}."),
            key,
            inputs: Some(inputs),
        };
        self.run_module(&child, stack).map(Some)
    }

    fn module_failure(&self, path: &str, message: String) -> Result<Option<ModuleRun>> {
        if self.options.strict {
            return Err(Error::Module {
                name: path.to_string(),
                message,
            }
            .into());
        }
        warn!("skipping {path}: {message}");
        Ok(None)
    }

    /// Evaluate every block instance of the module once, in file order.
    ///
    /// Returns, per materialized block, the index of the source block it came from.
    fn materialize(
        &self,
        source: &ModuleSource,
        scope: &Scope,
        decls: &[VariableDecl],
        call: &ModuleCall,
    ) -> Result<(Vec<usize>, Vec<ir::Block>, Map)> {
        let env = EnvVars::new(scope, &self.functions);
        let stop = self.options.stop_on_hcl_error;
        let mut origins = Vec::new();
        let mut blocks = Vec::new();
        let mut outputs = Map::new();

        for (index, block) in source.blocks.iter().enumerate() {
            let address = block.address();
            let instances = if block.kind.is_replicable() {
                match for_each::instances(&block.body, &env) {
                    Ok(instances) => instances,
                    Err(e) if stop => {
                        return Err(Error::Evaluation {
                            address: format!("{}{address}", call.prefix),
                            message: format!("{e:#}"),
                        }
                        .into())
                    }
                    Err(e) => {
                        warn!("{}: {}{address}: {e:#}", block.filename, call.prefix);
                        vec![Instance::default()]
                    }
                }
            } else {
                vec![Instance::default()]
            };

            for instance in instances {
                let instance_env = instance.env(&env);
                let path = format!("{}{address}{}", call.prefix, key_suffix(&instance.key));
                let id = self.ids.next_id();
                let ctx = BodyContext {
                    filename: &block.filename,
                    address: &path,
                    stop_on_error: stop,
                    quiet: false,
                    ids: &self.ids,
                };
                let body = match &block.kind {
                    BlockKind::Variable { name } => evaluate_variable(
                        block,
                        decls.iter().find(|d| d.name == *name),
                        &instance_env,
                        &ctx,
                    )?,
                    _ => for_each::evaluate_body(&block.body, &block.spans, &instance_env, &ctx)?,
                };
                if let BlockKind::Output { name } = &block.kind {
                    outputs.insert(
                        name.clone(),
                        body.attributes.get("value").cloned().unwrap_or_default(),
                    );
                }
                if self.options.debug {
                    debug!("{path}: {} attribute(s)", body.attributes.len());
                }
                blocks.push(ir::Block {
                    kind: block.kind.clone(),
                    path,
                    address: address.clone(),
                    key: instance.key,
                    source: SourceRange {
                        filename: block.filename.clone(),
                        line_start: block.spans.lines.start,
                        line_end: block.spans.lines.end,
                    },
                    attributes: body.attributes,
                    blocks: body.blocks,
                    references: Vec::new(),
                    id,
                });
                origins.push(index);
            }
        }
        Ok((origins, blocks, outputs))
    }
}

/// A variable block: `type` is reported by its friendly name instead of evaluated.
fn evaluate_variable(
    block: &ast::Block,
    decl: Option<&VariableDecl>,
    env: &EnvVars,
    ctx: &BodyContext,
) -> Result<EvaluatedBody> {
    let type_attr = find_attr(&block.body, "type");
    let body: hcl::Body = block
        .body
        .iter()
        .filter(|s| !matches!(s, hcl::Structure::Attribute(a) if a.key() == "type"))
        .cloned()
        .collect();
    let mut evaluated = for_each::evaluate_body(&body, &block.spans, env, ctx)?;
    let friendly = match (decl.and_then(|d| d.ty.as_ref()), type_attr) {
        (Some(ty), _) => Some(ty.to_string()),
        (None, Some(attr)) => Some(attr.expr().to_string()),
        (None, None) => None,
    };
    if let Some(friendly) = friendly {
        evaluated
            .attributes
            .insert("type".to_string(), Value::String(friendly));
    }
    Ok(evaluated)
}

fn key_suffix(key: &Option<InstanceKey>) -> String {
    key.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Object form of a nested block; blocks of the same type collect into a list.
fn nested_object(block: &NestedBlock) -> Value {
    let mut object = block.attributes.clone();
    group_blocks(&block.blocks, &mut object);
    Value::Map(object)
}

fn group_blocks(blocks: &[NestedBlock], object: &mut Map) {
    for nested in blocks {
        let entry = object
            .entry(nested.identifier.clone())
            .or_insert_with(|| Value::List(Vec::new()));
        if let Value::List(items) = entry {
            items.push(nested_object(nested));
        }
    }
}

/// Value of one block instance for references: attributes plus nested blocks as lists.
fn instance_object(body: EvaluatedBody) -> Value {
    let mut object = body.attributes;
    group_blocks(&body.blocks, &mut object);
    Value::Map(object)
}

/// Combine instance values: a list for `count`, a map for `for_each`, the value itself
/// for a single instance.
fn collect_instances(entries: Vec<(Option<InstanceKey>, Value)>) -> Value {
    match entries.first().map(|(k, _)| k) {
        None => Value::List(Vec::new()),
        Some(None) => entries
            .into_iter()
            .next()
            .map(|(_, v)| v)
            .unwrap_or_default(),
        Some(Some(InstanceKey::Index(_))) => {
            Value::List(entries.into_iter().map(|(_, v)| v).collect())
        }
        Some(Some(InstanceKey::Key(_))) => Value::Map(
            entries
                .into_iter()
                .filter_map(|(k, v)| match k {
                    Some(InstanceKey::Key(k)) => Some((k, v)),
                    _ => None,
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_collect_by_replication_kind() {
        assert_eq!(
            collect_instances(vec![(None, Value::from(1))]),
            Value::from(1)
        );
        assert_eq!(
            collect_instances(vec![
                (Some(InstanceKey::Index(0)), Value::from("a")),
                (Some(InstanceKey::Index(1)), Value::from("b")),
            ])
            .to_json(),
            serde_json::json!(["a", "b"])
        );
        assert_eq!(
            collect_instances(vec![(Some(InstanceKey::Key("k".into())), Value::from(2))]).to_json(),
            serde_json::json!({"k": 2})
        );
        assert_eq!(collect_instances(Vec::new()), Value::List(Vec::new()));
    }

    #[test]
    fn nested_blocks_become_lists_in_instance_objects() {
        let body = EvaluatedBody {
            attributes: Map::from_iter([("name".to_string(), Value::from("x"))]),
            blocks: vec![NestedBlock {
                identifier: "rule".to_string(),
                labels: Vec::new(),
                source: SourceRange::default(),
                attributes: Map::from_iter([("port".to_string(), Value::from(80))]),
                blocks: Vec::new(),
                id: "1".to_string(),
            }],
        };
        assert_eq!(
            instance_object(body).to_json(),
            serde_json::json!({"name": "x", "rule": [{"port": 80}]})
        );
    }
}
