use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Options of one parse invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    /// Abort on the first syntax or evaluation error instead of skipping it
    pub stop_on_hcl_error: bool,
    /// Emit per-block diagnostics through `log::debug!`
    pub debug: bool,
    /// Permit fetching remote and registry module sources
    pub allow_downloads: bool,
    /// Value of `terraform.workspace`; also selects `<workspace>.tfvars`
    pub workspace_name: String,
    /// Variable files applied left to right, relative to the root directory
    pub vars_paths: Vec<PathBuf>,
    /// Variable values with the highest precedence
    pub vars: IndexMap<String, serde_json::Value>,
    /// Treat unresolvable modules as errors
    pub strict: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stop_on_hcl_error: false,
            debug: false,
            allow_downloads: false,
            workspace_name: "default".to_string(),
            vars_paths: Vec::new(),
            vars: IndexMap::new(),
            strict: false,
        }
    }
}

/// Global settings for tfparse
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Default input directory if not specified in targets
    pub input: Option<String>,
    /// Default variable files
    #[serde(default)]
    pub vars_paths: Vec<String>,
    /// Default workspace
    pub workspace: Option<String>,
    #[serde(default)]
    pub allow_downloads: bool,
    #[serde(default)]
    pub stop_on_hcl_error: bool,
    #[serde(default)]
    pub strict: bool,
}

/// Configuration for a single target output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Name of the target (for identification)
    pub name: String,

    /// Backend to use for this target
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Input directory for this target
    pub input: Option<String>,

    /// Output file path (if not specified, prints to stdout)
    pub output: Option<String>,

    /// Workspace for this target
    pub workspace: Option<String>,

    /// Block types to include (if empty, includes all)
    #[serde(default)]
    pub include: Vec<String>,

    /// Block types to exclude
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Variables for this target
    #[serde(default)]
    pub vars: IndexMap<String, toml::Value>,

    /// Variable files for this target
    #[serde(default)]
    pub vars_paths: Vec<String>,
}

fn default_backend() -> String {
    "json".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub settings: Settings,
    /// List of targets to generate
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl TargetConfig {
    /// Input directory of the target, falling back to the global setting.
    pub fn input<'a>(&'a self, settings: &'a Settings) -> &'a str {
        self.input
            .as_deref()
            .or(settings.input.as_deref())
            .unwrap_or(".")
    }

    /// Parse options for this target layered over the global settings.
    pub fn options(&self, settings: &Settings) -> Result<Options> {
        let mut vars = IndexMap::new();
        for (name, value) in &self.vars {
            let json = serde_json::to_value(value)
                .with_context(|| format!("target '{}': variable '{name}'", self.name))?;
            vars.insert(name.clone(), json);
        }
        Ok(Options {
            stop_on_hcl_error: settings.stop_on_hcl_error,
            debug: false,
            allow_downloads: settings.allow_downloads,
            workspace_name: self
                .workspace
                .clone()
                .or_else(|| settings.workspace.clone())
                .unwrap_or_else(|| "default".to_string()),
            vars_paths: settings
                .vars_paths
                .iter()
                .chain(&self.vars_paths)
                .map(PathBuf::from)
                .collect(),
            vars,
            strict: settings.strict,
        })
    }

    /// Whether blocks grouped under `type_key` belong in this target's output.
    pub fn includes(&self, type_key: &str) -> bool {
        let include: HashSet<&str> = self.include.iter().map(String::as_str).collect();
        let exclude: HashSet<&str> = self.exclude.iter().map(String::as_str).collect();
        (include.is_empty() || include.contains(type_key)) && !exclude.contains(type_key)
    }
}

/// Load configuration from tfparse.toml file
pub fn load_config() -> Result<Option<Config>> {
    load_config_from_path(Path::new("tfparse.toml"))
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(config))
}
