use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use tfparse::{
    config::{self, Config as TfparseConfig, TargetConfig},
    generate_with_backend, Document, Options,
};

#[derive(Parser)]
#[command(name = "tfparse")]
#[command(about = "Parse and evaluate Terraform configuration into JSON", long_about = None)]
struct Cli {
    /// Root module directory
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Abort on the first syntax or evaluation error
    #[arg(long)]
    stop_on_hcl_error: bool,

    /// Log per-block evaluation details
    #[arg(long)]
    debug: bool,

    /// Fetch remote and registry module sources
    #[arg(long)]
    allow_downloads: bool,

    /// Value of terraform.workspace
    #[arg(long, default_value = "default")]
    workspace: String,

    /// Load variables from a .tfvars or .tfvars.json file. Can repeat.
    #[arg(long)]
    var_file: Vec<PathBuf>,

    /// Set a variable: --var key=value (repeatable)
    #[arg(long, value_parser = parse_key_val)]
    var: Vec<(String, String)>,

    /// Fail when a module cannot be resolved
    #[arg(long)]
    strict: bool,

    /// Backend to use: json|summary (ignored if using config file)
    #[arg(long, default_value = "json")]
    backend: String,

    /// Write the output to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Use a tfparse.toml configuration file
    #[arg(long, num_args = 0..=1, default_missing_value = "tfparse.toml")]
    config: Option<PathBuf>,

    /// Target name to run (when using config file)
    #[arg(long)]
    target: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the configuration and report block counts per type
    Validate {},
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Some(config_path) = &cli.config {
        let tfparse_config = config::load_config_from_path(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
            .ok_or_else(|| anyhow!("{} not found", config_path.display()))?;

        let targets_to_run = if let Some(name) = &cli.target {
            vec![tfparse_config
                .targets
                .iter()
                .find(|t| t.name == *name)
                .ok_or_else(|| anyhow!("target '{}' not found in {}", name, config_path.display()))?
                .clone()]
        } else {
            tfparse_config.targets.clone()
        };

        for target in targets_to_run {
            run_target(&tfparse_config, &target, cli.debug)?;
        }
        return Ok(());
    }

    let options = cli_options(&cli)?;
    let doc = tfparse::parse(&cli.path, &options)
        .with_context(|| format!("parsing {}", cli.path.display()))?;

    match cli.command {
        Some(Commands::Validate {}) => {
            let total: usize = doc.iter().map(|(_, blocks)| blocks.len()).sum();
            info!(
                "Valid: {} block(s) of {} type(s)",
                total,
                doc.types().count()
            );
            print!("{}", generate_with_backend("summary", &doc)?);
        }
        None => {
            let artifact = generate_with_backend(&cli.backend, &doc)?;
            write_artifact(cli.output.as_deref(), &artifact)?;
        }
    }
    Ok(())
}

fn cli_options(cli: &Cli) -> Result<Options> {
    let mut vars = IndexMap::new();
    for (key, value) in &cli.var {
        vars.insert(key.clone(), var_value(value));
    }
    Ok(Options {
        stop_on_hcl_error: cli.stop_on_hcl_error,
        debug: cli.debug,
        allow_downloads: cli.allow_downloads,
        workspace_name: cli.workspace.clone(),
        vars_paths: cli.var_file.clone(),
        vars,
        strict: cli.strict,
    })
}

/// `--var` values are strings unless they spell out a JSON list or object.
fn var_value(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str(raw) {
            return json;
        }
    }
    serde_json::Value::String(raw.to_string())
}

fn run_target(tfparse_config: &TfparseConfig, target: &TargetConfig, debug: bool) -> Result<()> {
    info!("Running target: {}", target.name);

    let input_path = target.input(&tfparse_config.settings);
    let options = Options {
        debug,
        ..target.options(&tfparse_config.settings)?
    };
    let doc =
        tfparse::parse(input_path, &options).with_context(|| format!("parsing {}", input_path))?;
    let filtered: Document = doc.filter(|type_key| target.includes(type_key));

    let artifact = generate_with_backend(&target.backend, &filtered)?;
    write_artifact(target.output.as_deref().map(Path::new), &artifact)
}

fn write_artifact(output: Option<&Path>, artifact: &str) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, artifact).with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote output to: {}", path.display());
        }
        None => print!("{}", artifact),
    }
    Ok(())
}

fn parse_key_val(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value"))?;
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_target() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("main.tf"),
            r#"
variable "region" {}

resource "aws_s3_bucket" "logs" {
  bucket = "logs-${var.region}"
}
"#,
        )?;
        let out = dir.path().join("out/doc.json");
        let tfparse_toml = format!(
            r#"
[[targets]]
name = "buckets"
input = "{}"
output = "{}"
include = ["aws_s3_bucket"]
vars = {{ region = "eu-west-1" }}
"#,
            dir.path().display(),
            out.display()
        );
        let config: TfparseConfig = toml::from_str(&tfparse_toml)?;
        run_target(&config, &config.targets[0], false)?;

        let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out)?)?;
        assert_eq!(doc.as_object().map(|o| o.len()), Some(1));
        assert_eq!(doc["aws_s3_bucket"][0]["bucket"], "logs-eu-west-1");
        Ok(())
    }

    #[test]
    fn var_values_parse_json_collections_only() {
        assert_eq!(var_value("3"), serde_json::json!("3"));
        assert_eq!(var_value("[1, 2]"), serde_json::json!([1, 2]));
        assert_eq!(var_value("{oops"), serde_json::json!("{oops"));
    }

    #[test]
    fn key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("tags=a=b").unwrap(),
            ("tags".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
    }
}
