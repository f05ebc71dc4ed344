use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::tempdir;
use tfparse::{parse, Document, Error, Options};

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn paths(doc: &Document, type_key: &str) -> Vec<String> {
    doc.get(type_key)
        .unwrap_or_default()
        .iter()
        .map(|b| {
            b["__tfmeta"]["path"]
                .as_str()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

fn by_path<'a>(doc: &'a Document, type_key: &str, path: &str) -> &'a Value {
    doc.get(type_key)
        .unwrap_or_default()
        .iter()
        .find(|b| b["__tfmeta"]["path"] == json!(path))
        .unwrap_or_else(|| panic!("no block at {path}"))
}

const NETWORK: &str = r#"
variable "cidr" {
  type = string
}

resource "aws_vpc" "main" {
  cidr_block = var.cidr
}

output "vpc_cidr" {
  value = aws_vpc.main.cidr_block
}
"#;

#[test]
fn module_outputs_flow_back_to_the_caller() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "main.tf",
        r#"
output "cidr" {
  value = module.network.vpc_cidr
}

module "network" {
  source = "./modules/network"
  cidr   = local.cidr
}

locals {
  cidr = "10.0.0.0/16"
}
"#,
    );
    write(dir.path(), "modules/network/main.tf", NETWORK);

    let doc = parse(dir.path(), &Options::default()).unwrap();
    assert_eq!(
        doc.types().collect::<Vec<_>>(),
        vec!["output", "module", "locals", "variable", "aws_vpc"]
    );
    assert_eq!(
        paths(&doc, "output"),
        vec!["output.cidr", "module.network.output.vpc_cidr"]
    );
    assert_eq!(
        by_path(&doc, "output", "output.cidr")["value"],
        json!("10.0.0.0/16")
    );

    let vpc = by_path(&doc, "aws_vpc", "module.network.aws_vpc.main");
    assert_eq!(vpc["cidr_block"], json!("10.0.0.0/16"));
    assert_eq!(
        vpc["__tfmeta"]["filename"],
        json!("modules/network/main.tf")
    );

    let module = by_path(&doc, "module", "module.network");
    assert_eq!(module["source"], json!("./modules/network"));
    assert_eq!(module["__tfmeta"]["label"], json!("network"));

    let output = by_path(&doc, "output", "output.cidr");
    assert_eq!(output["__tfmeta"]["references"][0]["id"], module["id"]);
    assert_eq!(
        output["__tfmeta"]["references"][0]["label"],
        json!("module")
    );
}

#[test]
fn modules_nest_two_levels() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "main.tf",
        r#"
module "platform" {
  source = "./platform"
  name   = "prod"
}

output "cidr" {
  value = module.platform.cidr
}
"#,
    );
    write(
        dir.path(),
        "platform/main.tf",
        r#"
variable "name" {}

module "network" {
  source = "../modules/network"
  cidr   = var.name == "prod" ? "10.1.0.0/16" : "10.2.0.0/16"
}

output "cidr" {
  value = module.network.vpc_cidr
}
"#,
    );
    write(dir.path(), "modules/network/main.tf", NETWORK);

    let doc = parse(dir.path(), &Options::default()).unwrap();
    assert_eq!(
        by_path(&doc, "output", "output.cidr")["value"],
        json!("10.1.0.0/16")
    );
    assert_eq!(
        paths(&doc, "aws_vpc"),
        vec!["module.platform.module.network.aws_vpc.main"]
    );
    assert_eq!(
        by_path(
            &doc,
            "aws_vpc",
            "module.platform.module.network.aws_vpc.main"
        )["__tfmeta"]["filename"],
        json!("modules/network/main.tf")
    );

    let again = parse(dir.path(), &Options::default()).unwrap();
    assert_eq!(doc, again);
}

#[test]
fn modules_outside_the_root_keep_relative_paths() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    write(
        &root,
        "main.tf",
        "module \"test\" {\n  source = \"../shared\"\n}\n",
    );
    write(
        dir.path(),
        "shared/main.tf",
        "output \"output\" {\n  value = path.module\n}\n",
    );

    let doc = parse(&root, &Options::default()).unwrap();
    let output = by_path(&doc, "output", "module.test.output.output");
    assert_eq!(output["value"], json!("../shared"));
    assert_eq!(output["__tfmeta"]["filename"], json!("../shared/main.tf"));
}

#[test]
fn counted_modules_run_per_instance() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "main.tf",
        r#"
module "network" {
  count  = 2
  source = "./modules/network"
  cidr   = "10.${count.index}.0.0/16"
}

output "cidrs" {
  value = module.network[*].vpc_cidr
}
"#,
    );
    write(dir.path(), "modules/network/main.tf", NETWORK);

    let doc = parse(dir.path(), &Options::default()).unwrap();
    assert_eq!(
        paths(&doc, "module"),
        vec!["module.network[0]", "module.network[1]"]
    );
    assert_eq!(
        paths(&doc, "aws_vpc"),
        vec![
            "module.network[0].aws_vpc.main",
            "module.network[1].aws_vpc.main"
        ]
    );
    assert_eq!(
        by_path(&doc, "output", "output.cidrs")["value"],
        json!(["10.0.0.0/16", "10.1.0.0/16"])
    );
}

#[test]
fn unresolvable_modules_are_skipped_unless_strict() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "main.tf",
        r#"
module "remote" {
  source  = "terraform-aws-modules/vpc/aws"
  version = "5.0.0"
}

output "vpc" {
  value = module.remote.vpc_id
}
"#,
    );

    let doc = parse(dir.path(), &Options::default()).unwrap();
    assert_eq!(paths(&doc, "module"), vec!["module.remote"]);
    assert_eq!(
        by_path(&doc, "output", "output.vpc")["value"],
        json!({
            "__attribute__": "module.remote.vpc_id",
            "__name__": "remote",
            "__ref__": "module.remote",
            "__type__": "module"
        })
    );

    let strict = Options {
        strict: true,
        ..Options::default()
    };
    let err = parse(dir.path(), &strict).unwrap_err();
    assert!(
        matches!(err, Error::Module { ref name, .. } if name == "module.remote"),
        "{err}"
    );
}

#[test]
fn installed_modules_resolve_through_the_manifest() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "main.tf",
        r#"
module "vpc" {
  source = "terraform-aws-modules/vpc/aws"
  cidr   = "10.9.0.0/16"
}
"#,
    );
    write(dir.path(), ".terraform/modules/vpc/main.tf", NETWORK);
    write(
        dir.path(),
        ".terraform/modules/modules.json",
        r#"{"Modules":[{"Key":"","Source":"","Dir":"."},{"Key":"vpc","Source":"registry.terraform.io/terraform-aws-modules/vpc/aws","Dir":".terraform/modules/vpc"}]}"#,
    );

    let doc = parse(dir.path(), &Options::default()).unwrap();
    let vpc = by_path(&doc, "aws_vpc", "module.vpc.aws_vpc.main");
    assert_eq!(vpc["cidr_block"], json!("10.9.0.0/16"));
    assert_eq!(
        vpc["__tfmeta"]["filename"],
        json!(".terraform/modules/vpc/main.tf")
    );
}

#[test]
fn recursive_modules_are_cut_off() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "main.tf",
        "module \"self\" {\n  source = \"./\"\n}\n",
    );
    let doc = parse(dir.path(), &Options::default()).unwrap();
    assert_eq!(paths(&doc, "module"), vec!["module.self"]);
}
