//! Locating the directory behind a `module` block's `source`.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use path_absolutize::Absolutize;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::Loader;

/// Where a module source points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `./x`, `../x`, `.` or an absolute path.
    Local,
    /// `[host/]namespace/name/provider`.
    Registry,
    /// Anything else: `git::`, `github.com/`, `https://`, `s3::`, ...
    Remote,
}

pub fn classify(source: &str) -> SourceKind {
    if source == "."
        || source == ".."
        || source.starts_with("./")
        || source.starts_with("../")
        || source.starts_with(".\\")
        || source.starts_with("..\\")
        || Path::new(source).is_absolute()
    {
        return SourceKind::Local;
    }
    if source.contains("::") || source.contains("://") || source.starts_with("git@") {
        return SourceKind::Remote;
    }
    let parts: Vec<&str> = source
        .split("//")
        .next()
        .unwrap_or(source)
        .split('/')
        .collect();
    let is_segment = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };
    let registry = match parts.as_slice() {
        [ns, name, provider] => is_segment(ns) && is_segment(name) && is_segment(provider),
        [host, ns, name, provider] => {
            host.contains('.')
                && !matches!(*host, "github.com" | "bitbucket.org")
                && is_segment(ns)
                && is_segment(name)
                && is_segment(provider)
        }
        _ => false,
    };
    if registry {
        SourceKind::Registry
    } else {
        SourceKind::Remote
    }
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(rename = "Modules", default)]
    modules: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Dir")]
    dir: String,
}

/// `.terraform/modules/modules.json`: directories of modules installed by `terraform init`,
/// keyed by the dotted chain of module names.
#[derive(Debug, Default, Clone)]
pub struct Manifest {
    dirs: HashMap<String, PathBuf>,
}

impl Manifest {
    pub fn load(loader: &dyn Loader, root: &Path) -> Manifest {
        let path = root.join(".terraform").join("modules").join("modules.json");
        let Ok(text) = loader.load(&path) else {
            return Manifest::default();
        };
        match serde_json::from_str::<ManifestFile>(&text) {
            Ok(file) => Manifest {
                dirs: file
                    .modules
                    .into_iter()
                    .filter(|m| !m.key.is_empty())
                    .map(|m| (m.key, root.join(m.dir)))
                    .collect(),
            },
            Err(e) => {
                info!(
                    "ignoring unreadable module manifest {}: {e}",
                    path.display()
                );
                Manifest::default()
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Path> {
        self.dirs.get(key).map(PathBuf::as_path)
    }
}

/// Fetches remote module sources into a local cache directory.
pub trait Fetcher {
    fn fetch(&self, source: &str, version: Option<&str>) -> Result<PathBuf>;
}

/// Clones git sources with the `git` executable; resolves registry sources through the
/// registry download API first.
pub struct GitFetcher {
    cache: PathBuf,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self {
            cache: std::env::temp_dir().join("tfparse-modules"),
        }
    }
}

/// `[host/]namespace/name/provider[//subdir]` split into its registry host, package path
/// and subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RegistryAddress {
    host: String,
    path: String,
    subdir: Option<String>,
}

impl RegistryAddress {
    fn parse(source: &str) -> Result<Self> {
        let (package, subdir) = match source.split_once("//") {
            Some((package, sub)) => (package, Some(sub.trim_matches('/').to_string())),
            None => (source, None),
        };
        let parts: Vec<&str> = package.split('/').collect();
        let (host, path) = match parts.as_slice() {
            [ns, name, provider] => ("registry.terraform.io", format!("{ns}/{name}/{provider}")),
            [host, ns, name, provider] => (*host, format!("{ns}/{name}/{provider}")),
            _ => bail!("invalid registry source {source}"),
        };
        Ok(Self {
            host: host.to_string(),
            path,
            subdir: subdir.filter(|s| !s.is_empty()),
        })
    }
}

/// Split `git::https://host/repo.git//sub/dir?ref=v1` into url, subdirectory and ref.
fn split_git_source(source: &str) -> (String, Option<String>, Option<String>) {
    let source = source.strip_prefix("git::").unwrap_or(source);
    let (source, git_ref) = match source.split_once("?ref=") {
        Some((s, r)) => (s, Some(r.to_string())),
        None => (source, None),
    };
    let scheme_end = source.find("://").map(|i| i + 3).unwrap_or(0);
    let (url, subdir) = match source[scheme_end..].find("//") {
        Some(i) => (
            &source[..scheme_end + i],
            Some(source[scheme_end + i + 2..].to_string()),
        ),
        None => (source, None),
    };
    let url = if url.starts_with("github.com/") || url.starts_with("bitbucket.org/") {
        format!("https://{url}")
    } else {
        url.to_string()
    };
    (url, subdir, git_ref)
}

impl GitFetcher {
    pub fn new(cache: PathBuf) -> Self {
        Self { cache }
    }

    fn fetch_git(&self, source: &str) -> Result<PathBuf> {
        let (url, subdir, git_ref) = split_git_source(source);
        let digest = Sha256::digest(format!("{url}@{}", git_ref.as_deref().unwrap_or("")));
        let dest = self
            .cache
            .join(format!("{:x}", digest).chars().take(16).collect::<String>());
        if !dest.is_dir() {
            std::fs::create_dir_all(&self.cache)
                .with_context(|| format!("creating {}", self.cache.display()))?;
            info!("cloning {url} into {}", dest.display());
            let mut cmd = Command::new("git");
            cmd.args(["clone", "--quiet", "--depth", "1"]);
            if let Some(r) = &git_ref {
                cmd.args(["--branch", r]);
            }
            cmd.arg(&url).arg(&dest);
            let output = cmd.output().context("running git")?;
            if !output.status.success() {
                bail!(
                    "git clone {url} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
        Ok(match subdir {
            Some(sub) => dest.join(sub),
            None => dest,
        })
    }

    #[cfg(feature = "downloads")]
    fn registry_location(&self, source: &str, version: Option<&str>) -> Result<String> {
        let address = RegistryAddress::parse(source)?;
        let (host, path) = (address.host, address.path);
        let exact = version
            .map(|v| v.trim().trim_start_matches('='))
            .filter(|v| v.trim().chars().all(|c| c.is_ascii_digit() || c == '.'));
        let url = match exact {
            Some(v) => format!("https://{host}/v1/modules/{path}/{}/download", v.trim()),
            None => format!("https://{host}/v1/modules/{path}/download"),
        };
        debug!("resolving registry module via {url}");
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        let response = client.get(&url).send()?.error_for_status()?;
        response
            .headers()
            .get("X-Terraform-Get")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("registry response for {source} has no X-Terraform-Get header"))
    }

    #[cfg(not(feature = "downloads"))]
    fn registry_location(&self, source: &str, _version: Option<&str>) -> Result<String> {
        bail!("cannot resolve registry module {source}: built without the downloads feature")
    }
}

impl Fetcher for GitFetcher {
    fn fetch(&self, source: &str, version: Option<&str>) -> Result<PathBuf> {
        match classify(source) {
            SourceKind::Local => bail!("{source} is a local path"),
            SourceKind::Registry => {
                let subdir = RegistryAddress::parse(source)?.subdir;
                let package = source.split("//").next().unwrap_or(source);
                let location = self.registry_location(package, version)?;
                let dir = self.fetch_git(&location)?;
                Ok(match subdir {
                    Some(sub) => dir.join(sub),
                    None => dir,
                })
            }
            SourceKind::Remote => {
                if source.starts_with("s3::") || source.starts_with("gcs::") {
                    bail!("unsupported module source {source}");
                }
                self.fetch_git(source)
            }
        }
    }
}

/// Turns module sources into directories: local path, installed manifest entry, then a
/// fetch when downloads are allowed.
pub struct ModuleResolver {
    manifest: Manifest,
    fetcher: Option<Box<dyn Fetcher>>,
}

impl ModuleResolver {
    pub fn new(manifest: Manifest, fetcher: Option<Box<dyn Fetcher>>) -> Self {
        Self { manifest, fetcher }
    }

    /// `key` is the dotted chain of module names leading to the call, e.g. `vpc.subnets`.
    pub fn resolve(
        &self,
        loader: &dyn Loader,
        module_dir: &Path,
        key: &str,
        source: &str,
        version: Option<&str>,
    ) -> Result<PathBuf> {
        if classify(source) == SourceKind::Local {
            let dir = module_dir
                .join(source)
                .absolutize()
                .map_err(|e| anyhow!("resolving {source}: {e}"))?
                .to_path_buf();
            if !loader.is_dir(&dir) {
                bail!("module directory {} does not exist", dir.display());
            }
            return Ok(dir);
        }
        if let Some(dir) = self.manifest.lookup(key) {
            if loader.is_dir(dir) {
                debug!("module {key}: using installed copy at {}", dir.display());
                return Ok(dir.to_path_buf());
            }
        }
        match &self.fetcher {
            Some(fetcher) => fetcher.fetch(source, version),
            None => bail!("source {source} is not available locally and downloads are disabled"),
        }
    }
}
