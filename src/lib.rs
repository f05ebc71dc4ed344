pub mod backends;
pub mod config;
pub mod document;
pub mod error;
pub mod frontend;
pub mod ir;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use path_absolutize::Absolutize;

pub use config::Options;
pub use document::Document;
pub use error::Error;

use crate::frontend::pipeline::Session;

// Loader abstraction: lets callers control how files and directories are read.
pub trait Loader {
    fn load(&self, path: &Path) -> io::Result<String>;
    /// Entries of a directory, files and subdirectories alike.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    fn is_dir(&self, path: &Path) -> bool;
}

/// Reads straight from the filesystem.
pub struct FsLoader;

impl Loader for FsLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Parse and evaluate the configuration tree rooted at `path`.
pub fn parse(path: impl AsRef<Path>, options: &Options) -> error::Result<Document> {
    load_document(path.as_ref(), &FsLoader, options)
}

// Pure API: parse + evaluate a configuration tree using a Loader.
pub fn load_document(
    path: &Path,
    loader: &dyn Loader,
    options: &Options,
) -> error::Result<Document> {
    let root = path
        .absolutize()
        .map_err(|e| Error::path(path, e))?
        .to_path_buf();
    loader.read_dir(&root).map_err(|e| Error::path(&root, e))?;

    let session = Session::new(&root, loader, options);
    let run = session.run_root().map_err(Error::from_anyhow)?;
    debug!("{}: {} block(s)", root.display(), run.blocks.len());
    Ok(Document::from_blocks(&run.blocks))
}

pub fn generate_with_backend(backend: &str, doc: &Document) -> anyhow::Result<String> {
    let be = backends::get_backend(backend)
        .ok_or_else(|| anyhow::anyhow!("unknown backend '{backend}'"))?;
    be.generate(doc)
}
