//! Turns `.tf` files into [`ast::Block`]s.
//!
//! `hcl-rs` gives the expression tree, `hcl-edit` gives byte spans. Both parse the same
//! text, so their blocks line up one to one in declaration order.
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use hcl_edit::Span;
use log::{debug, warn};

use crate::error::Error;
use crate::frontend::ast::{self, BlockKind, LineRange, ModuleSource, SpanTree};
use crate::Loader;

/// Blocks of one file plus the per-block problems that did not stop the file from parsing.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub blocks: Vec<ast::Block>,
    pub errors: Vec<String>,
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    fn range(&self, span: std::ops::Range<usize>) -> LineRange {
        let last = span.end.saturating_sub(1).max(span.start);
        LineRange {
            start: self.line_of(span.start),
            end: self.line_of(last),
        }
    }
}

fn block_spans(body: &hcl_edit::structure::Body, lines: &LineIndex) -> Vec<SpanTree> {
    body.iter()
        .filter_map(|s| s.as_block())
        .map(|block| SpanTree {
            lines: block.span().map(|r| lines.range(r)).unwrap_or_default(),
            children: block_spans(&block.body, lines),
        })
        .collect()
}

/// Parse one file. A syntax error fails the whole file.
pub fn parse_file(source: &str, filename: &str, file_path: &Path) -> Result<ParsedFile, String> {
    let body: hcl::Body = hcl::parse(source).map_err(|e| e.to_string())?;
    let edit = hcl_edit::parser::parse_body(source).map_err(|e| e.to_string())?;
    let lines = LineIndex::new(source);
    let mut spans = block_spans(&edit, &lines).into_iter();

    let mut parsed = ParsedFile::default();
    for structure in body.into_iter() {
        match structure {
            hcl::Structure::Attribute(attr) => {
                warn!("{filename}: ignoring top-level attribute '{}'", attr.key());
            }
            hcl::Structure::Block(block) => {
                let spans = spans.next().unwrap_or_default();
                let labels: Vec<String> = block
                    .labels
                    .iter()
                    .map(|l| l.as_str().to_string())
                    .collect();
                match BlockKind::from_block(block.identifier.as_str(), &labels) {
                    Ok(kind) => parsed.blocks.push(ast::Block {
                        kind,
                        body: block.body,
                        filename: filename.to_string(),
                        file_path: file_path.to_path_buf(),
                        spans,
                    }),
                    Err(e) => parsed
                        .errors
                        .push(format!("line {}: {e}", spans.lines.start)),
                }
            }
        }
    }
    Ok(parsed)
}

/// `path` relative to `base`, `/` separated, climbing with `..` when needed.
pub fn relative_to(base: &Path, path: &Path) -> String {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = path.components().collect();
    let common = base.iter().zip(&target).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<String> = vec!["..".to_string(); base.len() - common];
    parts.extend(
        target[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// `*.tf` files of a directory, sorted by file name.
pub fn config_files(loader: &dyn Loader, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = loader
        .read_dir(dir)?
        .into_iter()
        .filter(|p| p.extension().map(|e| e == "tf").unwrap_or(false))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Parse every configuration file of a module directory.
///
/// Unreadable files and syntax errors are skipped with a warning unless `stop_on_error`
/// is set.
pub fn load_module_dir(
    loader: &dyn Loader,
    dir: &Path,
    root: &Path,
    stop_on_error: bool,
) -> Result<ModuleSource> {
    let files = config_files(loader, dir).map_err(|e| Error::path(dir, e))?;
    let mut module = ModuleSource {
        dir: dir.to_path_buf(),
        blocks: Vec::new(),
    };
    for file in files {
        let filename = relative_to(root, &file);
        let text = match loader.load(&file) {
            Ok(text) => text,
            Err(e) if stop_on_error => return Err(Error::path(&file, e).into()),
            Err(e) => {
                warn!("skipping {filename}: {e}");
                continue;
            }
        };
        match parse_file(&text, &filename, &file) {
            Ok(parsed) => {
                for message in parsed.errors {
                    if stop_on_error {
                        return Err(Error::Syntax {
                            file: filename,
                            message,
                        }
                        .into());
                    }
                    warn!("{filename}: skipping block: {message}");
                }
                debug!("{filename}: {} block(s)", parsed.blocks.len());
                module.blocks.extend(parsed.blocks);
            }
            Err(message) if stop_on_error => {
                return Err(Error::Syntax {
                    file: filename,
                    message,
                }
                .into())
            }
            Err(message) => warn!("skipping {filename}: {message}"),
        }
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"resource "aws_apprunner_service" "example" {
  service_name = "example"

  source_configuration {
    image_repository {
      image_configuration {
        port = "8000"
      }
    }
  }
}

variable "region" {
  default = "us-east-1"
}
"#;

    #[test]
    fn blocks_carry_line_ranges() {
        let parsed = parse_file(SOURCE, "main.tf", Path::new("/m/main.tf")).unwrap();
        assert_eq!(parsed.blocks.len(), 2);

        let resource = &parsed.blocks[0];
        assert_eq!(resource.spans.lines, LineRange { start: 1, end: 11 });
        let source_configuration = resource.spans.child(0).unwrap();
        assert_eq!(source_configuration.lines, LineRange { start: 4, end: 10 });
        let image_configuration = source_configuration
            .child(0)
            .and_then(|s| s.child(0))
            .unwrap();
        assert_eq!(image_configuration.lines, LineRange { start: 6, end: 8 });

        assert_eq!(
            parsed.blocks[1].spans.lines,
            LineRange { start: 13, end: 15 }
        );
    }

    #[test]
    fn syntax_errors_fail_the_file() {
        assert!(parse_file("resource \"a\" \"b\" {", "bad.tf", Path::new("/bad.tf")).is_err());
    }

    #[test]
    fn unlabeled_blocks_are_reported_and_skipped() {
        let parsed = parse_file(
            "resource \"x\" {}\nlocals {\n  a = 1\n}\n",
            "main.tf",
            Path::new("/main.tf"),
        )
        .unwrap();
        assert_eq!(parsed.blocks.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].starts_with("line 1"));
    }

    #[test]
    fn relative_paths_climb_above_root() {
        assert_eq!(
            relative_to(Path::new("/a/root"), Path::new("/a/root/main.tf")),
            "main.tf"
        );
        assert_eq!(
            relative_to(Path::new("/a/root"), Path::new("/a/modules/x/main.tf")),
            "../modules/x/main.tf"
        );
        assert_eq!(relative_to(Path::new("/a"), Path::new("/a")), ".");
    }
}
