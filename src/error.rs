use std::io;
use std::path::PathBuf;

/// Errors surfaced by [`crate::parse`] and [`crate::load_document`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The root directory or an override file could not be read.
    #[error("unable to read {}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("syntax error in {file}: {message}")]
    Syntax { file: String, message: String },
    #[error("evaluation error at {address}: {message}")]
    Evaluation { address: String, message: String },
    #[error("module {name}: {message}")]
    Module { name: String, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn path(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Path {
            path: path.into(),
            source,
        }
    }

    /// Recover a typed error from an internal `anyhow` chain.
    pub(crate) fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(typed) => typed,
            Err(other) => Error::Other(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_error_surfaces_os_message() {
        let err = Error::path(
            "/nope",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            err.to_string(),
            "unable to read /nope: No such file or directory"
        );
    }

    #[test]
    fn typed_errors_survive_anyhow_round_trip() {
        let wrapped: anyhow::Error = Error::Syntax {
            file: "main.tf".into(),
            message: "unexpected token".into(),
        }
        .into();
        assert!(matches!(
            Error::from_anyhow(wrapped),
            Error::Syntax { ref file, .. } if file == "main.tf"
        ));
    }
}
