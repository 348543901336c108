//! Error types shared by every bundling stage.

use std::path::PathBuf;

use crate::resolver::UnresolvedReference;

/// Errors produced while turning a module tree into a single bundle.
///
/// Every variant aborts the whole bundle; no partial output is left on disk.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("target is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("bundle has no entrypoint: {} contains no init module", path.display())]
    NoEntrypoint { path: PathBuf },

    /// Exploration and probing only admit registered extensions, so this
    /// fires only when composing with a different registry
    #[error("no transformer registered for \"{extension}\" ({})", path.display())]
    NoTransformer { path: PathBuf, extension: String },

    #[error("{} unresolved reference(s), first: {}", references.len(), first_reference(references))]
    UnresolvedDependency { references: Vec<UnresolvedReference> },

    /// The entry module is always numbered; reaching this is a naming bug
    #[error("entry module {} was not assigned an identifier", path.display())]
    NoEntrypointIdentifier { path: PathBuf },

    #[error("failed to transform {}: {source}", path.display())]
    Transform {
        path: PathBuf,
        #[source]
        source: crate::transform::TransformError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("minifier failed: {0}")]
    Minify(String),
}

fn first_reference(references: &[UnresolvedReference]) -> String {
    references
        .first()
        .map_or_else(String::new, ToString::to_string)
}

impl BundleError {
    /// Wrap an I/O error together with the path that caused it
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
