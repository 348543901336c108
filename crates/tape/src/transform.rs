//! Extension-keyed registry of chunk transformers
//!
//! A transformer turns a file's raw contents into one registration statement.
//! Several extensions may share one transformer (`.lua` and `.luau`), and
//! callers can register more before bundling.

use indexmap::IndexMap;

use crate::{codegen, types::ModuleId};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type TransformFn = fn(ModuleId, &str) -> Result<String, TransformError>;

#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    pub render: TransformFn,
    /// Whether files of this type are scanned for references to other modules
    pub scans_dependencies: bool,
}

impl Transformer {
    pub fn transform(&self, id: ModuleId, contents: &str) -> Result<String, TransformError> {
        (self.render)(id, contents)
    }
}

fn transform_code(id: ModuleId, contents: &str) -> Result<String, TransformError> {
    Ok(codegen::render_module(id, contents))
}

fn transform_json(id: ModuleId, contents: &str) -> Result<String, TransformError> {
    Ok(codegen::render_json_asset(id, contents)?)
}

fn transform_text(id: ModuleId, contents: &str) -> Result<String, TransformError> {
    Ok(codegen::render_text_asset(id, contents)?)
}

/// Maps a file extension (without the dot) to its transformer
#[derive(Debug, Clone)]
pub struct TransformerRegistry {
    transformers: IndexMap<String, Transformer>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            &["lua", "luau"],
            Transformer {
                render: transform_code,
                scans_dependencies: true,
            },
        );
        registry.register(
            &["json"],
            Transformer {
                render: transform_json,
                scans_dependencies: false,
            },
        );
        registry.register(
            &["txt"],
            Transformer {
                render: transform_text,
                scans_dependencies: false,
            },
        );
        registry
    }
}

impl TransformerRegistry {
    pub fn empty() -> Self {
        Self {
            transformers: IndexMap::new(),
        }
    }

    /// Register `transformer` for every extension in `extensions`, replacing
    /// any previous registration
    pub fn register(&mut self, extensions: &[&str], transformer: Transformer) {
        for extension in extensions {
            self.transformers
                .insert(extension.trim_start_matches('.').to_owned(), transformer);
        }
    }

    pub fn get(&self, extension: &str) -> Option<&Transformer> {
        self.transformers.get(extension.trim_start_matches('.'))
    }

    /// Transformer for the extension of `path`, if any
    pub fn for_path(&self, path: &std::path::Path) -> Option<&Transformer> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.get(ext))
    }

    pub fn supports(&self, path: &std::path::Path) -> bool {
        self.for_path(path).is_some()
    }

    /// Registered extensions in registration order
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.transformers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_default_registry_extensions() {
        let registry = TransformerRegistry::default();
        let extensions: Vec<&str> = registry.extensions().collect();
        assert_eq!(extensions, vec!["lua", "luau", "json", "txt"]);
    }

    #[test]
    fn test_lookup_by_path() {
        let registry = TransformerRegistry::default();
        assert!(registry.supports(Path::new("a/init.luau")));
        assert!(registry.supports(Path::new("data.json")));
        assert!(!registry.supports(Path::new("icon.png")));
        assert!(!registry.supports(Path::new("Makefile")));
        assert!(registry.for_path(Path::new("x.lua")).is_some_and(|t| t.scans_dependencies));
        assert!(registry.for_path(Path::new("x.txt")).is_some_and(|t| !t.scans_dependencies));
    }

    #[test]
    fn test_register_custom_extension() {
        fn shout(id: ModuleId, contents: &str) -> Result<String, TransformError> {
            Ok(format!("-- {id}: {}", contents.to_uppercase()))
        }

        let mut registry = TransformerRegistry::default();
        registry.register(
            &[".md"],
            Transformer {
                render: shout,
                scans_dependencies: false,
            },
        );
        let transformer = registry.get("md").expect("registered");
        assert_eq!(transformer.transform(ModuleId::new(4), "hi").unwrap(), "-- 4: HI");
    }

    #[test]
    fn test_json_transform_reports_invalid_input() {
        let registry = TransformerRegistry::default();
        let result = registry.get("json").unwrap().transform(ModuleId::new(0), "[1,");
        assert!(matches!(result, Err(TransformError::InvalidJson(_))));
    }
}
