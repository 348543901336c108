//! Directory walk that builds the module tree
//!
//! Files with a registered transformer become Module nodes, directories become
//! Folder nodes, and folders that end up without bundleable descendants are
//! culled. Entries are visited in name order so the tree, and everything
//! derived from it, is reproducible.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    error::{BundleError, Result},
    node::{Node, NodeKind},
    transform::TransformerRegistry,
};

#[derive(Debug)]
pub struct Explorer<'a> {
    registry: &'a TransformerRegistry,
    /// Files never added to the tree, such as a previous bundle output
    excluded: Vec<PathBuf>,
}

impl<'a> Explorer<'a> {
    pub fn new(registry: &'a TransformerRegistry) -> Self {
        Self {
            registry,
            excluded: Vec::new(),
        }
    }

    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    /// Explore `directory` into a tree rooted at a Folder node for it
    pub fn explore(&self, directory: &Path) -> Result<Node> {
        let mut root = Node::new(NodeKind::Folder, directory);
        self.explore_into(directory, &mut root)?;
        Ok(root)
    }

    fn explore_into(&self, directory: &Path, node: &mut Node) -> Result<()> {
        let mut files = Vec::new();
        let mut directories = Vec::new();
        for entry in fs::read_dir(directory).map_err(|e| BundleError::io(directory, e))? {
            let entry = entry.map_err(|e| BundleError::io(directory, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| BundleError::io(entry.path(), e))?;
            let path = entry.path();
            // Follow symlinks so linked packages are explored like real folders
            let is_dir = file_type.is_dir() || (file_type.is_symlink() && path.is_dir());
            if is_dir {
                directories.push(path);
            } else {
                files.push(path);
            }
        }
        files.sort();
        directories.sort();

        for path in files {
            let name = file_label(&path);
            if self.excluded.iter().any(|excluded| excluded == &path) {
                debug!("SKIP \"{name}\"");
                continue;
            }
            if !self.registry.supports(&path) {
                debug!("IGNORE \"{name}\"");
                continue;
            }
            debug!("ADD \"{name}\"");
            node.create_child(NodeKind::Module, path);
        }

        for path in directories {
            let name = file_label(&path);
            debug!("EXPLORE \"{name}\"");
            let mut child = Node::new(NodeKind::Folder, &path);
            self.explore_into(&path, &mut child)?;
            if child.has_children() {
                node.add_child(child);
            } else {
                debug!("CULL \"{name}\"");
            }
        }

        Ok(())
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
