//! Labelled multi-way tree used by exploration and initification.

use std::{
    fmt::Write as _,
    path::PathBuf,
};

/// Whether a node groups children or maps to a single source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Folder,
    Module,
}

/// A node in the explored module tree.
///
/// A node exclusively owns its children. Removing a child from `children`
/// discards the whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// Filesystem path at discovery time
    pub path: PathBuf,
    /// Lookup name; a folder's basename moves onto its init module
    pub basename: String,
    pub children: Vec<Self>,
}

impl Node {
    pub fn new(kind: NodeKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            kind,
            path,
            basename,
            children: Vec::new(),
        }
    }

    /// Construct a child, attach it, and hand it back for chaining
    pub fn create_child(&mut self, kind: NodeKind, path: impl Into<PathBuf>) -> &mut Self {
        self.add_child(Self::new(kind, path))
    }

    pub fn add_child(&mut self, child: Self) -> &mut Self {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn find_child(&self, predicate: impl Fn(&Self) -> bool) -> Option<&Self> {
        self.children.iter().find(|child| predicate(child))
    }

    pub fn find_child_by_name(&self, name: &str) -> Option<&Self> {
        self.find_child(|child| child.basename == name)
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_module(&self) -> bool {
        self.kind == NodeKind::Module
    }

    /// Pre-order traversal: self first, then each child's flattening
    pub fn flatten(&self) -> Vec<&Self> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.flatten());
        }
        nodes
    }

    /// Human-readable dump, one node per line, four spaces per level
    pub fn render(&self, indent: usize) -> String {
        let mut out = String::new();
        self.render_into(&mut out, indent);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let suffix = if self.kind == NodeKind::Folder {
            " (dir)"
        } else {
            ""
        };
        let _ = writeln!(out, "{}{}{}", " ".repeat(depth * 4), self.basename, suffix);
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}
