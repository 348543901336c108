//! Shared type definitions for the tape crate
//!
//! Types used across several bundling stages live here to keep the stage
//! modules free of circular imports.

use std::path::PathBuf;

use serde::Serialize;

/// Identifier of a chunk inside one bundle.
///
/// Identifiers are assigned sequentially from zero in flatten order, so the
/// same input tree always yields the same identifiers. At runtime they are
/// plain strings matched exactly by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ModuleId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Where a bundled file came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileOrigin {
    /// Inside the target directory
    Project,
    /// Inside the runtime include directory
    Include,
    /// Inside a vendored package, keyed by its package name (e.g. `@rbxts/services`)
    Vendor { package: String },
}

impl std::fmt::Display for FileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOrigin::Project => write!(f, "project"),
            FileOrigin::Include => write!(f, "include"),
            FileOrigin::Vendor { package } => write!(f, "vendor:{package}"),
        }
    }
}

/// A file that takes part in the bundle, with its place in the runtime tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledFile {
    pub path: PathBuf,
    pub origin: FileOrigin,
    /// Path segments relative to the bundle root, file name last
    pub logical_path: Vec<String>,
}

/// A bundled file paired with its assigned identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub file: BundledFile,
}
