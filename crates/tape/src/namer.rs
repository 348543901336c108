//! Identifier assignment and the runtime name tree
//!
//! Files are numbered in the order they are given, so identifiers depend on
//! nothing but traversal order. The tree mirrors the initified module tree:
//! an init module (`init.lua`, `init.luau`) never appears under its own name,
//! its identifier is hoisted onto the directory entry instead. Other files
//! named `init` (`init.json`) stay ordinary children.

use std::path::Path;

use log::{trace, warn};
use serde::{Serialize, ser::SerializeTuple};

use crate::{
    initifier::is_init_name,
    types::{BundledFile, ModuleId, ModuleRecord},
};

/// One entry of the runtime tree: a folder when `id` is `None`, otherwise a
/// module linked to the chunk with that identifier.
///
/// Serializes as `[[name, id], [children...]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamerEntry {
    pub name: String,
    pub id: Option<ModuleId>,
    pub children: Vec<NamerEntry>,
}

impl NamerEntry {
    fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            children: Vec::new(),
        }
    }

    fn child_mut(&mut self, name: &str) -> &mut Self {
        let position = match self.children.iter().position(|child| child.name == name) {
            Some(position) => position,
            None => {
                self.children.push(Self::folder(name));
                self.children.len() - 1
            }
        };
        &mut self.children[position]
    }

    /// Entry reached by following `names` from here
    pub fn find(&self, names: &[&str]) -> Option<&Self> {
        let Some((first, rest)) = names.split_first() else {
            return Some(self);
        };
        self.children
            .iter()
            .find(|child| child.name == *first)?
            .find(rest)
    }

    /// Every identifier in the tree, in pre-order
    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<ModuleId>) {
        ids.extend(self.id);
        for child in &self.children {
            child.collect_ids(ids);
        }
    }
}

impl Serialize for NamerEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&(&self.name, &self.id))?;
        tuple.serialize_element(&self.children)?;
        tuple.end()
    }
}

/// Numbered modules plus the tree describing where they live
#[derive(Debug)]
pub struct Naming {
    pub modules: Vec<ModuleRecord>,
    pub tree: NamerEntry,
}

impl Naming {
    pub fn id_of(&self, path: &Path) -> Option<ModuleId> {
        self.modules
            .iter()
            .find(|module| module.file.path == path)
            .map(|module| module.id)
    }
}

/// Number `files` sequentially and build the tree rooted at `root_name`
pub fn build_tree(root_name: &str, files: &[BundledFile]) -> Naming {
    let mut tree = NamerEntry::folder(root_name);
    let mut modules = Vec::with_capacity(files.len());

    for (index, file) in files.iter().enumerate() {
        let id = ModuleId::new(u32::try_from(index).unwrap_or(u32::MAX));
        modules.push(ModuleRecord {
            id,
            file: file.clone(),
        });

        let Some((file_name, directories)) = file.logical_path.split_last() else {
            warn!("{} has no place in the tree", file.path.display());
            continue;
        };
        let parent = directories
            .iter()
            .fold(&mut tree, |entry, name| entry.child_mut(name));
        let name = display_name(file_name);

        if is_init_name(file_name) && parent.id.is_none() {
            trace!("hoisting {id} onto {}", parent.name);
            parent.id = Some(id);
            continue;
        }
        let entry = parent.child_mut(name);
        if let Some(existing) = entry.id {
            warn!(
                "{} shadows module {existing} named {name}; adding a second entry",
                file.path.display()
            );
            parent.children.push(NamerEntry {
                name: name.to_owned(),
                id: Some(id),
                children: Vec::new(),
            });
        } else {
            entry.id = Some(id);
        }
    }

    Naming { modules, tree }
}

/// Runtime name of a file: its name without the last extension
fn display_name(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::FileOrigin;

    fn file(logical: &str) -> BundledFile {
        BundledFile {
            path: PathBuf::from("/proj").join(logical),
            origin: FileOrigin::Project,
            logical_path: logical.split('/').map(str::to_owned).collect(),
        }
    }

    #[test]
    fn test_ids_follow_input_order() {
        let naming = build_tree("proj", &[file("init.lua"), file("b.lua"), file("a.lua")]);

        let ids: Vec<(String, u32)> = naming
            .modules
            .iter()
            .map(|m| (m.file.logical_path.join("/"), m.id.as_u32()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("init.lua".to_owned(), 0),
                ("b.lua".to_owned(), 1),
                ("a.lua".to_owned(), 2),
            ]
        );
    }

    #[test]
    fn test_init_is_hoisted_onto_directory() {
        let naming = build_tree(
            "proj",
            &[file("init.lua"), file("lib/init.luau"), file("lib/util.lua")],
        );

        assert_eq!(naming.tree.id, Some(ModuleId::new(0)));
        let lib = naming.tree.find(&["lib"]).unwrap();
        assert_eq!(lib.id, Some(ModuleId::new(1)));
        assert_eq!(lib.children.len(), 1);
        assert_eq!(lib.children[0].name, "util");
        assert!(naming.tree.find(&["lib", "init"]).is_none());
    }

    #[test]
    fn test_second_init_stays_visible() {
        let naming = build_tree("proj", &[file("init.lua"), file("init.luau")]);

        assert_eq!(naming.tree.id, Some(ModuleId::new(0)));
        let shadowed = naming.tree.find(&["init"]).unwrap();
        assert_eq!(shadowed.id, Some(ModuleId::new(1)));
    }

    #[test]
    fn test_init_asset_is_not_hoisted() {
        let naming = build_tree(
            "proj",
            &[file("init.lua"), file("cfg/init.json"), file("cfg/x.lua")],
        );

        let cfg = naming.tree.find(&["cfg"]).unwrap();
        assert_eq!(cfg.id, None);
        assert_eq!(
            naming.tree.find(&["cfg", "init"]).unwrap().id,
            Some(ModuleId::new(1))
        );
        assert_eq!(
            serde_json::to_string(&naming.tree).unwrap(),
            r#"[["proj","0"],[[["cfg",null],[[["init","1"],[]],[["x","2"],[]]]]]]"#
        );
    }

    #[test]
    fn test_folders_have_no_id() {
        let naming = build_tree("proj", &[file("init.lua"), file("a/b/c.json")]);

        assert_eq!(naming.tree.find(&["a"]).unwrap().id, None);
        assert_eq!(naming.tree.find(&["a", "b"]).unwrap().id, None);
        assert_eq!(
            naming.tree.find(&["a", "b", "c"]).unwrap().id,
            Some(ModuleId::new(1))
        );
    }

    #[test]
    fn test_serializes_as_nested_pairs() {
        let naming = build_tree("proj", &[file("init.lua"), file("lib/a.lua")]);

        assert_eq!(
            serde_json::to_string(&naming.tree).unwrap(),
            r#"[["proj","0"],[[["lib",null],[[["a","1"],[]]]]]]"#
        );
    }

    #[test]
    fn test_identifiers_are_unique() {
        let naming = build_tree(
            "proj",
            &[
                file("init.lua"),
                file("a.lua"),
                file("a/init.lua"),
                file("a/b.lua"),
                file("include/RuntimeLib.lua"),
            ],
        );

        let mut ids = naming.tree.ids();
        assert_eq!(ids.len(), 5);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_id_of_looks_up_by_path() {
        let naming = build_tree("proj", &[file("init.lua"), file("x.lua")]);

        assert_eq!(
            naming.id_of(Path::new("/proj/x.lua")),
            Some(ModuleId::new(1))
        );
        assert_eq!(naming.id_of(Path::new("/proj/y.lua")), None);
    }

    #[test]
    fn test_display_name_strips_last_extension() {
        assert_eq!(display_name("util.lua"), "util");
        assert_eq!(display_name("data.spec.json"), "data.spec");
        assert_eq!(display_name(".hidden"), ".hidden");
        assert_eq!(display_name("plain"), "plain");
    }
}
