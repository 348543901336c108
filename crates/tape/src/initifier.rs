//! Collapse folders into their init modules
//!
//! A folder holding an init module is replaced by that module: the module
//! takes the folder's basename and adopts every sibling as its own child.
//! This mirrors how the runtime treats an init module as the proxy for its
//! folder.

use log::trace;

use crate::node::Node;

/// Basenames that make a module the proxy of its folder, highest priority
/// first. Only the first match is honoured; any other candidate stays an
/// ordinary child of the chosen module. `index.*` is deliberately not an init
/// name.
pub const INIT_NAMES: [&str; 2] = ["init.lua", "init.luau"];

pub fn is_init_name(basename: &str) -> bool {
    INIT_NAMES.contains(&basename)
}

/// Rewrite `node` and its whole subtree, returning the node that now stands
/// at this position
pub fn initify(mut node: Node) -> Node {
    let init_position = INIT_NAMES.iter().find_map(|name| {
        node.children
            .iter()
            .position(|child| child.is_module() && child.basename == *name)
    });

    if let Some(position) = init_position {
        let mut init = node.children.remove(position);
        trace!(
            "initify: {} absorbs {} sibling(s) of {}",
            init.basename,
            node.children.len(),
            node.basename
        );
        init.children.append(&mut node.children);
        init.basename = std::mem::take(&mut node.basename);
        node = init;
    }

    node.children = std::mem::take(&mut node.children)
        .into_iter()
        .map(initify)
        .collect();
    node
}
