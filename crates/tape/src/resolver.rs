//! Dependency resolution for compiled modules
//!
//! References found by [`crate::references`] are mapped back onto files. An
//! instance path is resolved the way the runtime would walk proxies: a plain
//! module stands for itself (its children would live at `dir/name/`), while an
//! init module stands for its folder, so `script.Parent` from `dir/init.lua`
//! is the parent of `dir`.
//!
//! A candidate path is probed in order: the literal path, its init module if
//! it is a directory, then the path with each registered extension appended.
//!
//! Two namespaces redirect outside the normal tree: the vendor marker
//! (`node_modules`) hands the remaining segments to the package store, and a
//! path whose second-to-last segment is the include marker (`include`) is
//! looked up in the include directory first.

use std::{
    ffi::OsString,
    fmt, fs,
    path::{Path, PathBuf},
};

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

use crate::{
    error::{BundleError, Result},
    initifier::INIT_NAMES,
    manifest::{PackageManifest, VendorStore, split_package_name},
    references::{Reference, ReferenceTarget, Segment, scan_references},
    transform::TransformerRegistry,
    types::{BundledFile, FileOrigin},
};

/// A reference that could not be mapped to a bundleable file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    /// File containing the reference
    pub from: PathBuf,
    pub expression: String,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.expression, self.from.display())
    }
}

/// Where the resolver looks besides the target directory
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub target_root: PathBuf,
    pub include_dir: Option<PathBuf>,
    pub include_marker: String,
    /// Dependency store; vendor references stay unresolved without one
    pub vendor_dir: Option<PathBuf>,
    pub vendor_marker: String,
    pub manifest: Option<PackageManifest>,
}

/// Result of expanding a set of seed files to everything they reach
#[derive(Debug, Default)]
pub struct Closure {
    /// Newly discovered files, in discovery order, excluding the seeds
    pub files: IndexSet<PathBuf>,
    pub unresolved: Vec<UnresolvedReference>,
    /// Groups of files that require each other (self-requires included)
    pub cycles: Vec<Vec<PathBuf>>,
}

#[derive(Debug)]
pub struct DependencyResolver<'a> {
    registry: &'a TransformerRegistry,
    target_root: PathBuf,
    include_dir: Option<PathBuf>,
    include_marker: String,
    vendor_marker: String,
    vendor: Option<VendorStore>,
    /// Package name to its canonical root, `None` when not installed
    package_roots: IndexMap<String, Option<PathBuf>>,
    graph: DiGraph<PathBuf, ()>,
    graph_nodes: FxHashMap<PathBuf, NodeIndex>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a TransformerRegistry, options: ResolverOptions) -> Self {
        Self {
            registry,
            target_root: canonicalize_path(options.target_root),
            include_dir: options.include_dir.map(canonicalize_path),
            include_marker: options.include_marker,
            vendor_marker: options.vendor_marker,
            vendor: options
                .vendor_dir
                .map(|root| VendorStore::new(root, options.manifest)),
            package_roots: IndexMap::new(),
            graph: DiGraph::new(),
            graph_nodes: FxHashMap::default(),
        }
    }

    /// Expand `seeds` to the transitive set of files they reference.
    ///
    /// Seeds are never reported back in [`Closure::files`]; they only start
    /// the search and stop it from revisiting them.
    pub fn resolve_closure(&mut self, seeds: &[PathBuf]) -> Result<Closure> {
        let seeds: Vec<PathBuf> = seeds.iter().cloned().map(canonicalize_path).collect();
        let mut visited: IndexSet<PathBuf> = seeds.iter().cloned().collect();
        let mut closure = Closure::default();

        for seed in &seeds {
            if !self.scans(seed) {
                continue;
            }
            let contents = fs::read_to_string(seed).map_err(|e| BundleError::io(seed, e))?;
            let found =
                self.fetch_dependencies(&contents, seed, &mut visited, &mut closure.unresolved)?;
            closure.files.extend(found);
        }

        closure.cycles = self.cycles();
        Ok(closure)
    }

    /// Resolve every reference in `contents` (the text of `file_path`) and
    /// recurse into newly reached files.
    ///
    /// `visited` is shared across the whole pass so diamonds and cycles are
    /// expanded once.
    pub fn fetch_dependencies(
        &mut self,
        contents: &str,
        file_path: &Path,
        visited: &mut IndexSet<PathBuf>,
        unresolved: &mut Vec<UnresolvedReference>,
    ) -> Result<IndexSet<PathBuf>> {
        let mut found = IndexSet::new();

        for reference in scan_references(contents) {
            let Some(resolved) = self.resolve_reference(&reference, file_path) else {
                unresolved.push(UnresolvedReference {
                    from: file_path.to_path_buf(),
                    expression: reference.expression,
                });
                continue;
            };
            if self.bundled_file(&resolved).is_none() {
                debug!(
                    "{} resolves outside the bundle roots: {}",
                    reference.expression,
                    resolved.display()
                );
                unresolved.push(UnresolvedReference {
                    from: file_path.to_path_buf(),
                    expression: reference.expression,
                });
                continue;
            }

            trace!("{} -> {}", reference.expression, resolved.display());
            self.record_edge(file_path, &resolved);

            if resolved == file_path || !visited.insert(resolved.clone()) {
                continue;
            }
            debug!("discovered {}", resolved.display());
            found.insert(resolved.clone());

            if self.scans(&resolved) {
                let nested =
                    fs::read_to_string(&resolved).map_err(|e| BundleError::io(&resolved, e))?;
                found.extend(self.fetch_dependencies(&nested, &resolved, visited, unresolved)?);
            }
        }

        Ok(found)
    }

    /// Map one reference made from `caller` to a canonical file path
    pub fn resolve_reference(&mut self, reference: &Reference, caller: &Path) -> Option<PathBuf> {
        match &reference.target {
            ReferenceTarget::Package(segments) => self.resolve_package(segments),
            ReferenceTarget::Instance(segments) => self.resolve_instance(segments, caller),
        }
    }

    fn resolve_instance(&mut self, segments: &[Segment], caller: &Path) -> Option<PathBuf> {
        let (first, rest) = segments.split_first()?;
        if *first != Segment::Script {
            return None;
        }

        if let Some(position) = rest
            .iter()
            .position(|s| matches!(s, Segment::Child(name) if *name == self.vendor_marker))
        {
            let package_segments = rest[position + 1..]
                .iter()
                .map(|segment| match segment {
                    Segment::Child(name) => Some(name.clone()),
                    Segment::Script | Segment::Parent => None,
                })
                .collect::<Option<Vec<_>>>()?;
            return self.resolve_package(&package_segments);
        }

        if let Some(found) = self.resolve_include(rest) {
            return Some(found);
        }

        let mut current = instance_base(caller);
        for segment in rest {
            match segment {
                Segment::Script => return None,
                Segment::Parent => {
                    if !current.pop() {
                        return None;
                    }
                }
                Segment::Child(name) => current.push(name),
            }
        }
        self.probe(&current)
    }

    /// `<...>.include.<Name>` looks in the include directory
    fn resolve_include(&self, segments: &[Segment]) -> Option<PathBuf> {
        let include_dir = self.include_dir.as_ref()?;
        let [.., Segment::Child(marker), Segment::Child(name)] = segments else {
            return None;
        };
        if *marker != self.include_marker {
            return None;
        }
        self.probe(&include_dir.join(name))
    }

    fn resolve_package(&mut self, segments: &[String]) -> Option<PathBuf> {
        let (package, subpath) = split_package_name(segments)?;
        let root = self.package_root(&package)?;

        for depth in (0..=subpath.len()).rev() {
            let candidate = subpath[..depth]
                .iter()
                .fold(root.clone(), |path, segment| path.join(segment));
            if let Some(found) = self.probe(&candidate) {
                if depth < subpath.len() {
                    warn!(
                        "{package}: {} not found, using {}",
                        subpath.join("/"),
                        found.display()
                    );
                }
                return Some(found);
            }
        }

        let main = PackageManifest::load(&root.join("package.json"))
            .ok()
            .and_then(|manifest| manifest.main)?;
        self.probe(&root.join(main))
    }

    fn package_root(&mut self, package: &str) -> Option<PathBuf> {
        if let Some(cached) = self.package_roots.get(package) {
            return cached.clone();
        }
        let vendor = self.vendor.as_ref()?;
        let root = vendor.locate(package).map(canonicalize_path);
        match &root {
            Some(path) => debug!("package {package} at {}", path.display()),
            None => debug!(
                "package {package} not found in {}",
                vendor.root().display()
            ),
        }
        self.package_roots.insert(package.to_owned(), root.clone());
        root
    }

    /// First existing, bundleable file for `candidate`
    fn probe(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() && self.registry.supports(candidate) {
            return Some(canonicalize_path(candidate.to_path_buf()));
        }
        if candidate.is_dir() {
            for name in INIT_NAMES {
                let init = candidate.join(name);
                if init.is_file() {
                    return Some(canonicalize_path(init));
                }
            }
        }
        for extension in self.registry.extensions() {
            let mut with_extension = OsString::from(candidate.as_os_str());
            with_extension.push(".");
            with_extension.push(extension);
            let with_extension = PathBuf::from(with_extension);
            if with_extension.is_file() {
                return Some(canonicalize_path(with_extension));
            }
        }
        None
    }

    fn scans(&self, path: &Path) -> bool {
        self.registry
            .for_path(path)
            .is_some_and(|transformer| transformer.scans_dependencies)
    }

    /// Origin and runtime-tree location of a resolved file, or `None` when it
    /// lies outside every bundle root
    pub fn bundled_file(&self, path: &Path) -> Option<BundledFile> {
        if let Ok(relative) = path.strip_prefix(&self.target_root) {
            return Some(BundledFile {
                path: path.to_path_buf(),
                origin: FileOrigin::Project,
                logical_path: components(relative),
            });
        }

        for (package, root) in &self.package_roots {
            let Some(root) = root else {
                continue;
            };
            if let Ok(relative) = path.strip_prefix(root) {
                let mut logical_path = vec![self.include_marker.clone(), self.vendor_marker.clone()];
                logical_path.extend(package.split('/').map(str::to_owned));
                logical_path.extend(components(relative));
                return Some(BundledFile {
                    path: path.to_path_buf(),
                    origin: FileOrigin::Vendor {
                        package: package.clone(),
                    },
                    logical_path,
                });
            }
        }

        let include_dir = self.include_dir.as_ref()?;
        let relative = path.strip_prefix(include_dir).ok()?;
        let mut logical_path = vec![self.include_marker.clone()];
        logical_path.extend(components(relative));
        Some(BundledFile {
            path: path.to_path_buf(),
            origin: FileOrigin::Include,
            logical_path,
        })
    }

    fn record_edge(&mut self, from: &Path, to: &Path) {
        let from = self.graph_node(from);
        let to = self.graph_node(to);
        self.graph.update_edge(from, to, ());
    }

    fn graph_node(&mut self, path: &Path) -> NodeIndex {
        if let Some(index) = self.graph_nodes.get(path) {
            return *index;
        }
        let index = self.graph.add_node(path.to_path_buf());
        self.graph_nodes.insert(path.to_path_buf(), index);
        index
    }

    /// Strongly connected groups of files seen so far
    pub fn cycles(&self) -> Vec<Vec<PathBuf>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|node| self.graph.contains_edge(*node, *node))
            })
            .map(|component| {
                let mut paths: Vec<PathBuf> = component
                    .into_iter()
                    .map(|node| self.graph[node].clone())
                    .collect();
                paths.sort();
                paths
            })
            .collect()
    }
}

/// The location `script` denotes for a module file
fn instance_base(caller: &Path) -> PathBuf {
    let is_init = caller
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(crate::initifier::is_init_name);
    if is_init {
        caller.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        caller.with_extension("")
    }
}

fn components(relative: &Path) -> Vec<String> {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect()
}

/// Canonicalize a path, falling back to the original on failure
fn canonicalize_path(path: PathBuf) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(e) => {
            trace!("failed to canonicalize {}: {e}", path.display());
            path
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn create_test_file(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        registry: TransformerRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().canonicalize().unwrap();
            Self {
                _temp_dir: temp_dir,
                root,
                registry: TransformerRegistry::default(),
            }
        }

        fn write(&self, relative: &str, content: &str) -> PathBuf {
            let path = self.root.join(relative);
            create_test_file(&path, content);
            path
        }

        fn resolver(&self) -> DependencyResolver<'_> {
            DependencyResolver::new(
                &self.registry,
                ResolverOptions {
                    target_root: self.root.join("out"),
                    include_dir: Some(self.root.join("include")),
                    include_marker: "include".into(),
                    vendor_dir: Some(self.root.join("node_modules")),
                    vendor_marker: "node_modules".into(),
                    manifest: None,
                },
            )
        }
    }

    fn names(files: &IndexSet<PathBuf>, root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|path| {
                path.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_sibling_import_from_plain_module() {
        let fx = Fixture::new();
        let caller = fx.write("out/a.lua", r#"TS.import(script, script.Parent, "b")"#);
        fx.write("out/b.luau", "return 1");

        let closure = fx.resolver().resolve_closure(&[caller]).unwrap();

        assert_eq!(names(&closure.files, &fx.root), vec!["out/b.luau"]);
        assert!(closure.unresolved.is_empty());
    }

    #[test]
    fn test_init_module_stands_for_its_folder() {
        let fx = Fixture::new();
        let caller = fx.write("out/lib/init.lua", r#"TS.import(script, script, "child")"#);
        fx.write("out/lib/child.lua", r#"TS.import(script, script.Parent.Parent, "top")"#);
        fx.write("out/top/init.luau", "return 1");

        let closure = fx.resolver().resolve_closure(&[caller]).unwrap();

        assert_eq!(
            names(&closure.files, &fx.root),
            vec!["out/lib/child.lua", "out/top/init.luau"]
        );
    }

    #[test]
    fn test_extension_probe_covers_assets() {
        let fx = Fixture::new();
        let caller = fx.write("out/init.lua", "local data = require(script.data)");
        fx.write("out/data.json", "{}");

        let closure = fx.resolver().resolve_closure(&[caller]).unwrap();

        assert_eq!(names(&closure.files, &fx.root), vec!["out/data.json"]);
    }

    #[test]
    fn test_runtime_lib_routes_to_include_dir() {
        let fx = Fixture::new();
        let caller = fx.write("out/init.lua", "local TS = require(script.include.RuntimeLib)");
        fx.write("include/RuntimeLib.lua", "local Promise = require(script.Parent.Promise)");
        fx.write("include/Promise.lua", "return {}");

        let mut resolver = fx.resolver();
        let closure = resolver.resolve_closure(&[caller]).unwrap();

        assert_eq!(
            names(&closure.files, &fx.root),
            vec!["include/RuntimeLib.lua", "include/Promise.lua"]
        );
        let promise = resolver
            .bundled_file(&fx.root.join("include/Promise.lua"))
            .unwrap();
        assert_eq!(promise.origin, FileOrigin::Include);
        assert_eq!(promise.logical_path, vec!["include", "Promise.lua"]);
    }

    #[test]
    fn test_vendor_reference_resolves_package_init() {
        let fx = Fixture::new();
        let caller = fx.write(
            "out/init.lua",
            r#"local S = TS.import(script, script.include.node_modules["@rbxts"].services.src)"#,
        );
        fx.write("node_modules/@rbxts/services/src/init.lua", "return {}");

        let mut resolver = fx.resolver();
        let closure = resolver.resolve_closure(&[caller]).unwrap();

        assert_eq!(
            names(&closure.files, &fx.root),
            vec!["node_modules/@rbxts/services/src/init.lua"]
        );
        let file = resolver.bundled_file(&closure.files[0]).unwrap();
        assert_eq!(
            file.origin,
            FileOrigin::Vendor {
                package: "@rbxts/services".into()
            }
        );
        assert_eq!(
            file.logical_path,
            vec!["include", "node_modules", "@rbxts", "services", "src", "init.lua"]
        );
    }

    #[test]
    fn test_get_module_uses_package_main() {
        let fx = Fixture::new();
        let caller = fx.write(
            "out/init.lua",
            r#"local t = TS.import(script, TS.getModule(script, "@rbxts", "t"))"#,
        );
        fx.write("node_modules/@rbxts/t/package.json", r#"{ "main": "lib/ts.lua" }"#);
        fx.write("node_modules/@rbxts/t/lib/ts.lua", "return {}");

        let closure = fx.resolver().resolve_closure(&[caller]).unwrap();

        assert_eq!(
            names(&closure.files, &fx.root),
            vec!["node_modules/@rbxts/t/lib/ts.lua"]
        );
    }

    #[test]
    fn test_missing_package_is_unresolved_not_a_crash() {
        let fx = Fixture::new();
        let caller = fx.write(
            "out/init.lua",
            r#"local S = TS.import(script, TS.getModule(script, "@rbxts", "services"))"#,
        );

        let closure = fx.resolver().resolve_closure(&[caller.clone()]).unwrap();

        assert!(closure.files.is_empty());
        assert_eq!(closure.unresolved.len(), 1);
        assert_eq!(closure.unresolved[0].from, caller);
    }

    #[test]
    fn test_diamond_is_expanded_once() {
        let fx = Fixture::new();
        let caller = fx.write(
            "out/init.lua",
            "require(script.a)\nrequire(script.b)",
        );
        fx.write("out/a.lua", "require(script.Parent.c)");
        fx.write("out/b.lua", "require(script.Parent.c)");
        fx.write("out/c.lua", "return 1");

        let closure = fx.resolver().resolve_closure(&[caller]).unwrap();

        assert_eq!(
            names(&closure.files, &fx.root),
            vec!["out/a.lua", "out/c.lua", "out/b.lua"]
        );
    }

    #[test]
    fn test_seeds_are_not_rediscovered() {
        let fx = Fixture::new();
        let init = fx.write("out/init.lua", "require(script.util)");
        let util = fx.write("out/util.lua", "return 1");

        let closure = fx.resolver().resolve_closure(&[init, util]).unwrap();

        assert!(closure.files.is_empty());
        assert!(closure.unresolved.is_empty());
    }

    #[test]
    fn test_cycles_are_reported() {
        let fx = Fixture::new();
        let a = fx.write("out/a.lua", "require(script.Parent.b)");
        let b = fx.write("out/b.lua", "require(script.Parent.a)");
        fx.write("out/c.lua", "require(script)");

        let closure = fx
            .resolver()
            .resolve_closure(&[a.clone(), fx.root.join("out/c.lua")])
            .unwrap();

        assert_eq!(closure.cycles.len(), 2);
        assert!(closure.cycles.contains(&vec![a, b]));
    }

    #[test]
    fn test_reference_outside_roots_is_unresolved() {
        let fx = Fixture::new();
        let caller = fx.write("out/init.lua", "require(script.Parent.secret)");
        fx.write("secret.lua", "return 1");

        let closure = fx.resolver().resolve_closure(&[caller]).unwrap();

        assert!(closure.files.is_empty());
        assert_eq!(closure.unresolved.len(), 1);
    }
}
