//! End-to-end bundling: explore, initify, resolve, name, render, write
//!
//! The bundle text is composed in memory and written in one step through a
//! temporary sibling file, so a failed run never leaves a partial bundle.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::{
    codegen,
    error::{BundleError, Result},
    explorer::Explorer,
    initifier::initify,
    manifest::PackageManifest,
    minifier::Minifier,
    namer::{Naming, build_tree},
    node::Node,
    resolver::{DependencyResolver, ResolverOptions},
    transform::TransformerRegistry,
    types::{BundledFile, FileOrigin, ModuleId},
};

#[derive(Debug, Clone)]
pub struct BundleOptions {
    pub output: PathBuf,
    pub include_dir: Option<PathBuf>,
    pub include_marker: String,
    pub vendor_dir: Option<PathBuf>,
    pub vendor_marker: String,
    pub manifest: Option<PackageManifest>,
    /// Warn about unresolved references instead of failing
    pub allow_unresolved: bool,
    pub minify: Option<MinifyOptions>,
    pub registry: TransformerRegistry,
}

impl BundleOptions {
    /// Options with no include directory, no dependency store and no minifier
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            include_dir: None,
            include_marker: "include".to_owned(),
            vendor_dir: None,
            vendor_marker: "node_modules".to_owned(),
            manifest: None,
            allow_unresolved: false,
            minify: None,
            registry: TransformerRegistry::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MinifyOptions {
    pub minifier: Minifier,
    pub output: PathBuf,
}

/// What a successful run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReport {
    pub output: PathBuf,
    pub module_count: usize,
    pub entry: ModuleId,
    /// Hex SHA-256 of the bundle as written (after in-place minification)
    pub digest: String,
    pub minified: Option<PathBuf>,
}

/// A composed bundle that has not been written anywhere yet
#[derive(Debug)]
pub struct RenderedBundle {
    pub contents: String,
    pub naming: Naming,
    pub entry: ModuleId,
}

/// Bundle `target` into `options.output`
pub fn bundle(target: &Path, options: &BundleOptions) -> Result<BundleReport> {
    let rendered = render_bundle(target, options)?;
    write_atomically(&options.output, &rendered.contents)?;
    info!(
        "wrote {} ({} modules)",
        options.output.display(),
        rendered.naming.modules.len()
    );

    let mut digest = sha256_hex(rendered.contents.as_bytes());
    let mut minified = None;
    if let Some(minify) = &options.minify {
        minify.minifier.minify(&options.output, &minify.output)?;
        let processed =
            fs::read(&options.output).map_err(|e| BundleError::io(&options.output, e))?;
        digest = sha256_hex(&processed);
        info!("wrote {}", minify.output.display());
        minified = Some(minify.output.clone());
    }

    Ok(BundleReport {
        output: options.output.clone(),
        module_count: rendered.naming.modules.len(),
        entry: rendered.entry,
        digest,
        minified,
    })
}

/// Produce the bundle text for `target` without touching the output file
pub fn render_bundle(target: &Path, options: &BundleOptions) -> Result<RenderedBundle> {
    if !target.is_dir() {
        return Err(BundleError::NotADirectory {
            path: target.to_path_buf(),
        });
    }
    let target = target
        .canonicalize()
        .map_err(|e| BundleError::io(target, e))?;

    let tree = build_module_tree(&target, options)?;
    let files = collect_files(&target, &tree, options)?;

    let root_name = tree.basename.clone();
    let naming = build_tree(&root_name, &files);
    let entry = naming
        .id_of(&tree.path)
        .ok_or_else(|| BundleError::NoEntrypointIdentifier {
            path: tree.path.clone(),
        })?;

    let contents = compose(&naming, entry, &options.registry)?;
    Ok(RenderedBundle {
        contents,
        naming,
        entry,
    })
}

/// Explore and initify `target`, skipping previous outputs; the root must end
/// up as a module
fn build_module_tree(target: &Path, options: &BundleOptions) -> Result<Node> {
    let mut explorer = Explorer::new(&options.registry).exclude(normalize_path(&options.output));
    if let Some(minify) = &options.minify {
        explorer = explorer.exclude(normalize_path(&minify.output));
    }
    let tree = explorer.explore(target)?;
    debug!("tree:\n{}", tree.render(0));

    let tree = initify(tree);
    debug!("initified tree:\n{}", tree.render(0));

    if !tree.is_module() {
        return Err(BundleError::NoEntrypoint {
            path: target.to_path_buf(),
        });
    }
    Ok(tree)
}

/// Project modules in tree order followed by everything they pull in
fn collect_files(target: &Path, tree: &Node, options: &BundleOptions) -> Result<Vec<BundledFile>> {
    let project: Vec<PathBuf> = tree
        .flatten()
        .into_iter()
        .filter(|node| node.is_module())
        .map(|node| node.path.clone())
        .collect();

    let mut resolver = DependencyResolver::new(
        &options.registry,
        ResolverOptions {
            target_root: target.to_path_buf(),
            include_dir: options.include_dir.clone(),
            include_marker: options.include_marker.clone(),
            vendor_dir: options.vendor_dir.clone(),
            vendor_marker: options.vendor_marker.clone(),
            manifest: options.manifest.clone(),
        },
    );
    let closure = resolver.resolve_closure(&project)?;

    if !closure.unresolved.is_empty() {
        if !options.allow_unresolved {
            return Err(BundleError::UnresolvedDependency {
                references: closure.unresolved,
            });
        }
        for reference in &closure.unresolved {
            warn!("unresolved reference {reference}");
        }
    }
    for cycle in &closure.cycles {
        let members: Vec<String> = cycle.iter().map(|p| p.display().to_string()).collect();
        warn!(
            "require cycle will fail at runtime: {}",
            members.join(" -> ")
        );
    }

    let mut files: Vec<BundledFile> = project
        .iter()
        .map(|path| BundledFile {
            path: path.clone(),
            origin: FileOrigin::Project,
            logical_path: path
                .strip_prefix(target)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect(),
        })
        .collect();
    for path in &closure.files {
        match resolver.bundled_file(path) {
            Some(file) => files.push(file),
            None => warn!("{} has no place in the bundle", path.display()),
        }
    }
    Ok(files)
}

/// Prelude, one registration per module, tree, footer
fn compose(naming: &Naming, entry: ModuleId, registry: &TransformerRegistry) -> Result<String> {
    let mut blocks = Vec::with_capacity(naming.modules.len() + 3);
    blocks.push(codegen::render_prelude().to_owned());

    for module in &naming.modules {
        let path = &module.file.path;
        let transformer = registry
            .for_path(path)
            .ok_or_else(|| BundleError::NoTransformer {
                path: path.clone(),
                extension: path
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            })?;
        let contents = fs::read_to_string(path).map_err(|e| BundleError::io(path, e))?;
        let block = transformer
            .transform(module.id, &contents)
            .map_err(|source| BundleError::Transform {
                path: path.clone(),
                source,
            })?;
        debug!("chunk {} <- {} ({})", module.id, path.display(), module.file.origin);
        blocks.push(block);
    }

    let tree = codegen::render_tree(&naming.tree).map_err(|e| BundleError::Transform {
        path: PathBuf::from(&naming.tree.name),
        source: e.into(),
    })?;
    blocks.push(tree);
    blocks.push(codegen::render_footer(entry));

    let mut contents = blocks.join("\n\n");
    contents.push('\n');
    Ok(contents)
}

fn write_atomically(output: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
    }
    let mut temp_name = output.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp = output.with_file_name(temp_name);

    fs::write(&temp, contents).map_err(|e| BundleError::io(&temp, e))?;
    if let Err(e) = fs::rename(&temp, output) {
        let _ = fs::remove_file(&temp);
        return Err(BundleError::io(output, e));
    }
    Ok(())
}

/// Canonical form of a path that may not exist yet
fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map_or_else(|_| path.to_path_buf(), |parent| parent.join(name)),
        _ => path.to_path_buf(),
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
