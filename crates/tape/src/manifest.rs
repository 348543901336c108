//! Package manifests and the on-disk dependency store
//!
//! Vendored packages are looked up in two layouts: the flattened store
//! (`<store>/.pnpm/<scope>+<name>@<version>/node_modules/<scope>/<name>`),
//! where several versions can coexist and the manifest's version range picks
//! one, and the direct layout (`<store>/<scope>/<name>`).

use std::{
    fs,
    path::{Path, PathBuf},
};

use cow_utils::CowUtils;
use indexmap::IndexMap;
use log::{debug, warn};
use semver::{Version, VersionReq};
use serde::Deserialize;

use crate::error::{BundleError, Result};

/// Subset of `package.json` the bundler cares about
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Entry file relative to the package root
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: IndexMap<String, String>,
}

impl PackageManifest {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| BundleError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| BundleError::io(path, e))?;
        Self::parse(&contents, path)
    }

    /// Load `path` if it exists; a missing manifest is not an error
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if path.is_file() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Declared version range for `package`, searching regular, dev and peer
    /// dependencies in that order
    pub fn dependency_range(&self, package: &str) -> Option<&str> {
        self.dependencies
            .get(package)
            .or_else(|| self.dev_dependencies.get(package))
            .or_else(|| self.peer_dependencies.get(package))
            .map(String::as_str)
    }

    /// The range as a semver requirement. Ranges that semver cannot express
    /// (`workspace:*`, git URLs, tags) yield `None` and match any version.
    pub fn version_req(&self, package: &str) -> Option<VersionReq> {
        let range = self.dependency_range(package)?;
        match VersionReq::parse(range) {
            Ok(req) => Some(req),
            Err(e) => {
                debug!("ignoring version range {range:?} for {package}: {e}");
                None
            }
        }
    }
}

/// Split a dependency reference into the package name and the rest.
///
/// `["@rbxts", "services", "src"]` becomes `("@rbxts/services", ["src"])`;
/// unscoped packages take a single segment.
pub fn split_package_name(segments: &[String]) -> Option<(String, &[String])> {
    let first = segments.first()?;
    if first.starts_with('@') {
        let name = segments.get(1)?;
        Some((format!("{first}/{name}"), &segments[2..]))
    } else {
        Some((first.clone(), &segments[1..]))
    }
}

/// Locates package roots inside a dependency store
#[derive(Debug)]
pub struct VendorStore {
    root: PathBuf,
    manifest: Option<PackageManifest>,
}

impl VendorStore {
    pub fn new(root: impl Into<PathBuf>, manifest: Option<PackageManifest>) -> Self {
        Self {
            root: root.into(),
            manifest,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `package`, preferring the flattened layout
    pub fn locate(&self, package: &str) -> Option<PathBuf> {
        let req = self
            .manifest
            .as_ref()
            .and_then(|manifest| manifest.version_req(package));

        if let Some(found) = self.locate_flattened(package, req.as_ref()) {
            return Some(found);
        }

        let direct = self.root.join(package);
        if !direct.is_dir() {
            return None;
        }
        if let Some(req) = &req {
            match installed_version(&direct) {
                Some(version) if !req.matches(&version) => {
                    warn!("{package}@{version} in {} does not satisfy {req}", self.root.display());
                }
                _ => {}
            }
        }
        Some(direct)
    }

    /// Highest matching version in `<store>/.pnpm`
    fn locate_flattened(&self, package: &str, req: Option<&VersionReq>) -> Option<PathBuf> {
        let store = self.root.join(".pnpm");
        let prefix = format!("{}@", package.cow_replace("/", "+"));
        let entries = fs::read_dir(&store).ok()?;

        let mut best: Option<(Version, PathBuf)> = None;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(rest) = file_name.to_str().and_then(|name| name.strip_prefix(&prefix)) else {
                continue;
            };
            // Peer-dependency suffixes follow the version after an underscore
            let version_text = rest.split('_').next().unwrap_or(rest);
            let Ok(version) = Version::parse(version_text) else {
                continue;
            };
            if req.is_some_and(|req| !req.matches(&version)) {
                continue;
            }
            let candidate = entry.path().join("node_modules").join(package);
            if !candidate.is_dir() {
                continue;
            }
            if best.as_ref().is_none_or(|(current, _)| version > *current) {
                best = Some((version, candidate));
            }
        }

        best.map(|(version, path)| {
            debug!("{package} resolved to {version} in flattened store");
            path
        })
    }
}

fn installed_version(package_root: &Path) -> Option<Version> {
    let manifest = PackageManifest::load(&package_root.join("package.json")).ok()?;
    Version::parse(manifest.version.as_deref()?).ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn manifest(json: &str) -> PackageManifest {
        PackageManifest::parse(json, Path::new("package.json")).unwrap()
    }

    fn make_dir(path: &Path) {
        fs::create_dir_all(path).unwrap();
    }

    #[test]
    fn test_dependency_range_lookup_order() {
        let m = manifest(
            r#"{
                "dependencies": { "@rbxts/services": "^1.5.0" },
                "devDependencies": { "@rbxts/types": "^1.0.0", "@rbxts/services": "^9.0.0" }
            }"#,
        );
        assert_eq!(m.dependency_range("@rbxts/services"), Some("^1.5.0"));
        assert_eq!(m.dependency_range("@rbxts/types"), Some("^1.0.0"));
        assert_eq!(m.dependency_range("missing"), None);
    }

    #[test]
    fn test_unparseable_range_matches_anything() {
        let m = manifest(r#"{ "dependencies": { "pkg": "workspace:*" } }"#);
        assert!(m.version_req("pkg").is_none());
    }

    #[test]
    fn test_split_package_name() {
        let segments: Vec<String> = ["@rbxts", "services", "src"].map(String::from).to_vec();
        let (name, rest) = split_package_name(&segments).unwrap();
        assert_eq!(name, "@rbxts/services");
        assert_eq!(rest, &["src".to_owned()]);

        let segments: Vec<String> = vec!["lodash".into()];
        let (name, rest) = split_package_name(&segments).unwrap();
        assert_eq!(name, "lodash");
        assert!(rest.is_empty());

        let segments: Vec<String> = vec!["@scope".into()];
        assert!(split_package_name(&segments).is_none());
    }

    #[test]
    fn test_flattened_store_picks_highest_matching_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("node_modules");
        for version in ["1.4.0", "1.6.2", "2.0.0"] {
            make_dir(
                &store
                    .join(".pnpm")
                    .join(format!("@rbxts+services@{version}"))
                    .join("node_modules/@rbxts/services"),
            );
        }
        let m = manifest(r#"{ "dependencies": { "@rbxts/services": "^1.5.0" } }"#);

        let found = VendorStore::new(&store, Some(m)).locate("@rbxts/services").unwrap();

        assert!(found.starts_with(store.join(".pnpm/@rbxts+services@1.6.2")));
    }

    #[test]
    fn test_falls_back_to_direct_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("node_modules");
        make_dir(&store.join("@rbxts/services"));

        let found = VendorStore::new(&store, None).locate("@rbxts/services").unwrap();

        assert_eq!(found, store.join("@rbxts/services"));
    }

    #[test]
    fn test_missing_package() {
        let temp_dir = TempDir::new().unwrap();
        let store = VendorStore::new(temp_dir.path(), None);
        assert!(store.locate("@rbxts/none").is_none());
    }
}
