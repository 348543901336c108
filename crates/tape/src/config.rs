//! Project configuration (`tape.toml`)
//!
//! Lookup order: an explicit path, `<project>/tape.toml`, the user
//! configuration directory (`<config_dir>/tape/config.toml`), then built-in
//! defaults. Command-line flags are applied on top by the binary.

use std::{
    fs,
    path::{Path, PathBuf},
};

use etcetera::BaseStrategy;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BundleError, Result},
    manifest::PackageManifest,
    minifier::{self, Minifier},
    orchestrator::{BundleOptions, MinifyOptions},
};

pub const PROJECT_CONFIG_FILE: &str = "tape.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the compiled modules
    pub target: PathBuf,
    pub output: PathBuf,
    /// Side directory with runtime library files (RuntimeLib, Promise)
    pub include_dir: PathBuf,
    pub include_marker: String,
    /// Dependency store for vendored packages
    pub vendor_dir: PathBuf,
    pub vendor_marker: String,
    /// Project manifest whose version ranges pick vendored versions
    pub manifest: PathBuf,
    pub allow_unresolved: bool,
    pub minify: Option<MinifyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: PathBuf::from("out"),
            output: PathBuf::from("script.lua"),
            include_dir: PathBuf::from("include"),
            include_marker: "include".to_owned(),
            vendor_dir: PathBuf::from("node_modules"),
            vendor_marker: "node_modules".to_owned(),
            manifest: PathBuf::from("package.json"),
            allow_unresolved: false,
            minify: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct MinifyConfig {
    pub binary: PathBuf,
    pub config: Option<PathBuf>,
    /// Defaults to the bundle path with a `.min.lua` suffix
    pub output: Option<PathBuf>,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(minifier::DEFAULT_BINARY),
            config: None,
            output: None,
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub target: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub allow_unresolved: bool,
    pub minify: bool,
}

impl Config {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|e| BundleError::Config {
            path: path.to_path_buf(),
            message: e.message().to_owned(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| BundleError::io(path, e))?;
        Self::parse(&contents, path)
    }

    /// Find and load the configuration for `project_root`, with every
    /// relative path resolved against the project root
    pub fn discover(explicit: Option<&Path>, project_root: &Path) -> Result<Self> {
        let (config, base) = if let Some(path) = explicit {
            let base = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map_or_else(|| project_root.to_path_buf(), Path::to_path_buf);
            (Self::load(path)?, base)
        } else if let Some(path) = Self::candidates(project_root)
            .into_iter()
            .find(|path| path.is_file())
        {
            debug!("using configuration {}", path.display());
            (Self::load(&path)?, project_root.to_path_buf())
        } else {
            debug!("no configuration file, using defaults");
            (Self::default(), project_root.to_path_buf())
        };
        Ok(config.resolve_paths(&base))
    }

    fn candidates(project_root: &Path) -> Vec<PathBuf> {
        let mut candidates = vec![project_root.join(PROJECT_CONFIG_FILE)];
        candidates.extend(user_config_path());
        candidates
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides, cwd: &Path) -> Self {
        if let Some(target) = overrides.target {
            self.target = cwd.join(target);
        }
        if let Some(output) = overrides.output {
            self.output = cwd.join(output);
        }
        self.allow_unresolved |= overrides.allow_unresolved;
        if overrides.minify && self.minify.is_none() {
            self.minify = Some(MinifyConfig::default());
        }
        self
    }

    /// Anchor every relative path at `base`
    #[must_use]
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        self.target = base.join(&self.target);
        self.output = base.join(&self.output);
        self.include_dir = base.join(&self.include_dir);
        self.vendor_dir = base.join(&self.vendor_dir);
        self.manifest = base.join(&self.manifest);
        if let Some(minify) = &mut self.minify {
            minify.config = minify.config.as_ref().map(|config| base.join(config));
            minify.output = minify.output.as_ref().map(|output| base.join(output));
        }
        self
    }

    /// Options for [`crate::orchestrator::bundle`]; reads the manifest if present
    pub fn bundle_options(&self) -> Result<BundleOptions> {
        let minify = self.minify.as_ref().map(|minify| MinifyOptions {
            minifier: Minifier::new(&minify.binary).with_config(minify.config.clone()),
            output: minify
                .output
                .clone()
                .unwrap_or_else(|| minifier::default_min_path(&self.output)),
        });

        Ok(BundleOptions {
            include_dir: Some(self.include_dir.clone()),
            include_marker: self.include_marker.clone(),
            vendor_dir: Some(self.vendor_dir.clone()),
            vendor_marker: self.vendor_marker.clone(),
            manifest: PackageManifest::load_optional(&self.manifest)?,
            allow_unresolved: self.allow_unresolved,
            minify,
            ..BundleOptions::new(&self.output)
        })
    }
}

/// `<config_dir>/tape/config.toml` for the current user
pub fn user_config_path() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("tape").join("config.toml"))
}
