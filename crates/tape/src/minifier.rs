//! Optional post-processing through an external Lua minifier
//!
//! The minifier is driven as `<binary> process [--config <cfg>] <in> <out>`.
//! A run leaves two files behind: the bundle itself, processed in place, and
//! a compact copy that is processed, flattened onto one line and processed
//! again.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::debug;

use crate::error::{BundleError, Result};

pub const DEFAULT_BINARY: &str = "darklua";

#[derive(Debug, Clone)]
pub struct Minifier {
    binary: PathBuf,
    config: Option<PathBuf>,
}

impl Default for Minifier {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl Minifier {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    /// Run the minifier once, reading `input` and writing `output`
    pub fn process(&self, input: &Path, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.binary);
        command.arg("process");
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        command.arg(input).arg(output);
        debug!("running {command:?}");

        let result = command
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                BundleError::Minify(format!("failed to run {}: {e}", self.binary.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(BundleError::Minify(format!(
                "{} exited with {} on {}: {}",
                self.binary.display(),
                result.status,
                input.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Process `bundle` in place and produce the compact copy at `min_path`
    pub fn minify(&self, bundle: &Path, min_path: &Path) -> Result<()> {
        fs::copy(bundle, min_path).map_err(|e| BundleError::io(min_path, e))?;
        self.process(bundle, bundle)?;

        self.process(min_path, min_path)?;
        let contents = fs::read_to_string(min_path).map_err(|e| BundleError::io(min_path, e))?;
        fs::write(min_path, collapse_whitespace(&contents))
            .map_err(|e| BundleError::io(min_path, e))?;
        self.process(min_path, min_path)
    }
}

/// Squash every whitespace run, newlines included, into a single space.
///
/// Only safe on code without line comments, i.e. after a minifier pass.
pub fn collapse_whitespace(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `script.lua` becomes `script.min.lua`
pub fn default_min_path(bundle: &Path) -> PathBuf {
    let stem = bundle
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = bundle
        .extension()
        .map_or_else(|| "lua".to_owned(), |ext| ext.to_string_lossy().into_owned());
    bundle.with_file_name(format!("{stem}.min.{extension}"))
}
