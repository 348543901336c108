//! Bundle a tree of compiled Luau modules into a single script.
//!
//! The pipeline runs [`explorer`] → [`initifier`] → [`resolver`] → [`namer`]
//! → [`codegen`], driven by [`orchestrator::bundle`].

pub mod codegen;
pub mod config;
pub mod error;
pub mod explorer;
pub mod initifier;
pub mod manifest;
pub mod minifier;
pub mod namer;
pub mod node;
pub mod orchestrator;
pub mod references;
pub mod resolver;
pub mod transform;
pub mod types;
