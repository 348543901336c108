use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Env, Target};
use log::info;
use tape::{
    config::{Config, Overrides},
    orchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "tape", version, about = "Bundle compiled Luau modules into a single script", long_about = None)]
struct Cli {
    /// Directory of compiled modules [default: the configured target, `out`]
    target: Option<PathBuf>,

    /// Bundle file to write
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file to use instead of `tape.toml`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump the module tree and every resolution step to stdout
    #[arg(short, long)]
    verbose: bool,

    /// Warn about references that cannot be resolved instead of failing
    #[arg(long)]
    allow_unresolved: bool,

    /// Also run the external minifier
    #[arg(long)]
    minify: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Bundle error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise `debug` to stdout when verbose, `warn` to stderr
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default_level));
    builder.format_timestamp(None);
    if verbose {
        builder.target(Target::Stdout);
    }
    builder.init();
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;

    let config = Config::discover(cli.config.as_deref(), &cwd)?.with_overrides(
        Overrides {
            target: cli.target,
            output: cli.output,
            allow_unresolved: cli.allow_unresolved,
            minify: cli.minify,
        },
        &cwd,
    );
    let options = config.bundle_options()?;

    let report = orchestrator::bundle(&config.target, &options)?;
    info!(
        "bundled {} modules into {} (entry {}, sha256 {})",
        report.module_count,
        report.output.display(),
        report.entry,
        report.digest
    );
    if let Some(minified) = &report.minified {
        info!("minified bundle at {}", minified.display());
    }
    Ok(())
}
