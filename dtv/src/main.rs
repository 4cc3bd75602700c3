//! Command-line validator for config source files.

mod bindings;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use dt_schema::{validate_tree, Registry, ValidationContext};

#[derive(Parser)]
#[command(name = "dtv", about = "Validate config trees against schema fragments")]
struct Args {
    /// Config source files to validate
    #[arg(required = true)]
    config: Vec<PathBuf>,

    /// Directory holding schema fragment files
    #[arg(short, long, default_value = "schema")]
    schema: PathBuf,

    /// Treat the files as fragments of one combined document
    #[arg(short, long)]
    partial: bool,

    /// Abort on the first validation failure
    #[arg(short, long)]
    raise_on_error: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Global setting consulted by conditional rules (KEY=VALUE, repeatable)
    #[arg(long = "setting", value_name = "KEY=VALUE", value_parser = parse_setting)]
    settings: Vec<(String, String)>,
}

fn parse_setting(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<bool> {
    let fragments = bindings::discover(&args.schema)?;
    let registry = Registry::load(fragments)?;
    let settings: HashMap<String, String> = args.settings.iter().cloned().collect();

    if args.partial {
        // Fragments of one document: concatenate, then validate once.
        let mut text = String::new();
        for path in &args.config {
            text.push_str(
                &fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?,
            );
        }
        let ctx = validate(&registry, &settings, args.raise_on_error, "<combined>", &text)?;
        return Ok(report("<combined>", &ctx));
    }

    let mut clean = true;
    for path in &args.config {
        let name = path.display().to_string();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let ctx = validate(&registry, &settings, args.raise_on_error, &name, &text)?;
        clean &= report(&name, &ctx);
    }
    Ok(clean)
}

/// Parse one source text and validate its tree.
///
/// In raise mode the first failure is returned as an error; otherwise
/// failures accumulate in the returned context.
fn validate(
    registry: &Registry,
    settings: &HashMap<String, String>,
    raise_on_error: bool,
    name: &str,
    text: &str,
) -> Result<ValidationContext> {
    let tree = dts_source::from_str(text).with_context(|| format!("parsing {name}"))?;
    let mut ctx = ValidationContext::new(settings.clone(), raise_on_error);
    validate_tree(registry, &tree, &mut ctx).with_context(|| format!("validating {name}"))?;
    Ok(ctx)
}

/// Print the failures for one document. Returns true if it was clean.
fn report(name: &str, ctx: &ValidationContext) -> bool {
    if ctx.failures().is_empty() {
        return true;
    }
    println!("{name}:");
    for failure in ctx.failures() {
        println!("{failure}");
    }
    println!();
    false
}
