//! Serpent checker
//!
//! Command-line driver for the Serpent semantic analyzer.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use serpent::report::render_diagnostic;
use serpent::{check_source, CheckOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

/// Serpent checker
#[derive(Parser, Debug)]
#[command(name = "serpc")]
#[command(author = "Z1529")]
#[command(version = "0.1.0")]
#[command(about = "Serpent - type and scope checker for a statically checkable Python subset")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a source file for errors
    Check {
        /// Input source file
        input: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Require annotations on every parameter and return
        #[arg(long)]
        strict: bool,
    },
    /// Print generator/coroutine flags of every function as JSON
    Flags {
        /// Input source file
        input: PathBuf,
    },
    /// Print version information
    Version,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Check { input, json, strict } => check_file(input, *json, *strict),
        Commands::Flags { input } => print_flags(input),
        Commands::Version => {
            println!("serpc 0.1.0");
            println!("Serpent Checker (builtin table v{})", serpent::stdlib::TABLE_VERSION);
            println!("License: Apache-2.0");
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn read_source(input: &Path) -> Result<String> {
    fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

/// Check a file; returns whether it passed
fn check_file(input: &Path, json: bool, strict: bool) -> Result<bool> {
    let source = read_source(input)?;
    let file = input.to_string_lossy();
    let options = if strict {
        CheckOptions::strict()
    } else {
        CheckOptions::default()
    };

    let report = check_source(&source, &file, &options);
    if json {
        println!("{}", report.to_json());
        return Ok(report.success);
    }

    for diag in &report.diagnostics {
        eprintln!("{}", render_diagnostic(diag, &source));
    }
    if report.success {
        println!("{}: ok ({} functions, {} ms)", file, report.stats.function_count, report.stats.total_time_ms);
    } else {
        eprintln!("{}: {} error(s)", file, report.diagnostics.len());
    }
    Ok(report.success)
}

/// Print the function-flag map; flags are computed even for rejected bodies
fn print_flags(input: &Path) -> Result<bool> {
    let source = read_source(input)?;
    let file = input.to_string_lossy();
    let mut module =
        serpent::parse_source(&source, &file).with_context(|| format!("failed to parse {}", file))?;

    let outcome = serpent::check(&mut module);
    if !outcome.ok {
        warn!("{}: {} diagnostic(s) while computing flags", file, outcome.diagnostics.len());
    }
    let json = serde_json::to_string_pretty(&outcome.function_flags).context("failed to serialize flags")?;
    println!("{}", json);
    Ok(true)
}
