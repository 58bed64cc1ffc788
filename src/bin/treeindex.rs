//! treeindex CLI Binary
//!
//! Command-line interface for the tree index.

use anyhow::Context;
use clap::Parser;
use std::process;
use treeindex::config::ConfigLoader;
use treeindex::logging::init_logging;
use treeindex::tooling::cli::{Cli, CliContext};

fn run(cli: &Cli) -> anyhow::Result<String> {
    let context = CliContext::new(cli.config.clone(), cli.database.clone())
        .context("Error opening index")?;
    let output = context.execute(&cli.command)?;
    Ok(output)
}

fn main() {
    let cli = Cli::parse();

    // Logging is configured before the service opens the database
    let base = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
    .map(|c| c.logging)
    .unwrap_or_default();
    if let Err(e) = init_logging(Some(&cli.logging_config(&base))) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    match run(&cli) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
