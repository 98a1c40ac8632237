//! Assessment test-session runner CLI.
//!
//! Validates compiled test definitions, prints their flattened route and
//! replays scripted candidate sessions against a file-backed store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use qti_runner::core::route::Route;
use qti_runner::exit_codes;
use qti_runner::logging;
use qti_runner::play::{PlayOptions, run_play};
use qti_runner::validate::{validate_config, validate_definition};

#[derive(Parser)]
#[command(
    name = "runner",
    version,
    about = "Assessment test-session runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a compiled definition against the schema and semantic invariants.
    Validate {
        definition: PathBuf,
    },
    /// Print the flattened route of a compiled definition, one item per line.
    Route {
        definition: PathBuf,
    },
    /// Replay a TOML action script, printing the test context after each action.
    Play {
        definition: PathBuf,
        script: PathBuf,
        /// JSON file holding sessions and item states between runs.
        #[arg(long, default_value = ".runner/store.json")]
        store: PathBuf,
        /// Runner configuration (TOML); defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { definition } => cmd_validate(&definition),
        Command::Route { definition } => cmd_route(&definition),
        Command::Play {
            definition,
            script,
            store,
            config,
        } => cmd_play(definition, script, store, config.as_deref()),
    }
}

fn cmd_validate(definition: &Path) -> Result<i32> {
    let (_, summary) = validate_definition(definition)?;
    println!(
        "{}: {} test part(s), {} section(s) ({} adaptive), {} item ref(s), {} route item(s)",
        summary.identifier,
        summary.test_parts,
        summary.sections,
        summary.adaptive_sections,
        summary.item_refs,
        summary.route_items
    );
    Ok(exit_codes::OK)
}

fn cmd_route(definition: &Path) -> Result<i32> {
    let (test, _) = validate_definition(definition)?;
    for item in Route::build(&test).items() {
        let kind = if item.adaptive { "adaptive" } else { "item" };
        println!(
            "{}\t{}\t{}\t{}.{}\t{:?}\t{}",
            item.position,
            item.test_part,
            item.section,
            item.item_ref,
            item.occurrence,
            item.navigation_mode,
            kind
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_play(
    definition: PathBuf,
    script: PathBuf,
    store: PathBuf,
    config: Option<&Path>,
) -> Result<i32> {
    let options = PlayOptions {
        definition,
        script,
        store,
        config: validate_config(config)?,
    };
    let mut print_error = None;
    let outcome = run_play(&options, |step| {
        if print_error.is_some() {
            return;
        }
        match serde_json::to_string(step) {
            Ok(line) => println!("{line}"),
            Err(err) => print_error = Some(err),
        }
    })?;
    if let Some(err) = print_error {
        return Err(err).context("serialize play step");
    }
    if outcome.refused > 0 {
        return Ok(exit_codes::REFUSED);
    }
    Ok(exit_codes::OK)
}
