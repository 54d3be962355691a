//! ParaSuite - parallel test suite orchestrator
//!
//! ## Usage
//!
//! ```bash
//! # Run everything under tests/ in 8 processes
//! parasuite run tests/ -p 8
//!
//! # Run in random order, merging JUnit and coverage reports
//! parasuite run --order random --log-junit build/junit.xml --coverage-json build/coverage.json
//!
//! # Show the units a run would dispatch
//! parasuite list --detailed
//!
//! # Inspect stored runs
//! parasuite results --latest
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tokio::io::BufReader;

use parasuite::cli::{self, Args, Command};
use parasuite::config::{print_env_help, validate_runner, ConfigFile, EnvConfig, RunnerConfig};
use parasuite::discovery::discover;
use parasuite::executor::{order_units, wrapper, Runner};
use parasuite::results::{ResultsStorage, RunRecord};
use parasuite::utils::logger::{init_logger, LogLevel};
use parasuite::FATAL_EXIT;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            FATAL_EXIT
        }
    };

    std::process::exit(code);
}

async fn dispatch(args: Args) -> Result<i32> {
    let (mut settings, config_path) = load_settings(args.config.as_ref())?;
    init_logger(log_level(&settings.log_level, args.verbose));

    match args.command {
        Command::Run(run_args) => {
            run_args.apply_to(&mut settings);
            run_suite(settings).await
        }
        Command::List(list_args) => {
            if !list_args.paths.is_empty() {
                settings.paths = list_args.paths.clone();
            }
            list_units(&settings, list_args.detailed)?;
            Ok(0)
        }
        Command::Config(config_args) => {
            manage_config(config_args, &settings, config_path)?;
            Ok(0)
        }
        Command::Results(results_args) => {
            show_results(results_args, &settings)?;
            Ok(0)
        }
        Command::Worker => {
            wrapper::serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await
                .context("Worker protocol failed")?;
            Ok(0)
        }
    }
}

fn log_level(configured: &str, verbose: bool) -> LogLevel {
    let level = configured.parse().unwrap_or_default();
    if verbose && level != LogLevel::Trace {
        LogLevel::Debug
    } else {
        level
    }
}

/// Defaults, then the config file, then `PARASUITE_*` variables
fn load_settings(explicit: Option<&PathBuf>) -> Result<(RunnerConfig, Option<PathBuf>)> {
    let (file, path) = match explicit {
        Some(path) => (ConfigFile::load(path)?, Some(path.clone())),
        None => ConfigFile::load_default()?,
    };

    let mut settings = file.runner;
    EnvConfig::load().apply_to(&mut settings);
    Ok((settings, path))
}

async fn run_suite(mut settings: RunnerConfig) -> Result<i32> {
    validate_runner(&settings)?;
    settings.colors = settings.colors && io::stdout().is_terminal();

    let units = discover(&settings)?;
    let mut runner = Runner::new(settings, io::stdout());

    // The partial summary is already printed when this fails
    let outcome = runner.run(units).await?;
    Ok(outcome.exit_code)
}

fn list_units(settings: &RunnerConfig, detailed: bool) -> Result<()> {
    validate_runner(settings)?;
    let (units, seed) = order_units(discover(settings)?, settings.order, settings.seed);

    if let Some(seed) = seed {
        println!("Random Seed: {seed}");
    }
    for unit in &units {
        if detailed {
            println!("{unit} [{} expected]", unit.expected_count());
        } else {
            println!("{unit}");
        }
    }
    println!("\n{} unit(s)", units.len());
    Ok(())
}

fn manage_config(
    args: cli::ConfigArgs,
    settings: &RunnerConfig,
    config_path: Option<PathBuf>,
) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("Configuration file created: {}", output.display());
        }

        cli::ConfigAction::Show { env, format } => {
            if env {
                print_env_help();
                return Ok(());
            }

            match &config_path {
                Some(path) => eprintln!("# loaded from {}", path.display()),
                None => eprintln!("# no configuration file found, showing defaults"),
            }
            let effective = ConfigFile {
                runner: settings.clone(),
                ..ConfigFile::default()
            };
            let output = if format == "json" {
                serde_json::to_string_pretty(&effective)?
            } else {
                serde_yaml::to_string(&effective)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or(config_path)
                .or_else(ConfigFile::find)
                .unwrap_or_else(|| PathBuf::from("./parasuite.yaml"));

            match ConfigFile::load(&path) {
                Ok(_) => println!("Configuration file is valid: {}", path.display()),
                Err(e) => {
                    println!("Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

fn show_results(args: cli::ResultsArgs, settings: &RunnerConfig) -> Result<()> {
    let storage = match args.dir.as_ref().or(settings.results_dir.as_ref()) {
        Some(dir) => ResultsStorage::new(dir),
        None => ResultsStorage::default_dir(),
    };

    let runs: Vec<RunRecord> = if args.latest {
        storage.latest()?.into_iter().collect()
    } else {
        storage.list()?
    };

    if runs.is_empty() {
        println!("No stored runs in {}", storage.base_dir().display());
        println!("Store runs with: parasuite run --results-dir <dir>");
        return Ok(());
    }

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if args.latest {
        for run in &runs {
            print_run_details(run);
        }
    } else {
        println!(
            "{:<22} {:<20} {:>5} {:>7} {:>6} {:>6} {:>9}",
            "RUN", "STARTED", "EXIT", "TESTS", "FAIL", "ERR", "DURATION"
        );
        for run in &runs {
            println!(
                "{:<22} {:<20} {:>5} {:>7} {:>6} {:>6} {:>8.1}s",
                run.id,
                run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                run.exit_code,
                run.totals.tests,
                run.totals.failures,
                run.totals.errors,
                run.duration_secs()
            );
        }
    }

    Ok(())
}

fn print_run_details(run: &RunRecord) {
    println!("Run:        {}", run.id);
    println!("Started:    {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Duration:   {:.1}s", run.duration_secs());
    println!("Binary:     {} ({} processes)", run.binary, run.processes);
    if let Some(seed) = run.seed {
        println!("Seed:       {seed}");
    }
    println!("Exit code:  {}", run.exit_code);
    println!(
        "Totals:     {} tests, {} assertions, {} failures, {} errors, {} warnings, {} skipped, {} risky",
        run.totals.tests,
        run.totals.assertions,
        run.totals.failures,
        run.totals.errors,
        run.totals.warnings,
        run.totals.skipped,
        run.totals.risky
    );
    println!();
    for suite in &run.suites {
        let status = if suite.failures + suite.errors > 0 { "FAIL" } else { "ok" };
        println!(
            "  {:<4} {} ({} tests, {:.2}s)",
            status,
            if suite.file.is_empty() { &suite.name } else { &suite.file },
            suite.tests,
            suite.time
        );
    }
}
