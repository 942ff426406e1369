//! CoRunner CLI Entry Point
//!
//! Runs a demo coroutine that mixes code, delay and loopback I/O steps
//! concurrently and reports the outcome of every run.
//!
//! # Usage
//!
//! ```bash
//! # Run four concurrent quotes with the default configuration
//! corunner
//!
//! # Use a configuration file and more runs
//! corunner --config corunner.yaml --runs 16
//!
//! # Print the execution timeline of every run as JSON
//! corunner --timeline --verbose
//! ```

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use log::{error, info, warn};

use corunner::config::{load_config, EngineConfig};
use corunner::coroutine::{Continuation, Coroutine, CoroutineScope};
use corunner::steps::{CodeExecution, Condition, Delay, IoStep, LoopbackEndpoint};
use corunner::{APP_NAME, VERSION};

/// Default number of concurrent runs.
const DEFAULT_RUNS: usize = 4;

/// Upper bound of `--runs`.
const MAX_RUNS: usize = 10_000;

/// Order value from which a discount applies.
const DISCOUNT_THRESHOLD: f64 = 50.0;

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    config_path: Option<String>,
    runs: usize,
    timeline: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: None,
            runs: DEFAULT_RUNS,
            timeline: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Cooperative Coroutine Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: corunner [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH       Load engine configuration from a YAML file");
    println!(
        "  --runs N            Number of concurrent runs, at most {} (default: {})",
        MAX_RUNS, DEFAULT_RUNS
    );
    println!("  --timeline          Print the execution timeline of every run");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  corunner --runs 16");
    println!("  corunner --config corunner.yaml --timeline");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--timeline" => {
                config.timeline = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                config.config_path = Some(args[i].clone());
            }
            "--runs" => {
                i += 1;
                if i >= args.len() {
                    return Err("--runs requires a number argument".to_string());
                }
                config.runs = args[i]
                    .parse()
                    .ok()
                    .filter(|runs| (1..=MAX_RUNS).contains(runs))
                    .ok_or_else(|| {
                        format!("Invalid runs value: {} (expected 1-{})", args[i], MAX_RUNS)
                    })?;
            }
            arg => {
                return Err(format!("Unknown argument: {}", arg));
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Builds the demo coroutine: validates an order quantity, waits for the
/// pricing service and formats the discounted total.
fn quote_coroutine() -> Coroutine<u32, String> {
    let pricing = LoopbackEndpoint::new("pricing", |quantity: u32| Ok(f64::from(quantity) * 9.5))
        .with_latency(Duration::from_millis(30));

    Coroutine::first(
        "Quote",
        CodeExecution::try_apply(|quantity: u32| {
            if quantity == 0 {
                Err("order is empty")
            } else {
                Ok(quantity)
            }
        })
        .labeled("Validate"),
    )
    .then(Delay::millis(20))
    .then(IoStep::new(pricing).labeled("FetchPrice"))
    .then(
        Condition::when(
            |total: &f64| *total >= DISCOUNT_THRESHOLD,
            CodeExecution::apply(|total: f64| total * 0.9).labeled("Discount"),
        )
        .otherwise(CodeExecution::apply(|total: f64| total).labeled("FullPrice")),
    )
    .then(CodeExecution::apply(|total: f64| format!("{:.2}", total)).labeled("Format"))
}

/// Prints the outcome of one run.
fn report_run(quantity: u32, run: &Continuation, timeline: bool) {
    match run.result::<String>() {
        Ok(Some(total)) => println!(
            "  {} run {:>3}: {:>4} item(s) -> {}",
            "✓".green(),
            run.id(),
            quantity,
            total.bold()
        ),
        Ok(None) => println!("  {} run {:>3}: no result", "-".yellow(), run.id()),
        Err(e) => println!("  {} run {:>3}: {}", "✗".red(), run.id(), e),
    }

    if timeline {
        match run.timeline().to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Could not export timeline of run {}: {}", run.id(), e),
        }
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let engine_config = match &config.config_path {
        Some(path) => load_config(path).map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })?,
        None => EngineConfig::default(),
    };
    info!(
        "Scheduler: {} worker thread(s), {} run(s)",
        engine_config.scheduler.worker_threads, config.runs
    );

    let scope = CoroutineScope::with_config("demo", &engine_config)?;
    let coroutine = quote_coroutine();

    let runs: Vec<(u32, Continuation)> = (1..=config.runs)
        .map(|i| {
            let quantity = u32::try_from(i).map_or(u32::MAX, |i| i.saturating_mul(3));
            (quantity, coroutine.start(quantity, &scope))
        })
        .collect();

    let outcome = scope.await_all();

    println!();
    println!("Results:");
    for (quantity, run) in &runs {
        report_run(*quantity, run, config.timeline);
    }
    println!();

    outcome?;
    info!("All {} run(s) finished", runs.len());
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
