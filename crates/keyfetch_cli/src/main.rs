//! KEYFETCH CLI
//!
//! Runs scripted scenarios against the fetch engine and derives data keys.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use keyfetch_core::derive_key;
use keyfetch_runtime::EngineMetrics;
use keyfetch_sim::{RecordedEvent, Scenario, ScenarioResult};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keyfetch")]
#[command(about = "KEYFETCH - keyed fetch deduplication and cancellation", long_about = None)]
struct Cli {
    /// Log level for keyfetch crates (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file and print the emitted events
    Run {
        /// Path to scenario JSON
        file: PathBuf,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Override the start grace window, in milliseconds
        #[arg(long)]
        grace_ms: Option<u64>,
        /// Override the settle window, in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,
    },
    /// Print the data key of an operation and its arguments
    Key {
        /// Operation type
        operation_type: String,
        /// Arguments, each as JSON text
        arguments: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Aligned columns and a summary
    Text,
    /// One JSON object per event
    Json,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("keyfetch={}", level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyfetch=info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Commands::Run {
            file,
            format,
            grace_ms,
            settle_ms,
        } => {
            let mut scenario = Scenario::load(&file)?;
            if let Some(grace_ms) = grace_ms {
                scenario.config.engine.start_grace_ms = grace_ms;
            }
            if let Some(settle_ms) = settle_ms {
                scenario.config.settle_ms = settle_ms;
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            info!(
                file = %file.display(),
                steps = scenario.steps.len(),
                grace_ms = scenario.config.engine.start_grace_ms,
                "running scenario"
            );
            let result = runtime.block_on(scenario.run())?;
            info!(
                events = result.events.len(),
                started = result.metrics.started,
                in_flight = result.metrics.in_flight,
                "scenario finished"
            );
            match format {
                OutputFormat::Text => print_text(&result),
                OutputFormat::Json => print_json(&result)?,
            }
            Ok(())
        }
        Commands::Key {
            operation_type,
            arguments,
        } => {
            let arguments = arguments
                .iter()
                .map(|raw| {
                    serde_json::from_str::<Value>(raw)
                        .wrap_err_with(|| format!("argument is not JSON: {}", raw))
                })
                .collect::<Result<Vec<_>>>()?;
            let key = derive_key(&operation_type, &arguments);
            println!("key:    {}", key);
            println!("digest: {}", key.digest().to_hex());
            Ok(())
        }
    }
}

fn print_text(result: &ScenarioResult) {
    if !result.name.is_empty() {
        println!("scenario: {}", result.name);
    }
    for recorded in &result.events {
        println!("{}", format_event(recorded));
    }
    println!("{}", format_metrics(&result.metrics));
}

fn format_event(recorded: &RecordedEvent) -> String {
    let json = recorded.event.to_json();
    let marker = if recorded.event.is_error() { " error" } else { "" };
    format!(
        "{:>6}ms  {:<16} {}{}  context={}",
        recorded.at_ms,
        recorded.event.type_name(),
        json["payload"],
        marker,
        json["context"]
    )
}

fn format_metrics(metrics: &EngineMetrics) -> String {
    format!(
        "admitted={} suppressed={} started={} completed={} failed={} cancelled={} aborted={} in_flight={}",
        metrics.admitted,
        metrics.suppressed,
        metrics.started,
        metrics.completed,
        metrics.failed,
        metrics.cancelled,
        metrics.aborted_before_start,
        metrics.in_flight
    )
}

fn print_json(result: &ScenarioResult) -> Result<()> {
    for recorded in &result.events {
        let mut line = recorded.event.to_json();
        if let Value::Object(map) = &mut line {
            map.insert("at_ms".to_string(), Value::from(recorded.at_ms));
        }
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}
