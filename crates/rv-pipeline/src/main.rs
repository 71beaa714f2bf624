//! Retail Vault pipeline CLI

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rv_common::hashkey::derive_key;
use rv_common::logging::{init_logging, LogConfig, LogLevel};
use rv_pipeline::config::{PipelineConfig, WarehouseBackend};
use rv_pipeline::metrics::{LogSink, MetricsSink, PushgatewaySink};
use rv_pipeline::pipeline::{pipeline_graph, Pipeline, PipelineContext};
use rv_pipeline::warehouse::{MemoryWarehouse, PgWarehouse, Warehouse};
use rv_pipeline::UnitStatus;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rv-pipeline")]
#[command(author, version, about = "Incremental Data Vault load pipeline for retail transactions")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline once
    Run {
        /// CSV export to load (keeps the current raw table when omitted)
        #[arg(short, long, env = "RV_SOURCE_PATH")]
        input: Option<PathBuf>,

        /// Warehouse backend: memory or postgres
        #[arg(short, long, env = "RV_WAREHOUSE")]
        warehouse: Option<String>,
    },

    /// Print the execution waves of the dependency graph
    Graph,

    /// Derive the hash key of an ordered attribute tuple
    Key {
        /// Attribute values, in key order
        #[arg(required = true)]
        attributes: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("rv-pipeline")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    let code = match execute(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        },
    };

    // Flush the file writer before exiting
    drop(guard);
    process::exit(code);
}

async fn execute(command: Command) -> Result<i32> {
    match command {
        Command::Run { input, warehouse } => run(input, warehouse).await,
        Command::Graph => {
            let config = PipelineConfig::load()?;
            let graph = pipeline_graph(config.retry.policy(), config.extract_retry.policy())?;
            for (i, wave) in graph.waves().iter().enumerate() {
                println!("wave {}: {}", i, wave.join(", "));
            }
            Ok(0)
        },
        Command::Key { attributes } => {
            println!("{}", derive_key(&attributes));
            Ok(0)
        },
    }
}

async fn run(input: Option<PathBuf>, backend: Option<String>) -> Result<i32> {
    let mut config = PipelineConfig::load()?;
    if let Some(path) = input {
        config.source_path = Some(path);
    }
    if let Some(backend) = backend {
        config.warehouse = backend.parse()?;
    }
    config.validate()?;

    let warehouse: Arc<dyn Warehouse> = match config.warehouse {
        WarehouseBackend::Memory => Arc::new(MemoryWarehouse::new()),
        WarehouseBackend::Postgres => Arc::new(
            PgWarehouse::connect(&config.database)
                .await
                .context("Failed to connect to the warehouse database")?,
        ),
    };
    let metrics: Arc<dyn MetricsSink> = match &config.pushgateway_url {
        Some(url) => Arc::new(PushgatewaySink::new(url)?),
        None => Arc::new(LogSink),
    };

    let context = PipelineContext::new(warehouse, metrics, &config, Utc::now());
    let pipeline = Pipeline::new(context, &config)?;
    let report = pipeline.run().await?;

    for unit in &report.units {
        let status = match unit.status {
            UnitStatus::Succeeded => "ok",
            UnitStatus::Failed => "FAILED",
            UnitStatus::Skipped => "skipped",
            UnitStatus::Pending => "pending",
        };
        match &unit.error {
            Some(err) => println!("{:<28} {:<8} {}", unit.name, status, err),
            None => println!("{:<28} {:<8} rows={} attempts={}", unit.name, status, unit.rows, unit.attempts),
        }
    }

    if report.is_success() {
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "Pipeline complete");
        Ok(0)
    } else {
        Ok(1)
    }
}
