//! Command-line interface for the BMS point mapper.

mod input;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pointmap_core::prelude::*;
use pointmap_core::ChainedOracle;
use pointmap_storage::RedbMappingStore;

/// Map raw building-automation point names onto EnOS model paths.
#[derive(Parser, Debug)]
#[command(name = "pointmap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Map a point export and print the batch report.
    Map {
        /// Point export (.csv or JSON array).
        #[arg(short, long, required = true)]
        input: PathBuf,
        /// Mapper configuration file (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Mapping database; in-memory when omitted.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Rule table (TOML) tried before the remote oracle.
        #[arg(short, long)]
        rules: Option<PathBuf>,
        /// Remote inference endpoint.
        #[arg(long)]
        oracle_endpoint: Option<String>,
        /// Cap on points per oracle call.
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
    /// List mapped devices.
    Devices {
        /// Mapping database.
        #[arg(long, required = true)]
        db: PathBuf,
        /// Only devices of this type.
        #[arg(short = 't', long)]
        device_type: Option<String>,
    },
    /// List mapping records.
    Records {
        /// Mapping database.
        #[arg(long, required = true)]
        db: PathBuf,
        /// Only records of this device.
        #[arg(short, long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Map {
            input,
            config,
            db,
            rules,
            oracle_endpoint,
            batch_size,
        } => {
            run_map(
                &input,
                config.as_deref(),
                db.as_deref(),
                rules.as_deref(),
                oracle_endpoint,
                batch_size,
            )
            .await
        }
        Command::Devices { db, device_type } => list_devices(&db, device_type.as_deref()).await,
        Command::Records { db, device } => list_records(&db, device.as_deref()).await,
    }
}

fn init_logging(verbose: bool) {
    // JSON logs for container environments
    let json_logging = std::env::var("POINTMAP_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "pointmap={0},pointmap_core={0},pointmap_storage={0}",
            default_level
        ))
        .add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<MapperConfig> {
    let config = match path {
        Some(path) => MapperConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MapperConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn open_store(db: Option<&Path>) -> Result<Arc<dyn MappingStore>> {
    match db {
        Some(path) => {
            let store = RedbMappingStore::open(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Ok(store)
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(feature = "http")]
fn remote_oracle(endpoint: String, config: &MapperConfig) -> Result<Arc<dyn MappingOracle>> {
    use pointmap_core::{HttpOracle, HttpOracleConfig};

    let mut oracle_config =
        HttpOracleConfig::new(endpoint).with_timeout_secs(config.oracle_timeout_seconds);
    if let Ok(key) = std::env::var("POINTMAP_ORACLE_API_KEY") {
        oracle_config = oracle_config.with_api_key(key);
    }
    let oracle = HttpOracle::new(oracle_config).context("Failed to create HTTP oracle")?;
    Ok(Arc::new(oracle))
}

#[cfg(not(feature = "http"))]
fn remote_oracle(_endpoint: String, _config: &MapperConfig) -> Result<Arc<dyn MappingOracle>> {
    anyhow::bail!("Remote oracle requires the `http` feature")
}

/// Rules first, the remote oracle for whatever they leave unresolved.
fn build_oracle(
    rules: Option<&Path>,
    endpoint: Option<String>,
    config: &MapperConfig,
) -> Result<Arc<dyn MappingOracle>> {
    let rules: Option<Arc<dyn MappingOracle>> = match rules {
        Some(path) => Some(Arc::new(
            RuleOracle::from_file(path)
                .with_context(|| format!("Failed to load rules {}", path.display()))?,
        )),
        None => None,
    };
    let remote = endpoint
        .map(|endpoint| remote_oracle(endpoint, config))
        .transpose()?;

    match (rules, remote) {
        (Some(rules), Some(remote)) => Ok(Arc::new(ChainedOracle::new(rules, remote))),
        (Some(oracle), None) | (None, Some(oracle)) => Ok(oracle),
        (None, None) => {
            tracing::warn!("No rules or oracle endpoint given; every point will stay unresolved");
            Ok(Arc::new(StaticOracle::new()))
        }
    }
}

async fn run_map(
    input: &Path,
    config: Option<&Path>,
    db: Option<&Path>,
    rules: Option<&Path>,
    oracle_endpoint: Option<String>,
    batch_size: Option<usize>,
) -> Result<()> {
    let config = load_config(config)?;
    let points = input::load_points(input)?;
    tracing::info!("Loaded {} points from {}", points.len(), input.display());

    let oracle = build_oracle(rules, oracle_endpoint, &config)?;
    let store = open_store(db)?;
    let engine = MappingEngine::new(config, oracle, store)?;

    let handle = engine.map_batch(points, batch_size)?;
    tracing::info!("Submitted task {}", handle.task_id());
    let report = handle.wait().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == BatchStatus::Failed {
        anyhow::bail!(
            "Batch failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn list_devices(db: &Path, device_type: Option<&str>) -> Result<()> {
    let store = open_store(Some(db))?;
    let instances = match device_type {
        Some(device_type) => store.list_instances_by_type(device_type).await?,
        None => store.list_instances().await?,
    };

    if instances.is_empty() {
        println!("No devices found.");
        return Ok(());
    }
    for instance in instances {
        println!(
            "{:<24} {:<12} {:<9} {} mapped",
            instance.device_id,
            instance.device_type,
            instance.status.as_str(),
            instance.mappings.len()
        );
    }
    Ok(())
}

async fn list_records(db: &Path, device: Option<&str>) -> Result<()> {
    let store = open_store(Some(db))?;
    let records = match device {
        Some(device) => store.list_records_for_device(device).await?,
        None => store.list_records().await?,
    };
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
