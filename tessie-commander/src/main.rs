mod collector;
mod config;
mod discovery;
mod error;
mod protocol;
mod registry;
mod scheduler;
mod simulator;
mod task;
mod transport;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use collector::OutputCollector;
use config::{Cli, Command, CommanderConfig, SimulateArgs};
use registry::NodeRegistry;
use scheduler::Scheduler;
use simulator::{SimulatedNode, SimulatorConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use task::Payload;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Command::Listen => listen(&cli.commander).await,
        Command::Submit {
            binary,
            payloads,
            arguments,
        } => submit(&cli.commander, &binary, &payloads, arguments).await,
        Command::Retrieve => retrieve(&cli.commander).await,
        Command::Simulate(args) => simulate(args).await,
    }
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tessie=debug,warn")
    } else {
        EnvFilter::new("tessie=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn discover(config: &CommanderConfig) -> Result<NodeRegistry> {
    discovery::discover(config.discovery())
        .await
        .context("Discovery failed")
}

async fn listen(config: &CommanderConfig) -> Result<()> {
    let registry = discover(config).await?;

    println!("\nAvailable Nodes:");
    for node in registry.nodes() {
        println!(
            "IP: {}, Node: {}, MAC: {}, Total Executed: {}, Status: {}, Free SPIFFS: {}, RSSI: {}",
            node.address,
            node.name,
            node.mac,
            node.total_executed,
            node.status,
            node.free_spiffs_bytes,
            node.rssi
        );
    }
    println!();
    Ok(())
}

async fn submit(
    config: &CommanderConfig,
    binary: &Path,
    payload_paths: &[PathBuf],
    arguments: Vec<String>,
) -> Result<()> {
    let binary = tokio::fs::read(binary)
        .await
        .with_context(|| format!("Failed to read binary {}", binary.display()))?;
    let mut payloads = Vec::with_capacity(payload_paths.len());
    for path in payload_paths {
        payloads.push(load_payload(path).await?);
    }

    let tasks = task::fan_out(binary, payloads, arguments)?;
    info!(tasks = tasks.len(), "Tasks queued");

    let registry = discover(config).await?;
    let transport = HttpTransport::new(config.node_port, config.request_timeout())?;
    let collector = OutputCollector::new(&config.output_dir).await?;
    info!(output_dir = %collector.root_dir().display(), "Dispatching");

    let mut scheduler = Scheduler::new(transport, registry, tasks, collector, config.poll_interval());
    let summary = scheduler.run().await;

    for artifact in &summary.artifacts {
        println!("Output from {}: {}", artifact.node, artifact.path.display());
    }
    Ok(())
}

async fn load_payload(path: &Path) -> Result<Payload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("File {} not found!", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Payload path {} has no file name", path.display()))?;
    Ok(Payload::new(name, data))
}

async fn retrieve(config: &CommanderConfig) -> Result<()> {
    let registry = discover(config).await?;
    let transport = HttpTransport::new(config.node_port, config.request_timeout())?;
    let collector = OutputCollector::new(&config.output_dir).await?;

    for node in registry.nodes() {
        match collector.fetch(&transport, node.address).await {
            Ok(Some(artifact)) => {
                println!("Output from {}: {}", node.address, artifact.path.display())
            }
            Ok(None) => println!("No output available yet from {}", node.address),
            Err(e) => println!("No output available yet from {} ({})", node.address, e),
        }
    }
    Ok(())
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let node = SimulatedNode::new(SimulatorConfig {
        name: args.name,
        mac: args.mac,
        run_time: Duration::from_millis(args.run_time_ms),
        ..SimulatorConfig::default()
    });
    simulator::run(
        node,
        args.http_port,
        args.advertise_to,
        Duration::from_millis(args.advertise_interval_ms),
    )
    .await
}
