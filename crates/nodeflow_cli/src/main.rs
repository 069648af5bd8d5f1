// SPDX-License-Identifier: MIT OR Apache-2.0
//! `nodeflow` - run and inspect node graphs from the command line.
//!
//! Graphs are read from RON files produced by `GraphData::save`.
//! Debug Log nodes write through `tracing`, so `RUST_LOG` controls
//! what a run prints.

use clap::{Parser, Subcommand};
use nodeflow_graph::{
    Evaluator, Graph, GraphData, GraphRunner, GraphSettings, LoadError, NodeRegistry,
    PinTypeRegistry, RunError, TracingLogger,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run and inspect node graphs
#[derive(Parser, Debug)]
#[command(name = "nodeflow", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a graph from its entry node
    Run {
        /// Graph file
        graph: PathBuf,

        /// Settings file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Key of the node to start from instead of the entry point
        #[arg(short, long)]
        entry: Option<String>,
    },

    /// Pull-evaluate one node and print its outputs
    Eval {
        /// Graph file
        graph: PathBuf,

        /// Key of the node to evaluate
        node: String,

        /// Settings file
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// List registered node types
    Nodes,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to read settings: {0}")]
    Settings(#[from] std::io::Error),

    #[error("Failed to load graph: {0}")]
    Load(#[from] LoadError),

    #[error("No node with key {0:?}")]
    UnknownNode(String),

    #[error(transparent)]
    Run(#[from] RunError),
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli.command) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn execute(command: Command) -> Result<(), CliError> {
    let nodes = NodeRegistry::builtin();
    match command {
        Command::Run {
            graph,
            settings,
            entry,
        } => {
            let settings = load_settings(settings.as_deref())?;
            let mut graph = load_graph(&graph, &nodes, &settings)?;
            let runner = GraphRunner::new(settings);
            let report = match entry {
                Some(key) => {
                    let start = find_node(&graph, &key)?;
                    runner.run_from(&mut graph, start)?
                }
                None => runner.run(&mut graph)?,
            };
            if report.hit_limit {
                tracing::warn!("Run stopped after {} executions", report.executed);
            } else {
                tracing::info!("Run finished after {} executions", report.executed);
            }
        }
        Command::Eval {
            graph,
            node,
            settings,
        } => {
            let settings = load_settings(settings.as_deref())?;
            let mut graph = load_graph(&graph, &nodes, &settings)?;
            let id = find_node(&graph, &node)?;
            Evaluator::new(&settings)
                .evaluate(&mut graph, id, &TracingLogger)
                .map_err(RunError::from)?;
            if let Some(node) = graph.node(id) {
                for pin in node.outputs().filter(|p| !p.is_execute()) {
                    println!("{}.{} = {}", node.key, pin.name, pin.value());
                }
            }
        }
        Command::Nodes => {
            for node_type in nodes.types() {
                println!(
                    "{:<16} {:<12} {}",
                    node_type.class_type,
                    format!("{:?}", node_type.category),
                    node_type.description
                );
            }
        }
    }
    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<GraphSettings, CliError> {
    match path {
        Some(path) => Ok(GraphSettings::load(path)?),
        None => Ok(GraphSettings::default()),
    }
}

fn load_graph(path: &Path, nodes: &NodeRegistry, settings: &GraphSettings) -> Result<Graph, CliError> {
    let data = GraphData::load(path)?;
    let graph = Graph::from_data(&data, nodes, Arc::new(PinTypeRegistry::builtin()), settings)?;
    tracing::debug!(
        "Loaded {} ({} nodes, {} connections)",
        path.display(),
        graph.node_count(),
        graph.connection_count()
    );
    Ok(graph)
}

fn find_node(graph: &Graph, key: &str) -> Result<nodeflow_graph::NodeId, CliError> {
    graph
        .node_by_key(key)
        .map(|n| n.id)
        .ok_or_else(|| CliError::UnknownNode(key.to_string()))
}
