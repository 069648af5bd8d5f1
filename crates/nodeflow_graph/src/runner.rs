// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execute-flow runner.
//!
//! Starting from an entry node, each step pulls the current node's inputs,
//! calculates and executes it, then follows the execute output it picked
//! to the next node. Runs stop when no connection leaves that output or
//! when the execution ceiling is hit.

use crate::evaluation::{EvaluationError, Evaluator};
use crate::graph::Graph;
use crate::logging::{GraphLogger, TracingLogger};
use crate::node::{FlowStep, NodeId};
use crate::pin_type::PinType;
use crate::settings::GraphSettings;
use std::sync::Arc;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Node executions performed
    pub executed: usize,
    /// True if the run was halted by the execution ceiling
    pub hit_limit: bool,
    /// Last node executed
    pub last_node: Option<NodeId>,
}

/// Walks execute connections through a graph
pub struct GraphRunner {
    settings: GraphSettings,
    logger: Arc<dyn GraphLogger>,
}

impl GraphRunner {
    /// Create a runner that logs through `tracing`
    pub fn new(settings: GraphSettings) -> Self {
        Self {
            settings,
            logger: Arc::new(TracingLogger),
        }
    }

    /// Replace the logger handed to nodes
    pub fn with_logger(mut self, logger: Arc<dyn GraphLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Settings in use
    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Run from the graph's single entry node
    pub fn run(&self, graph: &mut Graph) -> Result<RunReport, RunError> {
        let entries = graph.entry_points();
        match entries.as_slice() {
            [] => Err(RunError::NoEntryPoint),
            [start] => self.run_from(graph, *start),
            _ => Err(RunError::MultipleEntryPoints(entries.len())),
        }
    }

    /// Run starting at `start`
    pub fn run_from(&self, graph: &mut Graph, start: NodeId) -> Result<RunReport, RunError> {
        if graph.node(start).is_none() {
            return Err(RunError::NodeNotFound(start));
        }
        let logger = self.logger.as_ref();
        let mut evaluator = Evaluator::new(&self.settings);
        let mut report = RunReport {
            executed: 0,
            hit_limit: false,
            last_node: None,
        };
        let mut current = Some(start);

        while let Some(node) = current {
            if report.executed >= self.settings.max_executions {
                tracing::warn!(
                    graph = %graph.id,
                    limit = self.settings.max_executions,
                    "Execution limit reached, halting run"
                );
                report.hit_limit = true;
                break;
            }

            evaluator.evaluate(graph, node, logger)?;
            let step = graph
                .execute_node(node, logger)
                .ok_or(RunError::NodeNotFound(node))?;
            report.executed += 1;
            report.last_node = Some(node);

            current = match step {
                FlowStep::Stop => None,
                FlowStep::Continue(output) => next_node(graph, node, output),
            };
        }

        tracing::debug!(graph = %graph.id, executed = report.executed, "Run finished");
        Ok(report)
    }
}

/// Node reached through the first connection on `node`'s execute output
fn next_node(graph: &Graph, node: NodeId, output: usize) -> Option<NodeId> {
    let pin = graph.node(node)?.output(output)?;
    if pin.pin_type != PinType::Execute {
        tracing::warn!(pin = %pin.name, "Flow continued through a non-execute pin");
        return None;
    }
    graph.connections_from(pin.id).next().map(|c| c.consumer.node)
}

/// Error starting or running a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// No node is an entry point
    #[error("Graph has no entry point")]
    NoEntryPoint,

    /// More than one entry point
    #[error("Graph has {0} entry points, expected one")]
    MultipleEntryPoints(usize),

    /// Node not found
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Input resolution failed
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}
