// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull-based graph evaluation.
//!
//! Calculating a node first calculates every node feeding its inputs,
//! depth-first and left to right, then copies their outputs across and
//! invokes the node itself. Each node under resolution is tracked by an
//! [`ExecutionGroup`]; the [`Evaluator`] keeps them on a stack so a pass
//! can be single-stepped.
//!
//! Nothing is memoized within a pass: a producer feeding two consumers is
//! calculated twice. Producers that carry execute pins are never
//! recalculated by a pull; their current outputs are copied as-is.

use crate::connection::ConnectionId;
use crate::graph::Graph;
use crate::logging::GraphLogger;
use crate::node::{Node, NodeId};
use crate::settings::GraphSettings;

/// Outcome of one [`ExecutionGroup::iterate`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStep {
    /// An upstream producer must be resolved first
    Spawned(ExecutionGroup),
    /// The input cursor moved
    Advanced,
    /// All inputs resolved and the node calculated
    Finished,
}

/// Resolution state of one node within a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionGroup {
    node: NodeId,
    depth: usize,
    cursor: usize,
    pending: Option<ConnectionId>,
    finished: bool,
}

impl ExecutionGroup {
    /// Create a group for `node` at `depth`
    pub fn new(node: NodeId, depth: usize) -> Self {
        Self {
            node,
            depth,
            cursor: 0,
            pending: None,
            finished: false,
        }
    }

    /// The node being resolved
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Nesting depth; the root is 0
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Index of the input currently being resolved
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Connection whose producer is being resolved by a child group
    pub fn pending(&self) -> Option<ConnectionId> {
        self.pending
    }

    /// Whether the node has been calculated
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance by one input.
    ///
    /// A pending child is assumed finished when this is called again;
    /// [`Evaluator`] guarantees that by only stepping the top of its stack.
    pub fn iterate(
        &mut self,
        graph: &mut Graph,
        logger: &dyn GraphLogger,
    ) -> Result<GroupStep, EvaluationError> {
        if self.finished {
            return Ok(GroupStep::Finished);
        }
        let node = graph.node(self.node).ok_or(EvaluationError::NodeNotFound(self.node))?;
        let count = node.input_count();
        let input = node.input(self.cursor).map(|p| (p.id, p.is_execute()));

        if let Some((pin, is_execute)) = input {
            if let Some(connection) = self.pending.take() {
                graph.pull(connection);
                self.cursor += 1;
            } else if is_execute {
                self.cursor += 1;
            } else {
                match graph.connection_to(pin).map(|c| (c.id, c.producer.node)) {
                    None => self.cursor += 1,
                    Some((connection, producer)) => {
                        if graph.node(producer).is_some_and(Node::is_flow_node) {
                            graph.pull(connection);
                            self.cursor += 1;
                        } else {
                            self.pending = Some(connection);
                            return Ok(GroupStep::Spawned(ExecutionGroup::new(
                                producer,
                                self.depth + 1,
                            )));
                        }
                    }
                }
            }
        }

        if self.cursor >= count {
            graph.calculate_node(self.node, logger);
            self.finished = true;
            return Ok(GroupStep::Finished);
        }
        Ok(GroupStep::Advanced)
    }
}

/// Progress of an evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStatus {
    /// Groups remain on the stack
    Running,
    /// The root node has been calculated
    Finished,
}

/// Drives a stack of [`ExecutionGroup`]s
#[derive(Debug, Clone)]
pub struct Evaluator {
    stack: Vec<ExecutionGroup>,
    auto_iterate: bool,
    max_depth: usize,
}

impl Evaluator {
    /// Create an evaluator configured from `settings`
    pub fn new(settings: &GraphSettings) -> Self {
        Self {
            stack: Vec::new(),
            auto_iterate: settings.auto_iterate,
            max_depth: settings.max_pull_depth,
        }
    }

    /// Run to completion on each [`iterate`](Self::iterate) call, or single-step
    pub fn with_auto_iterate(mut self, auto_iterate: bool) -> Self {
        self.auto_iterate = auto_iterate;
        self
    }

    /// Begin a pass rooted at `node`, discarding any unfinished one
    pub fn start_from(&mut self, node: NodeId) {
        self.stack.clear();
        self.stack.push(ExecutionGroup::new(node, 0));
    }

    /// Whether no pass is in progress
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    /// Groups currently on the stack, root first
    pub fn groups(&self) -> &[ExecutionGroup] {
        &self.stack
    }

    /// Advance the pass: one micro-step, or all of them with auto-iterate
    pub fn iterate(
        &mut self,
        graph: &mut Graph,
        logger: &dyn GraphLogger,
    ) -> Result<EvalStatus, EvaluationError> {
        loop {
            let status = self.step(graph, logger)?;
            if !self.auto_iterate || status == EvalStatus::Finished {
                return Ok(status);
            }
        }
    }

    /// Resolve `node`'s inputs and calculate it, to completion
    pub fn evaluate(
        &mut self,
        graph: &mut Graph,
        node: NodeId,
        logger: &dyn GraphLogger,
    ) -> Result<(), EvaluationError> {
        self.start_from(node);
        while self.step(graph, logger)? == EvalStatus::Running {}
        Ok(())
    }

    fn step(
        &mut self,
        graph: &mut Graph,
        logger: &dyn GraphLogger,
    ) -> Result<EvalStatus, EvaluationError> {
        let Some(top) = self.stack.last_mut() else {
            return Ok(EvalStatus::Finished);
        };
        let step = match top.iterate(graph, logger) {
            Ok(step) => step,
            Err(err) => {
                self.stack.clear();
                return Err(err);
            }
        };
        match step {
            GroupStep::Spawned(child) => {
                if child.depth() > self.max_depth {
                    self.stack.clear();
                    tracing::warn!(max_depth = self.max_depth, "Pull evaluation too deep");
                    return Err(EvaluationError::DepthExceeded(self.max_depth));
                }
                self.stack.push(child);
                Ok(EvalStatus::Running)
            }
            GroupStep::Advanced => Ok(EvalStatus::Running),
            GroupStep::Finished => {
                self.stack.pop();
                if self.stack.is_empty() {
                    Ok(EvalStatus::Finished)
                } else {
                    Ok(EvalStatus::Running)
                }
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(&GraphSettings::default())
    }
}

/// Error during evaluation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// Node not found
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Pull recursion went past the configured depth
    #[error("Evaluation exceeded maximum depth of {0}")]
    DepthExceeded(usize),
}
