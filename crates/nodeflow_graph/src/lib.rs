// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dynamically typed node graph with pull evaluation.
//!
//! This crate provides the graph core used for visual scripting:
//! - Typed pins with a runtime type registry
//! - Nodes that specialize their pin types on first connection
//! - Connection validation and cycle rejection
//! - Depth-first pull evaluation of data inputs
//! - Execute-flow runs from an entry node
//!
//! ## Architecture
//!
//! A [`Graph`] owns its nodes and connections and is the only place where
//! either is created or destroyed. Every structural change is reported as
//! a [`GraphEvent`] to subscribers. Node behavior lives behind the
//! [`NodeBehavior`] trait, so new node kinds are added by registering a
//! constructor in a [`NodeRegistry`].
//!
//! Evaluation is split in two. The [`Evaluator`] resolves a node's inputs
//! by recursively calculating their producers, and the [`GraphRunner`]
//! walks execute connections, evaluating and executing one node per step.

pub mod pin_type;
pub mod pin;
pub mod node;
pub mod connection;
pub mod graph;
pub mod data;
pub mod state;
pub mod document;
pub mod evaluation;
pub mod runner;
pub mod logging;
pub mod settings;
pub mod nodes;

pub use connection::{Connection, ConnectionId, PinRef};
pub use data::{GraphData, LoadError};
pub use document::{DocumentError, GraphDocument};
pub use evaluation::{EvalStatus, EvaluationError, Evaluator, ExecutionGroup};
pub use graph::{Graph, GraphError, GraphEvent};
pub use logging::{GraphLogger, LogLevel, NullLogger, TracingLogger};
pub use node::{FlowStep, Node, NodeBehavior, NodeContext, NodeId, NodeRegistry, NodeType};
pub use pin::{Pin, PinDirection, PinId};
pub use pin_type::{PinType, PinTypeRegistry, PinValue, RegistryError};
pub use runner::{GraphRunner, RunError, RunReport};
pub use settings::{CyclePolicy, GraphSettings};
pub use state::{GraphState, GraphStateTracker};
