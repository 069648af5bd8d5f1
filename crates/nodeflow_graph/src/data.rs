// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted graph representation.
//!
//! A graph is stored as plain node, constant and connection lists.
//! Connections address pins by position in each node's full pin list, and
//! nodes by their stable key. Each node also records its current pin
//! layout, so pins added at runtime and types picked up by specialization
//! come back as they were, along with values typed into unconnected inputs. Loading rebuilds a [`Graph`] through the
//! normal mutation API, so every invariant is checked again; any failure
//! aborts the whole load.

use crate::graph::{Graph, GraphError};
use crate::node::{Node, NodeId, NodeRegistry};
use crate::nodes::CONSTANT_CLASS;
use crate::pin::PinDirection;
use crate::pin_type::{PinType, PinTypeRegistry, PinValue};
use crate::settings::GraphSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Type tag of a stored constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstantType {
    /// No value
    None,
    /// Float
    Float,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// String
    String,
}

impl ConstantType {
    /// Tag describing `value`
    pub fn of(value: &PinValue) -> Self {
        match value {
            PinValue::None => Self::None,
            PinValue::Float(_) => Self::Float,
            PinValue::Int(_) => Self::Int,
            PinValue::Bool(_) => Self::Bool,
            PinValue::String(_) => Self::String,
        }
    }

    /// Parse a string-encoded value of this type
    pub fn parse(self, value: &str) -> Option<PinValue> {
        match self {
            Self::None => Some(PinValue::None),
            Self::Float => value.trim().parse().ok().map(PinValue::Float),
            Self::Int => value.trim().parse().ok().map(PinValue::Int),
            Self::Bool => value.trim().parse().ok().map(PinValue::Bool),
            Self::String => Some(PinValue::String(value.to_string())),
        }
    }

    /// Matching pin type
    pub fn pin_type(self) -> PinType {
        match self {
            Self::None => PinType::None,
            Self::Float => PinType::Float,
            Self::Int => PinType::Int,
            Self::Bool => PinType::Bool,
            Self::String => PinType::String,
        }
    }
}

/// A string-encoded value with its type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueData {
    /// Type of `value`
    pub value_type: ConstantType,
    /// String-encoded value
    pub value: String,
}

impl ValueData {
    fn of(value: &PinValue) -> Self {
        Self {
            value_type: ConstantType::of(value),
            value: value.to_string(),
        }
    }
}

/// A stored pin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinData {
    /// Display name
    pub name: String,
    /// Input or output
    pub direction: PinDirection,
    /// Current type, after any specialization
    pub pin_type: PinType,
    /// Inline value of an unconnected input
    #[serde(default)]
    pub value: Option<ValueData>,
}

/// A stored node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Factory key of the node's behavior
    pub class_type: String,
    /// Display name
    pub name: String,
    /// Stable key
    pub id: String,
    /// Layout position
    pub position: [f32; 2],
    /// Full pin list in order. Empty means the class defaults.
    #[serde(default)]
    pub pins: Vec<PinData>,
}

impl NodeData {
    fn from_node(graph: &Graph, node: &Node) -> Self {
        let pins = node
            .pins()
            .iter()
            .map(|pin| {
                let inline = pin.is_input()
                    && !pin.is_execute()
                    && *pin.value() != PinValue::None
                    && graph.connection_to(pin.id).is_none();
                PinData {
                    name: pin.name.clone(),
                    direction: pin.direction,
                    pin_type: pin.pin_type,
                    value: inline.then(|| ValueData::of(pin.value())),
                }
            })
            .collect();
        Self {
            class_type: node.class_type().to_string(),
            name: node.name.clone(),
            id: node.key.clone(),
            position: node.position,
            pins,
        }
    }
}

/// A stored constant node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConstantData {
    /// Node fields
    pub node: NodeData,
    /// Type of `value`
    pub constant_type: ConstantType,
    /// String-encoded value
    pub value: String,
}

/// A stored connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    /// Key of the producing node
    pub source_node_id: String,
    /// Position of the producing pin
    pub source_pin_index: usize,
    /// Key of the consuming node
    pub target_node_id: String,
    /// Position of the consuming pin
    pub target_pin_index: usize,
}

/// A stored graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphData {
    /// Graph ID
    pub id: String,
    /// Non-constant nodes
    pub nodes: Vec<NodeData>,
    /// Constant nodes
    pub constants: Vec<NodeConstantData>,
    /// Connections
    pub connections: Vec<ConnectionData>,
}

impl GraphData {
    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> Result<(), LoadError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_ron(&contents)?)
    }
}

impl Graph {
    /// Capture the graph as plain data.
    ///
    /// Fails if a connection points at a node or pin that no longer exists.
    pub fn to_data(&self) -> Result<GraphData, GraphError> {
        let mut data = GraphData {
            id: self.id.clone(),
            ..GraphData::default()
        };
        for node in self.nodes() {
            let stored = NodeData::from_node(self, node);
            match node.behavior().constant() {
                Some(value) => data.constants.push(NodeConstantData {
                    node: stored,
                    constant_type: ConstantType::of(value),
                    value: value.to_string(),
                }),
                None => data.nodes.push(stored),
            }
        }
        for connection in self.connections() {
            let (producer, consumer) = (connection.producer, connection.consumer);
            let source = self.node(producer.node).ok_or(GraphError::NodeNotFound(producer.node))?;
            let target = self.node(consumer.node).ok_or(GraphError::NodeNotFound(consumer.node))?;
            data.connections.push(ConnectionData {
                source_node_id: source.key.clone(),
                source_pin_index: source.pin_index(producer.pin).ok_or(GraphError::PinNotFound(producer.pin))?,
                target_node_id: target.key.clone(),
                target_pin_index: target.pin_index(consumer.pin).ok_or(GraphError::PinNotFound(consumer.pin))?,
            });
        }
        Ok(data)
    }

    /// Build a graph from stored data.
    ///
    /// Unknown classes, dangling keys and rejected connections fail the
    /// load instead of producing a partial graph.
    pub fn from_data(
        data: &GraphData,
        nodes: &NodeRegistry,
        registry: Arc<PinTypeRegistry>,
        settings: &GraphSettings,
    ) -> Result<Graph, LoadError> {
        let mut graph = Graph::new(data.id.clone(), registry).with_cycle_policy(settings.cycle_policy);
        let mut keys = HashMap::new();

        for node in &data.nodes {
            let behavior = nodes
                .create(&node.class_type)
                .ok_or_else(|| LoadError::UnknownClass(node.class_type.clone()))?;
            let id = graph.add_node_with_key(behavior, node.name.clone(), node.id.clone(), node.position)?;
            graph.restore_pins(id, node)?;
            keys.insert(node.id.as_str(), id);
        }

        for constant in &data.constants {
            let node = &constant.node;
            let class_type = if node.class_type.is_empty() {
                CONSTANT_CLASS
            } else {
                node.class_type.as_str()
            };
            let behavior = nodes
                .create(class_type)
                .ok_or_else(|| LoadError::UnknownClass(class_type.to_string()))?;
            let value = constant
                .constant_type
                .parse(&constant.value)
                .ok_or_else(|| LoadError::BadConstant {
                    node: node.id.clone(),
                    value: constant.value.clone(),
                })?;
            let id = graph.add_node_with_key(behavior, node.name.clone(), node.id.clone(), node.position)?;
            graph.restore_pins(id, node)?;
            graph.set_constant(id, value)?;
            keys.insert(node.id.as_str(), id);
        }

        for connection in &data.connections {
            let source = *keys
                .get(connection.source_node_id.as_str())
                .ok_or_else(|| LoadError::UnknownNode(connection.source_node_id.clone()))?;
            let target = *keys
                .get(connection.target_node_id.as_str())
                .ok_or_else(|| LoadError::UnknownNode(connection.target_node_id.clone()))?;
            graph.connect_indices(
                source,
                connection.source_pin_index,
                target,
                connection.target_pin_index,
            )?;
        }

        tracing::debug!(
            graph = %graph.id,
            nodes = graph.node_count(),
            connections = graph.connection_count(),
            "Loaded graph"
        );
        Ok(graph)
    }

    /// Put back a stored pin layout and its inline input values
    fn restore_pins(&mut self, id: NodeId, data: &NodeData) -> Result<(), LoadError> {
        if data.pins.is_empty() {
            return Ok(());
        }
        let layout: Vec<_> = data
            .pins
            .iter()
            .map(|pin| (pin.name.clone(), pin.pin_type, pin.direction))
            .collect();
        let registry = Arc::clone(self.registry());
        let node = self.node_mut(id).ok_or(GraphError::NodeNotFound(id))?;
        node.restore_pins(&layout);

        let inputs = data.pins.iter().filter(|p| p.direction == PinDirection::Input);
        for (index, pin) in inputs.enumerate() {
            let Some(stored) = &pin.value else {
                continue;
            };
            let bad_value = || LoadError::BadConstant {
                node: data.id.clone(),
                value: stored.value.clone(),
            };
            let value = stored.value_type.parse(&stored.value).ok_or_else(bad_value)?;
            let input = node.input_mut(index).ok_or(GraphError::PinIndexOutOfRange(index))?;
            if !input.set_value(value, &registry) {
                return Err(bad_value());
            }
        }
        Ok(())
    }
}

/// Error loading or saving a graph
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No factory entry for this class
    #[error("Unknown node class: {0}")]
    UnknownClass(String),

    /// Connection names a node that is not in the data
    #[error("Unknown node id: {0}")]
    UnknownNode(String),

    /// Constant value does not parse as its declared type
    #[error("Invalid constant value {value:?} on node {node}")]
    BadConstant {
        /// Node key
        node: String,
        /// Offending value
        value: String,
    },

    /// Stored data violates a graph invariant
    #[error("Invalid graph data: {0}")]
    Invariant(#[from] GraphError),

    /// RON syntax error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// RON serialization error
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// Snapshot encoding error
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    /// File access error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
