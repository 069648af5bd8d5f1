// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A [`Node`] owns an ordered list of [`Pin`]s and a boxed
//! [`NodeBehavior`] that declares those pins, reacts to connections and
//! computes outputs. Pins are addressed by position; removing or retyping
//! a pin never reorders the others.

use crate::graph::GraphError;
use crate::logging::{GraphLogger, LogLevel};
use crate::pin::{Pin, PinDirection, PinId};
use crate::pin_type::{PinType, PinTypeRegistry, PinValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Entry points
    Event,
    /// Constant values
    Constant,
    /// Arithmetic
    Math,
    /// Boolean logic and comparison
    Logic,
    /// Type conversion
    Conversion,
    /// Execution flow
    Flow,
    /// Utility nodes
    Utility,
}

/// Pins requested by a behavior while its node initializes
#[derive(Debug, Default)]
pub struct PinDeclarations {
    pins: Vec<(String, PinType, PinDirection)>,
}

impl PinDeclarations {
    /// Declare an input pin
    pub fn add_input(&mut self, name: impl Into<String>, pin_type: PinType) -> &mut Self {
        self.pins.push((name.into(), pin_type, PinDirection::Input));
        self
    }

    /// Declare an output pin
    pub fn add_output(&mut self, name: impl Into<String>, pin_type: PinType) -> &mut Self {
        self.pins.push((name.into(), pin_type, PinDirection::Output));
        self
    }

    /// Declare an incoming execution pin
    pub fn add_execute_in(&mut self) -> &mut Self {
        self.add_input("Exec", PinType::Execute)
    }

    /// Declare an outgoing execution pin
    pub fn add_execute_out(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_output(name, PinType::Execute)
    }
}

/// Delivered to a node when one of its pins gets connected
#[derive(Debug, Clone)]
pub struct PinConnected {
    /// The node's pin
    pub pin: PinId,
    /// Position of that pin in the node's pin list
    pub index: usize,
    /// Direction of the node's pin
    pub direction: PinDirection,
    /// Type of the pin on the other end
    pub other_type: PinType,
}

/// Mutable view of a node's pins handed to [`NodeBehavior::on_pin_connected`]
pub struct PinEditor<'a> {
    pins: &'a mut Vec<Pin>,
    replaced: &'a mut Vec<(PinId, PinId)>,
}

impl<'a> PinEditor<'a> {
    /// All pins in declaration order
    pub fn pins(&self) -> &[Pin] {
        self.pins.as_slice()
    }

    /// Pin at `index`
    pub fn pin(&self, index: usize) -> Option<&Pin> {
        self.pins.get(index)
    }

    /// Replace the pin at `index` with one of type `pin_type`.
    ///
    /// The new pin keeps the index, name and direction. Returns its ID.
    pub fn retype(&mut self, index: usize, pin_type: PinType) -> Result<PinId, GraphError> {
        let old = self.pins.get(index).ok_or(GraphError::PinIndexOutOfRange(index))?;
        if old.pin_type == pin_type {
            return Ok(old.id);
        }
        let new = old.retyped(pin_type);
        let ids = (old.id, new.id);
        self.pins[index] = new;
        self.replaced.push(ids);
        Ok(ids.1)
    }
}

/// What the runner does after a node executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    /// Follow the execute output at this output index
    Continue(usize),
    /// End the run
    Stop,
}

/// Pin access and logging while a node calculates or executes
pub struct NodeContext<'a> {
    name: &'a str,
    pins: &'a mut [Pin],
    inputs: &'a [usize],
    outputs: &'a [usize],
    registry: &'a PinTypeRegistry,
    logger: &'a dyn GraphLogger,
}

static NO_VALUE: PinValue = PinValue::None;

impl<'a> NodeContext<'a> {
    /// Number of input pins
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output pins
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Value of the input at `index`, or `PinValue::None` if absent
    pub fn input(&self, index: usize) -> &PinValue {
        self.inputs
            .get(index)
            .map_or(&NO_VALUE, |&i| self.pins[i].value())
    }

    /// Type of the input at `index`
    pub fn input_type(&self, index: usize) -> Option<PinType> {
        self.inputs.get(index).map(|&i| self.pins[i].pin_type)
    }

    /// Type of the output at `index`
    pub fn output_type(&self, index: usize) -> Option<PinType> {
        self.outputs.get(index).map(|&i| self.pins[i].pin_type)
    }

    /// Write the output at `index`. Returns false if it was rejected.
    pub fn set_output(&mut self, index: usize, value: PinValue) -> bool {
        match self.outputs.get(index) {
            Some(&i) => self.pins[i].set_value(value, self.registry),
            None => false,
        }
    }

    /// Output index of the first execute output, if any
    pub fn first_execute_output(&self) -> Option<usize> {
        self.outputs
            .iter()
            .position(|&i| self.pins[i].pin_type == PinType::Execute)
    }

    /// Log a message tagged with this node's name
    pub fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(level, self.name, message);
    }
}

/// Behavior of a concrete node kind.
///
/// Covers the three capabilities a node can have: declaring its pins,
/// observing connections, and calculating/executing.
pub trait NodeBehavior: fmt::Debug {
    /// Key used by the node factory and in persisted data
    fn class_type(&self) -> &'static str;

    /// Declare pins. Called on every (re)initialization, so specialized
    /// state should reset here.
    fn declare_pins(&mut self, pins: &mut PinDeclarations);

    /// Veto a connection to a pin of type `Any`
    fn accepts_connection(&self, _pin_index: usize, _other_type: PinType) -> bool {
        true
    }

    /// React to a new connection, typically by retyping `Any` pins
    fn on_pin_connected(
        &mut self,
        _event: &PinConnected,
        _pins: &mut PinEditor<'_>,
    ) -> Result<(), GraphError> {
        Ok(())
    }

    /// Read resolved inputs and write outputs
    fn calculate(&mut self, ctx: &mut NodeContext<'_>);

    /// Perform side effects when stepped by the runner and pick the next exit
    fn execute(&mut self, ctx: &mut NodeContext<'_>) -> FlowStep {
        ctx.first_execute_output()
            .map_or(FlowStep::Stop, FlowStep::Continue)
    }

    /// Whether runs start at this node
    fn is_entry_point(&self) -> bool {
        false
    }

    /// Stored constant, for constant nodes
    fn constant(&self) -> Option<&PinValue> {
        None
    }

    /// Replace the stored constant. Returns false if unsupported.
    fn set_constant(&mut self, _value: PinValue) -> bool {
        false
    }
}

/// A node instance in the graph
#[derive(Debug)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Stable key persisted across save/load
    pub key: String,
    /// Display name
    pub name: String,
    /// Position in the graph UI
    pub position: [f32; 2],
    pins: Vec<Pin>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    behavior: Box<dyn NodeBehavior>,
}

impl Node {
    /// Create and initialize a node
    pub(crate) fn new(
        behavior: Box<dyn NodeBehavior>,
        name: impl Into<String>,
        key: Option<String>,
        position: [f32; 2],
    ) -> Self {
        let id = NodeId::new();
        let key = key.unwrap_or_else(|| id.0.to_string());
        let mut node = Self {
            id,
            key: String::new(),
            name: String::new(),
            position,
            pins: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            behavior,
        };
        node.initialize(name, key, position);
        node
    }

    /// Clear all pins and let the behavior declare them again
    pub(crate) fn initialize(&mut self, name: impl Into<String>, key: String, position: [f32; 2]) {
        self.name = name.into();
        self.key = key;
        self.position = position;
        self.pins.clear();

        let mut declarations = PinDeclarations::default();
        self.behavior.declare_pins(&mut declarations);
        for (name, pin_type, direction) in declarations.pins {
            self.pins.push(Pin::new(self.id, name, pin_type, direction));
        }
        self.reindex();
    }

    fn reindex(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
        for (i, pin) in self.pins.iter().enumerate() {
            match pin.direction {
                PinDirection::Input => self.inputs.push(i),
                PinDirection::Output => self.outputs.push(i),
            }
        }
    }

    fn push_pin(&mut self, name: impl Into<String>, pin_type: PinType, direction: PinDirection) -> PinId {
        let pin = Pin::new(self.id, name, pin_type, direction);
        let id = pin.id;
        self.pins.push(pin);
        self.reindex();
        id
    }

    /// Append an input pin
    pub(crate) fn add_input_pin(&mut self, name: impl Into<String>, pin_type: PinType) -> PinId {
        self.push_pin(name, pin_type, PinDirection::Input)
    }

    /// Append an output pin
    pub(crate) fn add_output_pin(&mut self, name: impl Into<String>, pin_type: PinType) -> PinId {
        self.push_pin(name, pin_type, PinDirection::Output)
    }

    /// Append an incoming execution pin
    pub(crate) fn add_execute_in_pin(&mut self) -> PinId {
        self.add_input_pin("Exec", PinType::Execute)
    }

    /// Append an outgoing execution pin
    pub(crate) fn add_execute_out_pin(&mut self) -> PinId {
        self.add_output_pin("Exec", PinType::Execute)
    }

    /// Remove the input at `index`
    pub(crate) fn remove_input_pin(&mut self, index: usize) -> Option<Pin> {
        let at = *self.inputs.get(index)?;
        let pin = self.pins.remove(at);
        self.reindex();
        Some(pin)
    }

    /// Remove the output at `index`
    pub(crate) fn remove_output_pin(&mut self, index: usize) -> Option<Pin> {
        let at = *self.outputs.get(index)?;
        let pin = self.pins.remove(at);
        self.reindex();
        Some(pin)
    }

    /// Replace `pin` in place with a pin of `pin_type`
    pub(crate) fn retype_pin(&mut self, pin: PinId, pin_type: PinType) -> Result<PinId, GraphError> {
        let index = self
            .pin_index(pin)
            .ok_or(GraphError::PinNotOnNode { pin, node: self.id })?;
        let mut replaced = Vec::new();
        let mut editor = PinEditor {
            pins: &mut self.pins,
            replaced: &mut replaced,
        };
        editor.retype(index, pin_type)
    }

    /// Deliver a connect notification to the behavior.
    ///
    /// `(old, new)` ID pairs for every pin it replaced are pushed to
    /// `replaced`, including those replaced before a failure.
    pub(crate) fn notify_connected(
        &mut self,
        event: &PinConnected,
        replaced: &mut Vec<(PinId, PinId)>,
    ) -> Result<(), GraphError> {
        let mut editor = PinEditor {
            pins: &mut self.pins,
            replaced,
        };
        let result = self.behavior.on_pin_connected(event, &mut editor);
        self.reindex();
        result
    }

    /// Replace every pin with a fresh one built from `layout`.
    ///
    /// Only valid while nothing is connected to the node.
    pub(crate) fn restore_pins(&mut self, layout: &[(String, PinType, PinDirection)]) {
        self.pins = layout
            .iter()
            .map(|(name, pin_type, direction)| Pin::new(self.id, name.clone(), *pin_type, *direction))
            .collect();
        self.reindex();
    }

    /// Run the behavior's calculation over the current pin values
    pub(crate) fn calculate(&mut self, registry: &PinTypeRegistry, logger: &dyn GraphLogger) {
        let mut ctx = NodeContext {
            name: &self.name,
            pins: &mut self.pins,
            inputs: &self.inputs,
            outputs: &self.outputs,
            registry,
            logger,
        };
        self.behavior.calculate(&mut ctx);
    }

    /// Run the behavior's side effects
    pub(crate) fn execute(&mut self, registry: &PinTypeRegistry, logger: &dyn GraphLogger) -> FlowStep {
        let mut ctx = NodeContext {
            name: &self.name,
            pins: &mut self.pins,
            inputs: &self.inputs,
            outputs: &self.outputs,
            registry,
            logger,
        };
        self.behavior.execute(&mut ctx)
    }

    pub(crate) fn pin_mut(&mut self, pin: PinId) -> Option<&mut Pin> {
        self.pins.iter_mut().find(|p| p.id == pin)
    }

    pub(crate) fn input_mut(&mut self, index: usize) -> Option<&mut Pin> {
        let at = *self.inputs.get(index)?;
        self.pins.get_mut(at)
    }

    pub(crate) fn behavior_mut(&mut self) -> &mut dyn NodeBehavior {
        self.behavior.as_mut()
    }

    /// The node's behavior
    pub fn behavior(&self) -> &dyn NodeBehavior {
        self.behavior.as_ref()
    }

    /// Factory key of the behavior
    pub fn class_type(&self) -> &'static str {
        self.behavior.class_type()
    }

    /// All pins in declaration order
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Pin at position `index` in the full pin list
    pub fn pin_at(&self, index: usize) -> Option<&Pin> {
        self.pins.get(index)
    }

    /// Get a pin by ID
    pub fn pin(&self, pin: PinId) -> Option<&Pin> {
        self.pins.iter().find(|p| p.id == pin)
    }

    /// Position of a pin in the full pin list
    pub fn pin_index(&self, pin: PinId) -> Option<usize> {
        self.pins.iter().position(|p| p.id == pin)
    }

    /// Get an input pin by input index
    pub fn input(&self, index: usize) -> Option<&Pin> {
        self.inputs.get(index).map(|&i| &self.pins[i])
    }

    /// Get an output pin by output index
    pub fn output(&self, index: usize) -> Option<&Pin> {
        self.outputs.get(index).map(|&i| &self.pins[i])
    }

    /// Input pins in order
    pub fn inputs(&self) -> impl Iterator<Item = &Pin> {
        self.inputs.iter().map(|&i| &self.pins[i])
    }

    /// Output pins in order
    pub fn outputs(&self) -> impl Iterator<Item = &Pin> {
        self.outputs.iter().map(|&i| &self.pins[i])
    }

    /// Number of input pins
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output pins
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Whether this node takes part in execution flow
    pub fn is_flow_node(&self) -> bool {
        self.pins.iter().any(Pin::is_execute)
    }
}

/// Constructor registered for a node class
pub type NodeConstructor = fn() -> Box<dyn NodeBehavior>;

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeType {
    /// Unique class key
    pub class_type: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Builds a fresh behavior
    pub constructor: NodeConstructor,
}

/// Registry of available node types
pub struct NodeRegistry {
    /// Registered node types by class key
    types: IndexMap<String, NodeType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// Registry holding every built-in node
    pub fn builtin() -> Self {
        crate::nodes::builtin_registry()
    }

    /// Register a node type
    pub fn register(&mut self, node_type: NodeType) {
        self.types.insert(node_type.class_type.clone(), node_type);
    }

    /// Get a node type by class key
    pub fn get(&self, class_type: &str) -> Option<&NodeType> {
        self.types.get(class_type)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Build a behavior from a class key
    pub fn create(&self, class_type: &str) -> Option<Box<dyn NodeBehavior>> {
        self.get(class_type).map(|t| (t.constructor)())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
