// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and connections.
//!
//! All structural edits go through [`Graph`] so each one can be validated
//! and announced exactly once. Listeners obtained from
//! [`Graph::subscribe`] receive [`GraphEvent`]s after the state they
//! describe is already in place.

use crate::connection::{Connection, ConnectionId, PinRef};
use crate::logging::GraphLogger;
use crate::node::{FlowStep, Node, NodeBehavior, NodeId, PinConnected};
use crate::pin::{Pin, PinId};
use crate::pin_type::{PinType, PinTypeRegistry, PinValue};
use crate::settings::CyclePolicy;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::{mpsc, Arc};

/// Notification raised after a graph change
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A node was added
    NodeAdded(NodeId),
    /// A node was removed
    NodeRemoved(NodeId),
    /// Selection changed
    NodeSelected(Option<NodeId>),
    /// A pin was appended to a node
    PinAdded {
        /// Owning node
        node: NodeId,
        /// New pin
        pin: PinId,
    },
    /// A pin was removed from a node
    PinRemoved {
        /// Owning node
        node: NodeId,
        /// Removed pin
        pin: PinId,
    },
    /// A pin was replaced by one of another type
    PinRetyped {
        /// Owning node
        node: NodeId,
        /// Replaced pin
        old: PinId,
        /// Replacement
        new: PinId,
    },
    /// A connection was made
    PinConnected(ConnectionId),
    /// A connection was removed
    PinDisconnected(ConnectionId),
    /// Structure or constant values changed
    Edited,
    /// The graph was saved
    Saved,
    /// The graph was loaded
    Loaded,
    /// The graph is being unloaded
    Unloaded,
}

/// A node graph
#[derive(Debug)]
pub struct Graph {
    /// Graph ID
    pub id: String,
    registry: Arc<PinTypeRegistry>,
    cycle_policy: CyclePolicy,
    nodes: IndexMap<NodeId, Node>,
    connections: IndexMap<ConnectionId, Connection>,
    selected: Option<NodeId>,
    listeners: Vec<mpsc::Sender<GraphEvent>>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, registry: Arc<PinTypeRegistry>) -> Self {
        Self {
            id: id.into(),
            registry,
            cycle_policy: CyclePolicy::default(),
            nodes: IndexMap::new(),
            connections: IndexMap::new(),
            selected: None,
            listeners: Vec::new(),
        }
    }

    /// Set the cycle policy
    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Current cycle policy
    pub fn cycle_policy(&self) -> CyclePolicy {
        self.cycle_policy
    }

    /// Change the cycle policy. Existing connections are kept.
    pub fn set_cycle_policy(&mut self, policy: CyclePolicy) {
        self.cycle_policy = policy;
    }

    /// Pin type registry this graph validates against
    pub fn registry(&self) -> &Arc<PinTypeRegistry> {
        &self.registry
    }

    /// Receive every future [`GraphEvent`]
    pub fn subscribe(&mut self) -> mpsc::Receiver<GraphEvent> {
        let (sender, receiver) = mpsc::channel();
        self.listeners.push(sender);
        receiver
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node with a generated key
    pub fn add_node(
        &mut self,
        behavior: Box<dyn NodeBehavior>,
        name: impl Into<String>,
        position: [f32; 2],
    ) -> NodeId {
        let node = Node::new(behavior, name, None, position);
        self.insert_node(node)
    }

    /// Add a node with a caller-chosen stable key
    pub fn add_node_with_key(
        &mut self,
        behavior: Box<dyn NodeBehavior>,
        name: impl Into<String>,
        key: impl Into<String>,
        position: [f32; 2],
    ) -> Result<NodeId, GraphError> {
        let key = key.into();
        if self.node_by_key(&key).is_some() {
            return Err(GraphError::DuplicateKey(key));
        }
        let node = Node::new(behavior, name, Some(key), position);
        Ok(self.insert_node(node))
    }

    fn insert_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        tracing::debug!(node = %node.name, class = node.class_type(), "Added node");
        self.nodes.insert(id, node);
        self.emit(GraphEvent::NodeAdded(id));
        self.emit(GraphEvent::Edited);
        id
    }

    /// Remove a node and every connection touching it
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        if !self.nodes.contains_key(&node_id) {
            return None;
        }
        let touching: Vec<ConnectionId> = self
            .connections_for_node(node_id)
            .map(|c| c.id)
            .collect();
        for connection in touching {
            self.disconnect_inner(connection);
        }
        let node = self.nodes.shift_remove(&node_id)?;
        if self.selected == Some(node_id) {
            self.selected = None;
        }
        tracing::debug!(node = %node.name, "Removed node");
        self.emit(GraphEvent::NodeRemoved(node_id));
        self.emit(GraphEvent::Edited);
        Some(node)
    }

    /// Mark a node as selected
    pub fn select_node(&mut self, node_id: Option<NodeId>) {
        self.selected = node_id.filter(|id| self.nodes.contains_key(id));
        self.emit(GraphEvent::NodeSelected(self.selected));
    }

    /// Currently selected node
    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub(crate) fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get a node by its persisted key
    pub fn node_by_key(&self, key: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.key == key)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes that runs may start from
    pub fn entry_points(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.behavior().is_entry_point())
            .map(|n| n.id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Pins
    // ------------------------------------------------------------------

    /// Resolve a pin reference
    pub fn pin(&self, pin: PinRef) -> Result<&Pin, GraphError> {
        self.nodes
            .get(&pin.node)
            .ok_or(GraphError::NodeNotFound(pin.node))?
            .pin(pin.pin)
            .ok_or(GraphError::PinNotOnNode { pin: pin.pin, node: pin.node })
    }

    /// Reference to the pin at `index` in a node's full pin list
    pub fn pin_ref(&self, node_id: NodeId, index: usize) -> Option<PinRef> {
        let pin = self.nodes.get(&node_id)?.pin_at(index)?;
        Some(PinRef::new(node_id, pin.id))
    }

    /// Reference to a node's input at `index`
    pub fn input_ref(&self, node_id: NodeId, index: usize) -> Option<PinRef> {
        let pin = self.nodes.get(&node_id)?.input(index)?;
        Some(PinRef::new(node_id, pin.id))
    }

    /// Reference to a node's output at `index`
    pub fn output_ref(&self, node_id: NodeId, index: usize) -> Option<PinRef> {
        let pin = self.nodes.get(&node_id)?.output(index)?;
        Some(PinRef::new(node_id, pin.id))
    }

    /// Cached value of a node's input
    pub fn input_value(&self, node_id: NodeId, index: usize) -> Option<&PinValue> {
        Some(self.nodes.get(&node_id)?.input(index)?.value())
    }

    /// Cached value of a node's output
    pub fn output_value(&self, node_id: NodeId, index: usize) -> Option<&PinValue> {
        Some(self.nodes.get(&node_id)?.output(index)?.value())
    }

    /// Append an input pin to a node
    pub fn add_input_pin(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        pin_type: PinType,
    ) -> Result<PinId, GraphError> {
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let pin = node.add_input_pin(name, pin_type);
        self.pin_added(node_id, pin);
        Ok(pin)
    }

    /// Append an output pin to a node
    pub fn add_output_pin(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        pin_type: PinType,
    ) -> Result<PinId, GraphError> {
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let pin = node.add_output_pin(name, pin_type);
        self.pin_added(node_id, pin);
        Ok(pin)
    }

    /// Append an incoming execution pin to a node
    pub fn add_execute_in_pin(&mut self, node_id: NodeId) -> Result<PinId, GraphError> {
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let pin = node.add_execute_in_pin();
        self.pin_added(node_id, pin);
        Ok(pin)
    }

    /// Append an outgoing execution pin to a node
    pub fn add_execute_out_pin(&mut self, node_id: NodeId) -> Result<PinId, GraphError> {
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let pin = node.add_execute_out_pin();
        self.pin_added(node_id, pin);
        Ok(pin)
    }

    fn pin_added(&mut self, node: NodeId, pin: PinId) {
        self.emit(GraphEvent::PinAdded { node, pin });
        self.emit(GraphEvent::Edited);
    }

    /// Remove a node's input at `index`, dropping its connection
    pub fn remove_input_pin(&mut self, node_id: NodeId, index: usize) -> Result<PinId, GraphError> {
        let pin = self
            .input_ref(node_id, index)
            .ok_or(GraphError::PinIndexOutOfRange(index))?;
        self.disconnect_pin(pin.pin);
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        node.remove_input_pin(index);
        self.pin_removed(node_id, pin.pin);
        Ok(pin.pin)
    }

    /// Remove a node's output at `index`, dropping its connections
    pub fn remove_output_pin(&mut self, node_id: NodeId, index: usize) -> Result<PinId, GraphError> {
        let pin = self
            .output_ref(node_id, index)
            .ok_or(GraphError::PinIndexOutOfRange(index))?;
        self.disconnect_pin(pin.pin);
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        node.remove_output_pin(index);
        self.pin_removed(node_id, pin.pin);
        Ok(pin.pin)
    }

    fn pin_removed(&mut self, node: NodeId, pin: PinId) {
        self.emit(GraphEvent::PinRemoved { node, pin });
        self.emit(GraphEvent::Edited);
    }

    fn disconnect_pin(&mut self, pin: PinId) {
        let touching: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.involves_pin(pin))
            .map(|c| c.id)
            .collect();
        for connection in touching {
            self.disconnect_inner(connection);
        }
    }

    /// Replace a pin with one of another type at the same index.
    ///
    /// Connections follow the new pin; those that no longer type-check
    /// are dropped.
    pub fn retype_pin(&mut self, pin: PinRef, pin_type: PinType) -> Result<PinId, GraphError> {
        let node = self.node_mut(pin.node).ok_or(GraphError::NodeNotFound(pin.node))?;
        let new = node.retype_pin(pin.pin, pin_type)?;
        if new != pin.pin {
            self.apply_retypes(pin.node, &[(pin.pin, new)], None);
            self.emit(GraphEvent::Edited);
        }
        Ok(new)
    }

    /// Point connections at replaced pins and re-validate them.
    ///
    /// A generic pin on the far side of a surviving connection is offered
    /// the new concrete type, so specialization flows along chains of
    /// `Any` pins. `skip` is left out of that propagation.
    fn apply_retypes(&mut self, node: NodeId, replaced: &[(PinId, PinId)], skip: Option<ConnectionId>) {
        let mut propagate = Vec::new();
        for &(old, new) in replaced {
            let mut affected = Vec::new();
            for connection in self.connections.values_mut() {
                if connection.involves_pin(old) {
                    connection.remap_pin(old, new);
                    affected.push(connection.id);
                }
            }
            tracing::debug!(?old, ?new, "Retyped pin");
            self.emit(GraphEvent::PinRetyped { node, old, new });

            for id in affected {
                let Some(connection) = self.connections.get(&id) else {
                    continue;
                };
                let (here, there) = if connection.producer.pin == new {
                    (connection.producer, connection.consumer)
                } else {
                    (connection.consumer, connection.producer)
                };
                let checked = match (self.pin(here), self.pin(there)) {
                    (Ok(here_pin), Ok(there_pin)) => Some((
                        here_pin.is_compatible_with(there_pin, &self.registry),
                        here_pin.pin_type,
                        there_pin.pin_type,
                    )),
                    _ => None,
                };
                match checked {
                    Some((true, here_type, PinType::Any)) if Some(id) != skip && here_type.is_value() => {
                        propagate.push((id, there, here_type));
                    }
                    Some((true, ..)) => {}
                    _ => {
                        tracing::warn!(connection = ?id, "Dropping connection invalidated by pin type change");
                        self.disconnect_inner(id);
                    }
                }
            }
        }

        for (id, target, pin_type) in propagate {
            let Some(target_node) = self.node(target.node) else {
                continue;
            };
            // Already replaced by an earlier step
            let Some(index) = target_node.pin_index(target.pin) else {
                continue;
            };
            if !target_node.behavior().accepts_connection(index, pin_type) {
                tracing::warn!(connection = ?id, %pin_type, "Dropping connection the far node cannot specialize for");
                self.disconnect_inner(id);
                continue;
            }
            if let Err(err) = self.notify_connected(target.node, index, pin_type, None) {
                tracing::warn!("Failed to propagate pin type: {err}");
            }
        }
    }

    /// Assign a value to an input pin, typically an unconnected one
    pub fn set_input_value(
        &mut self,
        node_id: NodeId,
        index: usize,
        value: PinValue,
    ) -> Result<(), GraphError> {
        let registry = Arc::clone(&self.registry);
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let pin = node.input_mut(index).ok_or(GraphError::PinIndexOutOfRange(index))?;
        let consumer = pin.pin_type;
        if !pin.set_value(value.clone(), &registry) {
            return Err(GraphError::IncompatibleTypes {
                producer: value.pin_type(),
                consumer,
            });
        }
        self.emit(GraphEvent::Edited);
        Ok(())
    }

    /// Replace the value stored in a constant node.
    ///
    /// If the value's type differs, the node's output pin is retyped.
    pub fn set_constant(&mut self, node_id: NodeId, value: PinValue) -> Result<(), GraphError> {
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        if !node.behavior_mut().set_constant(value.clone()) {
            return Err(GraphError::NotAConstant(node_id));
        }
        let output = node
            .output(0)
            .map(|p| (p.id, p.pin_type))
            .ok_or(GraphError::PinIndexOutOfRange(0))?;
        let new_type = value.pin_type();
        let pin = if output.1 == new_type {
            output.0
        } else {
            let new = node.retype_pin(output.0, new_type)?;
            self.apply_retypes(node_id, &[(output.0, new)], None);
            new
        };
        let registry = Arc::clone(&self.registry);
        if let Some(pin) = self.node_mut(node_id).and_then(|n| n.pin_mut(pin)) {
            pin.set_value(value, &registry);
        }
        self.emit(GraphEvent::Edited);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Connect two pins.
    ///
    /// The pins may be given in either order. An existing connection on
    /// the input side is replaced. Rejections are logged and returned.
    pub fn connect(&mut self, start: PinRef, end: PinRef) -> Result<ConnectionId, GraphError> {
        let result = self.try_connect(start, end);
        if let Err(err) = &result {
            tracing::warn!("Rejected connection: {err}");
        }
        result
    }

    /// Connect by positions in each node's full pin list
    pub fn connect_indices(
        &mut self,
        start_node: NodeId,
        start_index: usize,
        end_node: NodeId,
        end_index: usize,
    ) -> Result<ConnectionId, GraphError> {
        let start = self
            .pin_ref(start_node, start_index)
            .ok_or(GraphError::PinIndexOutOfRange(start_index))?;
        let end = self
            .pin_ref(end_node, end_index)
            .ok_or(GraphError::PinIndexOutOfRange(end_index))?;
        self.connect(start, end)
    }

    fn try_connect(&mut self, start: PinRef, end: PinRef) -> Result<ConnectionId, GraphError> {
        if start.pin == end.pin {
            return Err(GraphError::SelfConnection);
        }
        let start_pin = self.pin(start)?.clone();
        let end_pin = self.pin(end)?.clone();

        if let Some(existing) = self.connections.values().find(|c| c.links(start.pin, end.pin)) {
            return Ok(existing.id);
        }
        if start_pin.direction == end_pin.direction {
            return Err(GraphError::SameDirection);
        }
        let (producer, consumer) = if start_pin.is_output() {
            (&start_pin, &end_pin)
        } else {
            (&end_pin, &start_pin)
        };
        if !producer.is_compatible_with(consumer, &self.registry) {
            return Err(GraphError::IncompatibleTypes {
                producer: producer.pin_type,
                consumer: consumer.pin_type,
            });
        }
        for (pin, other) in [(&start_pin, &end_pin), (&end_pin, &start_pin)] {
            if pin.pin_type != PinType::Any {
                continue;
            }
            let node = self.node(pin.node).ok_or(GraphError::NodeNotFound(pin.node))?;
            let index = node.pin_index(pin.id).ok_or(GraphError::PinNotFound(pin.id))?;
            if !node.behavior().accepts_connection(index, other.pin_type) {
                return Err(GraphError::UnsupportedSpecialization {
                    node: pin.node,
                    pin_type: other.pin_type,
                });
            }
        }

        let execute = start_pin.is_execute();
        if !execute
            && self.cycle_policy == CyclePolicy::RejectDataCycles
            && self.depends_on(producer.node, consumer.node)
        {
            return Err(GraphError::WouldCreateCycle);
        }

        let stale = self.connection_to(consumer.id).map(|c| c.id);
        let start_is_output = start_pin.is_output();

        let start_index = self.index_of(start)?;
        let end_index = self.index_of(end)?;

        self.notify_connected(start.node, start_index, end_pin.pin_type, stale)?;
        let start_type = self.pin_at(start.node, start_index)?.pin_type;
        self.notify_connected(end.node, end_index, start_type, stale)?;

        // Either notification may have swapped the pins we were given.
        let start = PinRef::new(start.node, self.pin_at(start.node, start_index)?.id);
        let end = PinRef::new(end.node, self.pin_at(end.node, end_index)?.id);

        if let Some(stale) = stale {
            self.disconnect_inner(stale);
        }

        let connection = Connection::new(start, end, start_is_output, execute);
        let id = connection.id;
        self.connections.insert(id, connection);
        tracing::debug!(connection = ?id, "Connected pins");
        self.emit(GraphEvent::PinConnected(id));
        self.emit(GraphEvent::Edited);
        Ok(id)
    }

    fn index_of(&self, pin: PinRef) -> Result<usize, GraphError> {
        self.node(pin.node)
            .ok_or(GraphError::NodeNotFound(pin.node))?
            .pin_index(pin.pin)
            .ok_or(GraphError::PinNotOnNode { pin: pin.pin, node: pin.node })
    }

    fn pin_at(&self, node_id: NodeId, index: usize) -> Result<&Pin, GraphError> {
        self.node(node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?
            .pin_at(index)
            .ok_or(GraphError::PinIndexOutOfRange(index))
    }

    /// Tell a node one of its pins was connected, then follow up on any
    /// pins it replaced, even if it reported an error part way through.
    fn notify_connected(
        &mut self,
        node_id: NodeId,
        index: usize,
        other_type: PinType,
        skip: Option<ConnectionId>,
    ) -> Result<(), GraphError> {
        let node = self.node_mut(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let pin = node.pin_at(index).ok_or(GraphError::PinIndexOutOfRange(index))?;
        let event = PinConnected {
            pin: pin.id,
            index,
            direction: pin.direction,
            other_type,
        };
        let mut replaced = Vec::new();
        let result = node.notify_connected(&event, &mut replaced);
        if !replaced.is_empty() {
            self.apply_retypes(node_id, &replaced, skip);
            if result.is_err() {
                self.emit(GraphEvent::Edited);
            }
        }
        result
    }

    /// True if `node` already depends on `target` through value connections
    fn depends_on(&self, node: NodeId, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            pending.extend(
                self.connections
                    .values()
                    .filter(|c| !c.execute && c.consumer.node == current)
                    .map(|c| c.producer.node),
            );
        }
        false
    }

    /// Remove a connection. Removing an absent connection does nothing.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<Connection> {
        let connection = self.disconnect_inner(connection_id)?;
        self.emit(GraphEvent::Edited);
        Some(connection)
    }

    fn disconnect_inner(&mut self, connection_id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.shift_remove(&connection_id)?;
        let consumer = connection.consumer;
        if let Some(pin) = self.node_mut(consumer.node).and_then(|n| n.pin_mut(consumer.pin)) {
            pin.disconnect();
        }
        tracing::debug!(connection = ?connection_id, "Disconnected pins");
        self.emit(GraphEvent::PinDisconnected(connection_id));
        Some(connection)
    }

    /// Show or hide a connection. Hidden connections stay active.
    pub fn set_connection_hidden(&mut self, connection_id: ConnectionId, hidden: bool) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(connection) => {
                connection.hidden = hidden;
                true
            }
            None => false,
        }
    }

    /// Get a connection by ID
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    /// Get all connections
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// The connection feeding an input pin
    pub fn connection_to(&self, pin_id: PinId) -> Option<&Connection> {
        self.connections.values().find(|c| c.consumer.pin == pin_id)
    }

    /// Connections leaving an output pin
    pub fn connections_from(&self, pin_id: PinId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.producer.pin == pin_id)
    }

    /// Get connections involving a node
    pub fn connections_for_node(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.involves_node(node_id))
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ------------------------------------------------------------------
    // Evaluation support
    // ------------------------------------------------------------------

    /// Copy the producer's value into the consumer across a connection
    pub(crate) fn pull(&mut self, connection_id: ConnectionId) -> bool {
        let Some(connection) = self.connections.get(&connection_id) else {
            return false;
        };
        let (producer, consumer) = (connection.producer, connection.consumer);
        let Ok(source) = self.pin(producer).cloned() else {
            return false;
        };
        let registry = Arc::clone(&self.registry);
        match self.node_mut(consumer.node).and_then(|n| n.pin_mut(consumer.pin)) {
            Some(dest) => dest.set_value_from_pin(&source, &registry),
            None => false,
        }
    }

    pub(crate) fn calculate_node(&mut self, node_id: NodeId, logger: &dyn GraphLogger) -> bool {
        let registry = Arc::clone(&self.registry);
        match self.node_mut(node_id) {
            Some(node) => {
                node.calculate(&registry, logger);
                true
            }
            None => false,
        }
    }

    pub(crate) fn execute_node(&mut self, node_id: NodeId, logger: &dyn GraphLogger) -> Option<FlowStep> {
        let registry = Arc::clone(&self.registry);
        let node = self.node_mut(node_id)?;
        Some(node.execute(&registry, logger))
    }
}

/// Structural violation reported by graph edits.
///
/// Interactive callers show these and carry on; loaders abort on them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Pin not found
    #[error("Pin not found: {0:?}")]
    PinNotFound(PinId),

    /// Pin exists but on another node
    #[error("Pin {pin:?} does not belong to node {node:?}")]
    PinNotOnNode {
        /// The pin
        pin: PinId,
        /// The node it was looked up on
        node: NodeId,
    },

    /// No pin at this position
    #[error("No pin at index {0}")]
    PinIndexOutOfRange(usize),

    /// Pin connected to itself
    #[error("Cannot connect a pin to itself")]
    SelfConnection,

    /// Two inputs or two outputs
    #[error("Cannot connect two pins of the same direction")]
    SameDirection,

    /// Incompatible pin types
    #[error("Incompatible pin types: {producer} into {consumer}")]
    IncompatibleTypes {
        /// Type offered
        producer: PinType,
        /// Type expected
        consumer: PinType,
    },

    /// A dynamic node cannot take this type
    #[error("Node {node:?} cannot specialize to {pin_type}")]
    UnsupportedSpecialization {
        /// The node
        node: NodeId,
        /// Type offered
        pin_type: PinType,
    },

    /// Connection would make a node depend on its own output
    #[error("Connection would create a cycle")]
    WouldCreateCycle,

    /// A node with this key already exists
    #[error("Duplicate node key: {0}")]
    DuplicateKey(String),

    /// Node does not store a constant
    #[error("Node is not a constant: {0:?}")]
    NotAConstant(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeContext, PinDeclarations, PinEditor};
    use crate::nodes::{Constant, Math, MathOp, ToText};

    fn graph() -> Graph {
        Graph::new("test", Arc::new(PinTypeRegistry::builtin()))
    }

    fn constant(graph: &mut Graph, value: PinValue) -> NodeId {
        graph.add_node(Box::new(Constant::new(value)), "Constant", [0.0, 0.0])
    }

    fn add(graph: &mut Graph) -> NodeId {
        graph.add_node(Box::new(Math::new(MathOp::Add)), "Add", [0.0, 0.0])
    }

    fn drain(rx: &mpsc::Receiver<GraphEvent>) -> Vec<GraphEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_connect_either_order() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        let out = g.output_ref(a, 0).unwrap();
        let inp = g.input_ref(m, 0).unwrap();

        let id = g.connect(inp, out).unwrap();
        let c = g.connection(id).unwrap();
        assert_eq!(c.producer.node, a);
        assert_eq!(c.consumer.node, m);
    }

    #[test]
    fn test_rejects_invalid_connections() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let b = constant(&mut g, PinValue::Float(2.0));
        let out_a = g.output_ref(a, 0).unwrap();
        let out_b = g.output_ref(b, 0).unwrap();

        assert_eq!(g.connect(out_a, out_a), Err(GraphError::SelfConnection));
        assert_eq!(g.connect(out_a, out_b), Err(GraphError::SameDirection));
        assert_eq!(g.connection_count(), 0);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        let out = g.output_ref(a, 0).unwrap();
        let first = g.connect(out, g.input_ref(m, 0).unwrap()).unwrap();
        let inp = g.input_ref(m, 0).unwrap();
        let second = g.connect(out, inp).unwrap();
        assert_eq!(first, second);
        assert_eq!(g.connection_count(), 1);
    }

    #[test]
    fn test_input_accepts_single_connection() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let b = constant(&mut g, PinValue::Float(2.0));
        let m = add(&mut g);

        let first = g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        let second = g.connect(g.output_ref(b, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();

        assert_eq!(g.connection_count(), 1);
        assert!(g.connection(first).is_none());
        assert_eq!(g.connection(second).unwrap().producer.node, b);
    }

    #[test]
    fn test_output_fans_out() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Int(1));
        let m1 = add(&mut g);
        let m2 = add(&mut g);
        let out = g.output_ref(a, 0).unwrap();
        g.connect(out, g.input_ref(m1, 0).unwrap()).unwrap();
        g.connect(out, g.input_ref(m2, 1).unwrap()).unwrap();
        assert_eq!(g.connections_from(out.pin).count(), 2);
    }

    #[test]
    fn test_connection_endpoints_follow_retype() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        let before = g.input_ref(m, 0).unwrap();

        let id = g.connect(g.output_ref(a, 0).unwrap(), before).unwrap();
        let after = g.input_ref(m, 0).unwrap();

        assert_ne!(before.pin, after.pin);
        assert_eq!(g.connection(id).unwrap().consumer, after);
        assert!(g.pin(before).is_err());
    }

    #[test]
    fn test_rejects_data_cycle() {
        let mut g = graph();
        let m1 = add(&mut g);
        let m2 = add(&mut g);
        g.connect(g.output_ref(m1, 0).unwrap(), g.input_ref(m2, 0).unwrap()).unwrap();
        let back = g.connect(g.output_ref(m2, 0).unwrap(), g.input_ref(m1, 0).unwrap());
        assert_eq!(back, Err(GraphError::WouldCreateCycle));

        let own = g.connect(g.output_ref(m1, 0).unwrap(), g.input_ref(m1, 1).unwrap());
        assert_eq!(own, Err(GraphError::WouldCreateCycle));
    }

    #[test]
    fn test_cycle_policy_allow() {
        let mut g = graph().with_cycle_policy(CyclePolicy::Allow);
        let m1 = add(&mut g);
        let m2 = add(&mut g);
        g.connect(g.output_ref(m1, 0).unwrap(), g.input_ref(m2, 0).unwrap()).unwrap();
        assert!(g.connect(g.output_ref(m2, 0).unwrap(), g.input_ref(m1, 0).unwrap()).is_ok());
        assert_eq!(g.connection_count(), 2);
    }

    #[test]
    fn test_disconnect_twice_is_noop() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        let id = g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        let rx = g.subscribe();

        assert!(g.disconnect(id).is_some());
        assert_eq!(
            drain(&rx),
            vec![GraphEvent::PinDisconnected(id), GraphEvent::Edited]
        );
        assert!(g.disconnect(id).is_none());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_disconnect_resets_input() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        let id = g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        g.set_input_value(m, 0, PinValue::Float(9.0)).unwrap();
        g.disconnect(id);
        assert_eq!(g.input_value(m, 0), Some(&PinValue::Float(0.0)));
    }

    #[test]
    fn test_remove_node_cascades() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let b = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        g.connect(g.output_ref(b, 0).unwrap(), g.input_ref(m, 1).unwrap()).unwrap();
        let rx = g.subscribe();

        assert!(g.remove_node(m).is_some());
        assert_eq!(g.connection_count(), 0);
        assert_eq!(g.node_count(), 2);
        let edited = drain(&rx).into_iter().filter(|e| *e == GraphEvent::Edited).count();
        assert_eq!(edited, 1);
        assert!(g.remove_node(m).is_none());
    }

    #[test]
    fn test_remove_input_pin_disconnects() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(m, 1).unwrap()).unwrap();

        g.remove_input_pin(m, 1).unwrap();
        assert_eq!(g.connection_count(), 0);
        assert_eq!(g.node(m).unwrap().input_count(), 1);
    }

    #[test]
    fn test_foreign_pin_is_rejected() {
        let mut g = graph();
        let mut other = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let x = add(&mut other);
        let foreign = other.input_ref(x, 0).unwrap();
        let result = g.connect(g.output_ref(a, 0).unwrap(), foreign);
        assert_eq!(result, Err(GraphError::NodeNotFound(x)));
    }

    #[test]
    fn test_set_constant_retypes_output() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        g.set_constant(a, PinValue::String("hi".into())).unwrap();
        let out = g.node(a).unwrap().output(0).unwrap();
        assert_eq!(out.pin_type, PinType::String);
        assert_eq!(out.value(), &PinValue::String("hi".into()));

        let m = add(&mut g);
        assert_eq!(g.set_constant(m, PinValue::Int(1)), Err(GraphError::NotAConstant(m)));
    }

    #[test]
    fn test_duplicate_key() {
        let mut g = graph();
        g.add_node_with_key(Box::new(Math::new(MathOp::Add)), "Add", "k", [0.0, 0.0])
            .unwrap();
        let err = g
            .add_node_with_key(Box::new(Math::new(MathOp::Add)), "Add", "k", [0.0, 0.0])
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateKey("k".into()));
    }

    #[test]
    fn test_hidden_connection_stays_active() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Float(1.0));
        let m = add(&mut g);
        let inp = g.input_ref(m, 0).unwrap();
        let id = g.connect(g.output_ref(a, 0).unwrap(), inp).unwrap();
        assert!(g.set_connection_hidden(id, true));
        let consumer = g.connection(id).unwrap().consumer.pin;
        assert!(g.connection_to(consumer).unwrap().hidden);
    }

    fn resolves(g: &Graph) -> bool {
        g.connections()
            .all(|c| g.pin(c.producer).is_ok() && g.pin(c.consumer).is_ok())
    }

    #[test]
    fn test_specialization_after_pin_removal_keeps_connections() {
        let mut g = graph();
        let m = add(&mut g);
        let text = g.add_node(Box::new(ToText), "ToString", [0.0, 0.0]);
        let downstream = g.connect(g.output_ref(m, 0).unwrap(), g.input_ref(text, 0).unwrap()).unwrap();
        g.remove_input_pin(m, 1).unwrap();

        let a = constant(&mut g, PinValue::Int(4));
        g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();

        assert_eq!(g.connection_count(), 2);
        assert!(resolves(&g));
        let c = g.connection(downstream).unwrap();
        assert_eq!(g.pin(c.producer).unwrap().pin_type, PinType::Int);
        assert_eq!(g.pin(c.consumer).unwrap().pin_type, PinType::Int);
    }

    #[test]
    fn test_replacing_input_connection() {
        let mut g = graph();
        let a = constant(&mut g, PinValue::Int(1));
        let b = constant(&mut g, PinValue::Int(2));
        let m = add(&mut g);
        let first = g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        let rx = g.subscribe();
        let second = g.connect(g.output_ref(b, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();

        assert!(g.connection(first).is_none());
        assert_eq!(g.connection(second).unwrap().producer.node, b);
        assert_eq!(g.connection_count(), 1);
        assert_eq!(
            drain(&rx),
            [
                GraphEvent::PinDisconnected(first),
                GraphEvent::PinConnected(second),
                GraphEvent::Edited
            ]
        );
    }

    #[test]
    fn test_specialization_follows_generic_chain() {
        let mut g = graph();
        let first = add(&mut g);
        let second = add(&mut g);
        let text = g.add_node(Box::new(ToText), "ToString", [0.0, 0.0]);
        g.connect(g.output_ref(first, 0).unwrap(), g.input_ref(second, 0).unwrap()).unwrap();
        g.connect(g.output_ref(second, 0).unwrap(), g.input_ref(text, 0).unwrap()).unwrap();

        let a = constant(&mut g, PinValue::Int(3));
        g.connect(g.output_ref(a, 0).unwrap(), g.input_ref(first, 0).unwrap()).unwrap();

        for node in [first, second] {
            assert!(g.node(node).unwrap().pins().iter().all(|p| p.pin_type == PinType::Int));
        }
        assert_eq!(g.node(text).unwrap().input(0).unwrap().pin_type, PinType::Int);
        assert_eq!(g.connection_count(), 3);
        assert!(resolves(&g));
    }

    /// Follows its input's type on the output, but refuses integers after
    /// already retyping.
    #[derive(Debug)]
    struct NoInts;

    impl NodeBehavior for NoInts {
        fn class_type(&self) -> &'static str {
            "NoInts"
        }

        fn declare_pins(&mut self, pins: &mut PinDeclarations) {
            pins.add_input("In", PinType::Any).add_output("Out", PinType::Any);
        }

        fn on_pin_connected(
            &mut self,
            event: &PinConnected,
            pins: &mut PinEditor<'_>,
        ) -> Result<(), GraphError> {
            if event.index != 0 || !event.other_type.is_value() {
                return Ok(());
            }
            pins.retype(1, event.other_type)?;
            if event.other_type == PinType::Int {
                return Err(GraphError::IncompatibleTypes {
                    producer: PinType::Int,
                    consumer: PinType::Any,
                });
            }
            Ok(())
        }

        fn calculate(&mut self, _ctx: &mut NodeContext<'_>) {}
    }

    #[test]
    fn test_failed_notification_keeps_graph_consistent() {
        let mut g = graph();
        let n = g.add_node(Box::new(NoInts), "NoInts", [0.0, 0.0]);
        let text = g.add_node(Box::new(ToText), "ToString", [0.0, 0.0]);
        let f = constant(&mut g, PinValue::Float(1.0));
        let i = constant(&mut g, PinValue::Int(1));
        g.connect(g.output_ref(n, 0).unwrap(), g.input_ref(text, 0).unwrap()).unwrap();
        let old = g.connect(g.output_ref(f, 0).unwrap(), g.input_ref(n, 0).unwrap()).unwrap();

        let result = g.connect(g.output_ref(i, 0).unwrap(), g.input_ref(n, 0).unwrap());
        assert!(matches!(result, Err(GraphError::IncompatibleTypes { .. })));
        assert!(g.connection(old).is_some());
        assert_eq!(g.connection_count(), 2);
        assert_eq!(g.node(n).unwrap().output(0).unwrap().pin_type, PinType::Int);
        assert!(resolves(&g));
        assert_eq!(g.to_data().unwrap().connections.len(), 2);
    }
}
