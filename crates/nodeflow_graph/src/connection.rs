// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) definitions for the graph.

use crate::node::NodeId;
use crate::pin::PinId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A pin addressed through its owning node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinRef {
    /// Owning node
    pub node: NodeId,
    /// The pin
    pub pin: PinId,
}

impl PinRef {
    /// Create a new pin reference
    pub fn new(node: NodeId, pin: PinId) -> Self {
        Self { node, pin }
    }
}

/// A connection between two pins.
///
/// `start` and `end` keep the order the caller connected them in.
/// `producer` is whichever end is an output pin and `consumer` the input,
/// so value resolution never depends on the drawing direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Pin the connection was dragged from
    pub start: PinRef,
    /// Pin the connection was dropped on
    pub end: PinRef,
    /// Output side
    pub producer: PinRef,
    /// Input side
    pub consumer: PinRef,
    /// Suppressed from drawing; still active
    pub hidden: bool,
    /// Carries execution flow rather than a value
    pub execute: bool,
}

impl Connection {
    /// Create a new connection. `start_is_output` says which end produces.
    pub fn new(start: PinRef, end: PinRef, start_is_output: bool, execute: bool) -> Self {
        let (producer, consumer) = if start_is_output { (start, end) } else { (end, start) };
        Self {
            id: ConnectionId::new(),
            start,
            end,
            producer,
            consumer,
            hidden: false,
            execute,
        }
    }

    /// Check if this connection involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.producer.node == node_id || self.consumer.node == node_id
    }

    /// Check if this connection involves a specific pin
    pub fn involves_pin(&self, pin_id: PinId) -> bool {
        self.producer.pin == pin_id || self.consumer.pin == pin_id
    }

    /// Whether this connection links exactly these two pins, in either order
    pub fn links(&self, a: PinId, b: PinId) -> bool {
        (self.producer.pin == a && self.consumer.pin == b)
            || (self.producer.pin == b && self.consumer.pin == a)
    }

    /// Point any endpoint referencing `old` at `new`
    pub(crate) fn remap_pin(&mut self, old: PinId, new: PinId) {
        for end in [&mut self.start, &mut self.end, &mut self.producer, &mut self.consumer] {
            if end.pin == old {
                end.pin = new;
            }
        }
    }
}
