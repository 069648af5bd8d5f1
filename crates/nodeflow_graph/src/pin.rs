// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pin definitions for node inputs/outputs.

use crate::node::NodeId;
use crate::pin_type::{PinType, PinTypeRegistry, PinValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a pin.
///
/// A retyped pin receives a fresh ID, so holding an old ID after a type
/// change is detectable rather than silently aliasing the new pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinId(pub Uuid);

impl PinId {
    /// Create a new random pin ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PinId {
    fn default() -> Self {
        Self::new()
    }
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinDirection {
    /// Input pin
    Input,
    /// Output pin
    Output,
}

/// A typed slot on a node
#[derive(Debug, Clone)]
pub struct Pin {
    /// Unique pin ID
    pub id: PinId,
    /// Owning node
    pub node: NodeId,
    /// Pin name
    pub name: String,
    /// Pin direction
    pub direction: PinDirection,
    /// Wrapped value type
    pub pin_type: PinType,
    value: PinValue,
}

impl Pin {
    /// Create a new pin holding the default value of `pin_type`
    pub fn new(
        node: NodeId,
        name: impl Into<String>,
        pin_type: PinType,
        direction: PinDirection,
    ) -> Self {
        Self {
            id: PinId::new(),
            node,
            name: name.into(),
            direction,
            pin_type,
            value: pin_type.default_value(),
        }
    }

    /// Whether this is an input pin
    pub fn is_input(&self) -> bool {
        self.direction == PinDirection::Input
    }

    /// Whether this is an output pin
    pub fn is_output(&self) -> bool {
        self.direction == PinDirection::Output
    }

    /// Whether this pin carries execution flow
    pub fn is_execute(&self) -> bool {
        self.pin_type == PinType::Execute
    }

    /// Cached value
    pub fn value(&self) -> &PinValue {
        &self.value
    }

    /// Store a value, converting it to this pin's type.
    ///
    /// Returns false and leaves the pin unchanged if the value does not fit.
    pub fn set_value(&mut self, value: PinValue, registry: &PinTypeRegistry) -> bool {
        match registry.coerce(&value, self.pin_type) {
            Some(value) => {
                self.value = value;
                true
            }
            None => {
                tracing::warn!(
                    pin = %self.name,
                    expected = %self.pin_type,
                    got = %value.pin_type(),
                    "Rejected value of mismatched type"
                );
                false
            }
        }
    }

    /// Copy the value cached on `source` into this pin.
    ///
    /// Mismatched types are logged and ignored.
    pub fn set_value_from_pin(&mut self, source: &Pin, registry: &PinTypeRegistry) -> bool {
        let fits = self.pin_type == PinType::Any
            || registry.is_compatible(source.pin_type, self.pin_type);
        if !fits {
            tracing::warn!(
                from = %source.name,
                to = %self.name,
                from_type = %source.pin_type,
                to_type = %self.pin_type,
                "Cannot copy value between pins of different types"
            );
            return false;
        }
        self.set_value(source.value.clone(), registry)
    }

    /// Reset the cached value to the type's default
    pub fn disconnect(&mut self) {
        self.value = self.pin_type.default_value();
    }

    /// Check whether a connection between this pin and `other` is valid.
    ///
    /// Directions must differ; execute pins only pair with execute pins;
    /// an `Any` pin on either side accepts any value type; otherwise the
    /// producer's type must be compatible with the consumer's.
    pub fn is_compatible_with(&self, other: &Pin, registry: &PinTypeRegistry) -> bool {
        if self.direction == other.direction {
            return false;
        }
        if self.is_execute() || other.is_execute() {
            return self.is_execute() && other.is_execute();
        }
        if self.pin_type == PinType::None || other.pin_type == PinType::None {
            return false;
        }
        if self.pin_type == PinType::Any || other.pin_type == PinType::Any {
            return true;
        }
        let (producer, consumer) = if self.is_output() { (self, other) } else { (other, self) };
        registry.is_compatible(producer.pin_type, consumer.pin_type)
    }

    /// Build a replacement of this pin with a different type.
    ///
    /// Name, owner and direction carry over; the value resets.
    pub(crate) fn retyped(&self, pin_type: PinType) -> Pin {
        Pin::new(self.node, self.name.clone(), pin_type, self.direction)
    }
}
