// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pin value types and the registry describing them.
//!
//! Every pin wraps one [`PinType`]. The [`PinTypeRegistry`] attaches
//! metadata to each type: a display name, the set of types that may be
//! implicitly widened into it, and whether it carries a constant value
//! or is one of the special markers (`None`, `Execute`, `Any`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag carried by a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    /// No data
    None,
    /// Execution flow, carries no value
    Execute,
    /// Wildcard that narrows to a concrete type on connection
    Any,
    /// 32-bit float
    Float,
    /// 32-bit signed integer
    Int,
    /// Boolean
    Bool,
    /// UTF-8 string
    String,
}

impl PinType {
    /// Default value held by a pin of this type
    pub fn default_value(self) -> PinValue {
        match self {
            Self::Float => PinValue::Float(0.0),
            Self::Int => PinValue::Int(0),
            Self::Bool => PinValue::Bool(false),
            Self::String => PinValue::String(String::new()),
            Self::None | Self::Execute | Self::Any => PinValue::None,
        }
    }

    /// Whether this type carries a concrete value
    pub fn is_value(self) -> bool {
        matches!(self, Self::Float | Self::Int | Self::Bool | Self::String)
    }

    /// Whether this is a numeric type
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int)
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Execute => "Execute",
            Self::Any => "Any",
            Self::Float => "Float",
            Self::Int => "Int",
            Self::Bool => "Bool",
            Self::String => "String",
        };
        f.write_str(name)
    }
}

/// Value cached on a pin
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PinValue {
    /// No value
    #[default]
    None,
    /// Float
    Float(f32),
    /// Integer
    Int(i32),
    /// Boolean
    Bool(bool),
    /// String
    String(String),
}

impl PinValue {
    /// Get the pin type for this value
    pub fn pin_type(&self) -> PinType {
        match self {
            Self::None => PinType::None,
            Self::Float(_) => PinType::Float,
            Self::Int(_) => PinType::Int,
            Self::Bool(_) => PinType::Bool,
            Self::String(_) => PinType::String,
        }
    }

    /// Float value, widening integers
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    /// Integer value
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Convert into `target`, allowing only lossless widening (int to float)
    pub fn widen_to(&self, target: PinType) -> Option<PinValue> {
        match (self, target) {
            (value, target) if value.pin_type() == target => Some(value.clone()),
            (Self::Int(v), PinType::Float) => Some(Self::Float(*v as f32)),
            _ => None,
        }
    }
}

impl fmt::Display for PinValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Whether a type holds a constant value or is a special marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinCategory {
    /// Carries a value that can be stored as a constant
    Constant,
    /// `None`, `Execute` or `Any`
    Special,
}

/// Registered metadata for a pin type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinTypeDescriptor {
    /// The described type
    pub pin_type: PinType,
    /// Display name
    pub name: String,
    /// Types that may be connected into a pin of this type
    pub compatible: Vec<PinType>,
    /// Constant or special
    pub category: PinCategory,
}

/// Table of known pin types.
///
/// Built once at startup and shared read-only afterwards, usually behind an
/// `Arc` handed to every [`Graph`](crate::Graph).
#[derive(Debug, Clone, Default)]
pub struct PinTypeRegistry {
    descriptors: IndexMap<PinType, PinTypeDescriptor>,
}

impl PinTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in type registered
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [(PinType, &str, &[PinType], PinCategory); 7] = [
            (PinType::None, "None", &[], PinCategory::Special),
            (PinType::Execute, "Execute", &[], PinCategory::Special),
            (PinType::Any, "Any", &[], PinCategory::Special),
            (PinType::Float, "Float", &[PinType::Int], PinCategory::Constant),
            (PinType::Int, "Int", &[], PinCategory::Constant),
            (PinType::Bool, "Bool", &[], PinCategory::Constant),
            (PinType::String, "String", &[], PinCategory::Constant),
        ];
        for (pin_type, name, compatible, category) in builtin {
            registry.descriptors.insert(
                pin_type,
                PinTypeDescriptor {
                    pin_type,
                    name: name.to_string(),
                    compatible: compatible.to_vec(),
                    category,
                },
            );
        }
        registry
    }

    /// Register a type. Entries are never replaced.
    pub fn register(
        &mut self,
        pin_type: PinType,
        name: impl Into<String>,
        compatible: &[PinType],
        category: PinCategory,
    ) -> Result<&PinTypeDescriptor, RegistryError> {
        if self.descriptors.contains_key(&pin_type) {
            return Err(RegistryError::AlreadyRegistered(pin_type));
        }
        let descriptor = PinTypeDescriptor {
            pin_type,
            name: name.into(),
            compatible: compatible.to_vec(),
            category,
        };
        let (index, _) = self.descriptors.insert_full(pin_type, descriptor);
        Ok(&self.descriptors[index])
    }

    /// Look up the metadata for a type
    pub fn lookup(&self, pin_type: PinType) -> Result<&PinTypeDescriptor, RegistryError> {
        self.descriptors
            .get(&pin_type)
            .ok_or(RegistryError::UnknownType(pin_type))
    }

    /// All registered descriptors in registration order
    pub fn descriptors(&self) -> impl Iterator<Item = &PinTypeDescriptor> {
        self.descriptors.values()
    }

    /// True if `candidate` may flow into a pin declared as `declared`.
    ///
    /// Unregistered declared types accept only an identical candidate.
    pub fn is_compatible(&self, candidate: PinType, declared: PinType) -> bool {
        if candidate == declared {
            return true;
        }
        self.descriptors
            .get(&declared)
            .is_some_and(|d| d.compatible.contains(&candidate))
    }

    /// Convert `value` for storage in a pin declared as `declared`
    pub fn coerce(&self, value: &PinValue, declared: PinType) -> Option<PinValue> {
        if declared == PinType::Any {
            return Some(value.clone());
        }
        if !self.is_compatible(value.pin_type(), declared) {
            return None;
        }
        value.widen_to(declared)
    }
}

/// Error raised by registry lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Type was never registered
    #[error("Unknown pin type: {0}")]
    UnknownType(PinType),

    /// Type is already in the table
    #[error("Pin type already registered: {0}")]
    AlreadyRegistered(PinType),
}
