// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node library.
//!
//! Value nodes (constants, math, comparison, logic, conversion) are pulled
//! by the evaluator. Flow nodes (start, debug log, branch) carry execute
//! pins and are stepped by the runner.
//!
//! The math, compare and to-string nodes start out with `Any` pins and
//! specialize on their first concrete connection.

use crate::graph::GraphError;
use crate::logging::LogLevel;
use crate::node::{
    FlowStep, NodeBehavior, NodeCategory, NodeContext, NodeRegistry, NodeType, PinConnected,
    PinDeclarations, PinEditor,
};
use crate::pin::PinDirection;
use crate::pin_type::{PinType, PinValue};
use std::cmp::Ordering;

/// Class key of [`Constant`]
pub const CONSTANT_CLASS: &str = "Constant";

/// Create the registry of built-in node types
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    let entries: [(&str, &str, NodeCategory, &str, fn() -> Box<dyn NodeBehavior>); 16] = [
        ("Start", "Start", NodeCategory::Event, "Entry point of a run", || Box::new(Start)),
        (CONSTANT_CLASS, "Constant", NodeCategory::Constant, "Constant value", || {
            Box::new(Constant::default())
        }),
        ("MathAdd", "Add", NodeCategory::Math, "A + B", || Box::new(Math::new(MathOp::Add))),
        ("MathSubtract", "Subtract", NodeCategory::Math, "A - B", || {
            Box::new(Math::new(MathOp::Subtract))
        }),
        ("MathMultiply", "Multiply", NodeCategory::Math, "A * B", || {
            Box::new(Math::new(MathOp::Multiply))
        }),
        ("MathDivide", "Divide", NodeCategory::Math, "A / B", || {
            Box::new(Math::new(MathOp::Divide))
        }),
        ("CompareEqual", "Equal", NodeCategory::Logic, "A == B", || {
            Box::new(Compare::new(CompareOp::Equal))
        }),
        ("CompareNotEqual", "Not Equal", NodeCategory::Logic, "A != B", || {
            Box::new(Compare::new(CompareOp::NotEqual))
        }),
        ("CompareLess", "Less", NodeCategory::Logic, "A < B", || {
            Box::new(Compare::new(CompareOp::Less))
        }),
        ("CompareGreater", "Greater", NodeCategory::Logic, "A > B", || {
            Box::new(Compare::new(CompareOp::Greater))
        }),
        ("LogicAnd", "And", NodeCategory::Logic, "A and B", || Box::new(Logic::new(LogicOp::And))),
        ("LogicOr", "Or", NodeCategory::Logic, "A or B", || Box::new(Logic::new(LogicOp::Or))),
        ("LogicNot", "Not", NodeCategory::Logic, "not A", || Box::new(Logic::new(LogicOp::Not))),
        ("ToString", "To String", NodeCategory::Conversion, "Format any value as text", || {
            Box::new(ToText)
        }),
        ("DebugLog", "Debug Log", NodeCategory::Utility, "Log a message", || Box::new(DebugLog)),
        ("Branch", "Branch", NodeCategory::Flow, "If/else branching", || Box::new(Branch)),
    ];

    for (class_type, name, category, description, constructor) in entries {
        registry.register(NodeType {
            class_type: class_type.to_string(),
            name: name.to_string(),
            category,
            description: description.to_string(),
            constructor,
        });
    }

    registry
}

/// Entry point of a run
#[derive(Debug, Clone, Copy, Default)]
pub struct Start;

impl NodeBehavior for Start {
    fn class_type(&self) -> &'static str {
        "Start"
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_execute_out("Exec");
    }

    fn calculate(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn is_entry_point(&self) -> bool {
        true
    }
}

/// Holds a single value on its output
#[derive(Debug, Clone)]
pub struct Constant {
    value: PinValue,
}

impl Constant {
    /// Create a constant holding `value`
    pub fn new(value: PinValue) -> Self {
        Self { value }
    }
}

impl Default for Constant {
    fn default() -> Self {
        Self::new(PinValue::Float(0.0))
    }
}

impl NodeBehavior for Constant {
    fn class_type(&self) -> &'static str {
        CONSTANT_CLASS
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_output("Value", self.value.pin_type());
    }

    fn calculate(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.set_output(0, self.value.clone());
    }

    fn constant(&self) -> Option<&PinValue> {
        Some(&self.value)
    }

    fn set_constant(&mut self, value: PinValue) -> bool {
        if value.pin_type().is_value() {
            self.value = value;
            true
        } else {
            false
        }
    }
}

/// Whether the pin that just got connected is still generic
fn is_generic(pins: &PinEditor<'_>, event: &PinConnected) -> bool {
    pins.pin(event.index).is_some_and(|p| p.pin_type == PinType::Any)
}

/// Retype every remaining `Any` pin, optionally only in one direction.
///
/// The node's specialization lives entirely in its pin types, so a node
/// restored with concrete pins behaves exactly like one specialized by a
/// connection.
fn specialize(
    pins: &mut PinEditor<'_>,
    direction: Option<PinDirection>,
    pin_type: PinType,
) -> Result<(), GraphError> {
    let generic: Vec<usize> = pins
        .pins()
        .iter()
        .enumerate()
        .filter(|(_, p)| p.pin_type == PinType::Any && direction.map_or(true, |d| p.direction == d))
        .map(|(i, _)| i)
        .collect();
    for index in generic {
        pins.retype(index, pin_type)?;
    }
    Ok(())
}

/// Arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    /// A + B
    Add,
    /// A - B
    Subtract,
    /// A * B
    Multiply,
    /// A / B
    Divide,
}

/// Binary arithmetic over floats or ints, decided by the first connection
#[derive(Debug, Clone)]
pub struct Math {
    op: MathOp,
}

impl Math {
    /// Create an unspecialized operator
    pub fn new(op: MathOp) -> Self {
        Self { op }
    }

    fn float(&self, a: f32, b: f32) -> f32 {
        match self.op {
            MathOp::Add => a + b,
            MathOp::Subtract => a - b,
            MathOp::Multiply => a * b,
            MathOp::Divide => a / b,
        }
    }

    fn int(&self, a: i32, b: i32) -> Option<i32> {
        match self.op {
            MathOp::Add => Some(a.wrapping_add(b)),
            MathOp::Subtract => Some(a.wrapping_sub(b)),
            MathOp::Multiply => Some(a.wrapping_mul(b)),
            MathOp::Divide => a.checked_div(b),
        }
    }
}

impl NodeBehavior for Math {
    fn class_type(&self) -> &'static str {
        match self.op {
            MathOp::Add => "MathAdd",
            MathOp::Subtract => "MathSubtract",
            MathOp::Multiply => "MathMultiply",
            MathOp::Divide => "MathDivide",
        }
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_input("A", PinType::Any)
            .add_input("B", PinType::Any)
            .add_output("Result", PinType::Any);
    }

    fn accepts_connection(&self, _pin_index: usize, other_type: PinType) -> bool {
        other_type.is_numeric() || other_type == PinType::Any
    }

    fn on_pin_connected(
        &mut self,
        event: &PinConnected,
        pins: &mut PinEditor<'_>,
    ) -> Result<(), GraphError> {
        if !event.other_type.is_numeric() || !is_generic(pins, event) {
            return Ok(());
        }
        specialize(pins, None, event.other_type)
    }

    fn calculate(&mut self, ctx: &mut NodeContext<'_>) {
        match ctx.output_type(0) {
            Some(PinType::Float) => {
                let a = ctx.input(0).as_float().unwrap_or_default();
                let b = ctx.input(1).as_float().unwrap_or_default();
                ctx.set_output(0, PinValue::Float(self.float(a, b)));
            }
            Some(PinType::Int) => {
                let a = ctx.input(0).as_int().unwrap_or_default();
                let b = ctx.input(1).as_int().unwrap_or_default();
                let result = self.int(a, b).unwrap_or_else(|| {
                    ctx.log(LogLevel::Warn, "Integer division by zero");
                    0
                });
                ctx.set_output(0, PinValue::Int(result));
            }
            _ => {
                ctx.set_output(0, PinValue::None);
            }
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// A == B
    Equal,
    /// A != B
    NotEqual,
    /// A < B
    Less,
    /// A > B
    Greater,
}

fn compare_values(a: &PinValue, b: &PinValue) -> Option<Ordering> {
    match (a, b) {
        (PinValue::Bool(x), PinValue::Bool(y)) => Some(x.cmp(y)),
        (PinValue::String(x), PinValue::String(y)) => Some(x.cmp(y)),
        (PinValue::Int(x), PinValue::Int(y)) => Some(x.cmp(y)),
        _ => a.as_float()?.partial_cmp(&b.as_float()?),
    }
}

/// Compares two values of the type chosen by the first connection
#[derive(Debug, Clone)]
pub struct Compare {
    op: CompareOp,
}

impl Compare {
    /// Create an unspecialized comparison
    pub fn new(op: CompareOp) -> Self {
        Self { op }
    }
}

impl NodeBehavior for Compare {
    fn class_type(&self) -> &'static str {
        match self.op {
            CompareOp::Equal => "CompareEqual",
            CompareOp::NotEqual => "CompareNotEqual",
            CompareOp::Less => "CompareLess",
            CompareOp::Greater => "CompareGreater",
        }
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_input("A", PinType::Any)
            .add_input("B", PinType::Any)
            .add_output("Result", PinType::Bool);
    }

    fn on_pin_connected(
        &mut self,
        event: &PinConnected,
        pins: &mut PinEditor<'_>,
    ) -> Result<(), GraphError> {
        if !event.other_type.is_value() || !is_generic(pins, event) {
            return Ok(());
        }
        specialize(pins, Some(PinDirection::Input), event.other_type)
    }

    fn calculate(&mut self, ctx: &mut NodeContext<'_>) {
        let ordering = compare_values(ctx.input(0), ctx.input(1));
        let result = match self.op {
            CompareOp::Equal => ordering == Some(Ordering::Equal),
            CompareOp::NotEqual => ordering != Some(Ordering::Equal),
            CompareOp::Less => ordering == Some(Ordering::Less),
            CompareOp::Greater => ordering == Some(Ordering::Greater),
        };
        ctx.set_output(0, PinValue::Bool(result));
    }
}

/// Boolean operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    /// A and B
    And,
    /// A or B
    Or,
    /// not A
    Not,
}

/// Boolean logic
#[derive(Debug, Clone)]
pub struct Logic {
    op: LogicOp,
}

impl Logic {
    /// Create a logic node
    pub fn new(op: LogicOp) -> Self {
        Self { op }
    }
}

impl NodeBehavior for Logic {
    fn class_type(&self) -> &'static str {
        match self.op {
            LogicOp::And => "LogicAnd",
            LogicOp::Or => "LogicOr",
            LogicOp::Not => "LogicNot",
        }
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_input("A", PinType::Bool);
        if self.op != LogicOp::Not {
            pins.add_input("B", PinType::Bool);
        }
        pins.add_output("Result", PinType::Bool);
    }

    fn calculate(&mut self, ctx: &mut NodeContext<'_>) {
        let a = ctx.input(0).as_bool().unwrap_or_default();
        let b = ctx.input(1).as_bool().unwrap_or_default();
        let result = match self.op {
            LogicOp::And => a && b,
            LogicOp::Or => a || b,
            LogicOp::Not => !a,
        };
        ctx.set_output(0, PinValue::Bool(result));
    }
}

/// Formats its input as a string
#[derive(Debug, Clone, Copy, Default)]
pub struct ToText;

impl NodeBehavior for ToText {
    fn class_type(&self) -> &'static str {
        "ToString"
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_input("Value", PinType::Any)
            .add_output("Text", PinType::String);
    }

    fn on_pin_connected(
        &mut self,
        event: &PinConnected,
        pins: &mut PinEditor<'_>,
    ) -> Result<(), GraphError> {
        if event.direction != PinDirection::Input
            || !event.other_type.is_value()
            || !is_generic(pins, event)
        {
            return Ok(());
        }
        pins.retype(event.index, event.other_type).map(|_| ())
    }

    fn calculate(&mut self, ctx: &mut NodeContext<'_>) {
        let text = ctx.input(0).to_string();
        ctx.set_output(0, PinValue::String(text));
    }
}

/// Logs its message input when executed
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugLog;

impl NodeBehavior for DebugLog {
    fn class_type(&self) -> &'static str {
        "DebugLog"
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_execute_in()
            .add_input("Message", PinType::Any)
            .add_execute_out("Exec");
    }

    fn calculate(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn execute(&mut self, ctx: &mut NodeContext<'_>) -> FlowStep {
        let message = ctx.input(1).to_string();
        ctx.log(LogLevel::Info, &message);
        FlowStep::Continue(0)
    }
}

/// Continues through `True` or `False` depending on its condition
#[derive(Debug, Clone, Copy, Default)]
pub struct Branch;

impl NodeBehavior for Branch {
    fn class_type(&self) -> &'static str {
        "Branch"
    }

    fn declare_pins(&mut self, pins: &mut PinDeclarations) {
        pins.add_execute_in()
            .add_input("Condition", PinType::Bool)
            .add_execute_out("True")
            .add_execute_out("False");
    }

    fn calculate(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn execute(&mut self, ctx: &mut NodeContext<'_>) -> FlowStep {
        if ctx.input(1).as_bool().unwrap_or_default() {
            FlowStep::Continue(0)
        } else {
            FlowStep::Continue(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::pin_type::PinTypeRegistry;
    use std::sync::Arc;

    fn graph() -> Graph {
        Graph::new("nodes", Arc::new(PinTypeRegistry::builtin()))
    }

    fn pin_types(graph: &Graph, node: crate::NodeId) -> Vec<PinType> {
        graph.node(node).unwrap().pins().iter().map(|p| p.pin_type).collect()
    }

    #[test]
    fn test_registry_contents() {
        let registry = builtin_registry();
        assert_eq!(registry.types().count(), 16);
        assert!(registry.create("MathAdd").is_some());
        assert!(registry.create("Nope").is_none());
        assert_eq!(registry.types_in_category(NodeCategory::Math).count(), 4);
        for node_type in registry.types() {
            let behavior = (node_type.constructor)();
            assert_eq!(behavior.class_type(), node_type.class_type);
        }
    }

    #[test]
    fn test_math_specializes_to_float() {
        let mut g = graph();
        let c = g.add_node(Box::new(Constant::new(PinValue::Float(1.0))), "C", [0.0, 0.0]);
        let m = g.add_node(Box::new(Math::new(MathOp::Add)), "Add", [0.0, 0.0]);
        g.connect(g.output_ref(c, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        assert_eq!(pin_types(&g, m), [PinType::Float; 3]);
    }

    #[test]
    fn test_math_specializes_to_int() {
        let mut g = graph();
        let c = g.add_node(Box::new(Constant::new(PinValue::Int(1))), "C", [0.0, 0.0]);
        let m = g.add_node(Box::new(Math::new(MathOp::Add)), "Add", [0.0, 0.0]);
        g.connect(g.output_ref(c, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        assert_eq!(pin_types(&g, m), [PinType::Int; 3]);
    }

    #[test]
    fn test_math_rejects_non_numeric() {
        let mut g = graph();
        let c = g.add_node(Box::new(Constant::new(PinValue::Bool(true))), "C", [0.0, 0.0]);
        let m = g.add_node(Box::new(Math::new(MathOp::Add)), "Add", [0.0, 0.0]);
        let result = g.connect(g.output_ref(c, 0).unwrap(), g.input_ref(m, 0).unwrap());
        assert!(matches!(result, Err(GraphError::UnsupportedSpecialization { .. })));
        assert_eq!(pin_types(&g, m), [PinType::Any; 3]);
    }

    #[test]
    fn test_specialized_math_rejects_other_type() {
        let mut g = graph();
        let f = g.add_node(Box::new(Constant::new(PinValue::Float(1.0))), "F", [0.0, 0.0]);
        let s = g.add_node(Box::new(Constant::new(PinValue::String("s".into()))), "S", [0.0, 0.0]);
        let m = g.add_node(Box::new(Math::new(MathOp::Add)), "Add", [0.0, 0.0]);
        g.connect(g.output_ref(f, 0).unwrap(), g.input_ref(m, 0).unwrap()).unwrap();
        let result = g.connect(g.output_ref(s, 0).unwrap(), g.input_ref(m, 1).unwrap());
        assert_eq!(
            result,
            Err(GraphError::IncompatibleTypes {
                producer: PinType::String,
                consumer: PinType::Float,
            })
        );
    }

    #[test]
    fn test_downstream_connection_survives_specialization() {
        let mut g = graph();
        let m = g.add_node(Box::new(Math::new(MathOp::Add)), "Add", [0.0, 0.0]);
        let t = g.add_node(Box::new(ToText), "Text", [0.0, 0.0]);
        let c = g.add_node(Box::new(Constant::new(PinValue::Int(2))), "C", [0.0, 0.0]);
        let downstream = g.connect(g.output_ref(m, 0).unwrap(), g.input_ref(t, 0).unwrap()).unwrap();
        g.connect(g.output_ref(c, 0).unwrap(), g.input_ref(m, 1).unwrap()).unwrap();

        let connection = g.connection(downstream).unwrap();
        assert_eq!(connection.producer, g.output_ref(m, 0).unwrap());
        assert_eq!(g.pin(connection.producer).unwrap().pin_type, PinType::Int);
    }

    #[test]
    fn test_compare_specializes_inputs_only() {
        let mut g = graph();
        let c = g.add_node(Box::new(Constant::new(PinValue::String("a".into()))), "C", [0.0, 0.0]);
        let cmp = g.add_node(Box::new(Compare::new(CompareOp::Equal)), "Eq", [0.0, 0.0]);
        g.connect(g.output_ref(c, 0).unwrap(), g.input_ref(cmp, 1).unwrap()).unwrap();
        assert_eq!(
            pin_types(&g, cmp),
            [PinType::String, PinType::String, PinType::Bool]
        );
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(
            compare_values(&PinValue::Int(1), &PinValue::Int(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_values(&PinValue::Int(2), &PinValue::Float(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_values(&PinValue::Bool(true), &PinValue::Int(1)), None);
    }

    #[test]
    fn test_constant_rejects_none() {
        let mut constant = Constant::default();
        assert!(!constant.set_constant(PinValue::None));
        assert!(constant.set_constant(PinValue::Bool(true)));
        assert_eq!(constant.constant(), Some(&PinValue::Bool(true)));
    }
}
