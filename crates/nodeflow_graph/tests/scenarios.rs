// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end graph scenarios through the public API.

use nodeflow_graph::evaluation::GroupStep;
use nodeflow_graph::nodes::{Constant, DebugLog, Math, MathOp, Start, ToText};
use nodeflow_graph::{
    ExecutionGroup, Evaluator, Graph, GraphData, GraphEvent, GraphLogger, GraphRunner, GraphSettings,
    LogLevel, NodeId, NodeRegistry, NullLogger, PinType, PinTypeRegistry, PinValue,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorder(Mutex<Vec<(LogLevel, String)>>);

impl GraphLogger for Recorder {
    fn log(&self, level: LogLevel, _source: &str, message: &str) {
        self.0.lock().push((level, message.to_string()));
    }
}

fn types() -> Arc<PinTypeRegistry> {
    Arc::new(PinTypeRegistry::builtin())
}

fn link(graph: &mut Graph, from: NodeId, output: usize, to: NodeId, input: usize) {
    let out = graph.output_ref(from, output).unwrap();
    let inp = graph.input_ref(to, input).unwrap();
    graph.connect(out, inp).unwrap();
}

fn reload(graph: &Graph) -> Graph {
    let ron = graph.to_data().unwrap().to_ron().unwrap();
    let data = GraphData::from_ron(&ron).unwrap();
    Graph::from_data(&data, &NodeRegistry::builtin(), types(), &GraphSettings::default()).unwrap()
}

fn add_graph(a: PinValue, b: PinValue) -> (Graph, NodeId) {
    let mut graph = Graph::new("add", types());
    let a = graph.add_node(Box::new(Constant::new(a)), "A", [0.0, 0.0]);
    let b = graph.add_node(Box::new(Constant::new(b)), "B", [0.0, 50.0]);
    let add = graph.add_node(Box::new(Math::new(MathOp::Add)), "Add", [150.0, 25.0]);
    link(&mut graph, a, 0, add, 0);
    link(&mut graph, b, 0, add, 1);
    (graph, add)
}

#[test]
fn pulling_math_add_sums_constants() {
    let (mut graph, add) = add_graph(PinValue::Float(5.0), PinValue::Float(3.0));
    Evaluator::default()
        .evaluate(&mut graph, add, &NullLogger)
        .unwrap();
    assert_eq!(graph.output_value(add, 0), Some(&PinValue::Float(8.0)));
}

#[test]
fn pull_copies_producer_output_into_consumer() {
    let (mut graph, add) = add_graph(PinValue::Int(2), PinValue::Int(40));
    Evaluator::default()
        .evaluate(&mut graph, add, &NullLogger)
        .unwrap();
    assert_eq!(graph.input_value(add, 0), Some(&PinValue::Int(2)));
    assert_eq!(graph.input_value(add, 1), Some(&PinValue::Int(40)));
    assert_eq!(graph.output_value(add, 0), Some(&PinValue::Int(42)));
}

#[test]
fn math_specializes_to_first_connection_type() {
    let (graph, add) = add_graph(PinValue::Float(1.0), PinValue::Float(2.0));
    let node = graph.node(add).unwrap();
    assert!(node.pins().iter().all(|p| p.pin_type == PinType::Float));

    let (graph, add) = add_graph(PinValue::Int(1), PinValue::Int(2));
    let node = graph.node(add).unwrap();
    assert!(node.pins().iter().all(|p| p.pin_type == PinType::Int));
}

#[test]
fn start_runs_debug_log_once() {
    let mut graph = Graph::new("hello", types());
    let start = graph.add_node(Box::new(Start), "Start", [0.0, 0.0]);
    let log = graph.add_node(Box::new(DebugLog), "Log", [150.0, 0.0]);
    link(&mut graph, start, 0, log, 0);
    graph
        .set_input_value(log, 1, PinValue::String("hello".into()))
        .unwrap();

    let recorder = Arc::new(Recorder::default());
    let report = GraphRunner::new(GraphSettings::default())
        .with_logger(recorder.clone())
        .run(&mut graph)
        .unwrap();

    assert_eq!(report.executed, 2);
    assert!(!report.hit_limit);
    assert_eq!(*recorder.0.lock(), [(LogLevel::Info, "hello".to_string())]);
}

#[test]
fn execute_cycle_halts_at_ceiling() {
    let mut graph = Graph::new("cycle", types());
    let a = graph.add_node(Box::new(DebugLog), "A", [0.0, 0.0]);
    let b = graph.add_node(Box::new(DebugLog), "B", [150.0, 0.0]);
    link(&mut graph, a, 0, b, 0);
    link(&mut graph, b, 0, a, 0);

    let report = GraphRunner::new(GraphSettings::default())
        .with_logger(Arc::new(NullLogger))
        .run_from(&mut graph, a)
        .unwrap();
    assert_eq!(report.executed, 256);
    assert!(report.hit_limit);
}

#[test]
fn zero_input_group_finishes_in_one_call() {
    let mut graph = Graph::new("single", types());
    let node = graph.add_node(Box::new(Constant::new(PinValue::Int(7))), "C", [0.0, 0.0]);
    let mut group = ExecutionGroup::new(node, 0);
    assert_eq!(group.iterate(&mut graph, &NullLogger), Ok(GroupStep::Finished));
    assert!(group.is_finished());
    assert_eq!(graph.output_value(node, 0), Some(&PinValue::Int(7)));
}

#[test]
fn double_disconnect_is_noop() {
    let (mut graph, add) = add_graph(PinValue::Float(5.0), PinValue::Float(3.0));
    Evaluator::default()
        .evaluate(&mut graph, add, &NullLogger)
        .unwrap();
    let pin = graph.input_ref(add, 0).unwrap().pin;
    let connection = graph.connection_to(pin).unwrap().id;

    let events = graph.subscribe();
    assert!(graph.disconnect(connection).is_some());
    assert_eq!(graph.input_value(add, 0), Some(&PinValue::Float(0.0)));
    let first: Vec<_> = events.try_iter().collect();
    assert_eq!(first, [GraphEvent::PinDisconnected(connection), GraphEvent::Edited]);

    assert!(graph.disconnect(connection).is_none());
    assert_eq!(events.try_iter().count(), 0);
}

#[test]
fn save_load_round_trip_preserves_shape() {
    let (graph, _) = add_graph(PinValue::Float(5.0), PinValue::Int(3));
    let ron = graph.to_data().unwrap().to_ron().unwrap();

    let data = GraphData::from_ron(&ron).unwrap();
    let mut loaded =
        Graph::from_data(&data, &NodeRegistry::builtin(), types(), &GraphSettings::default()).unwrap();
    assert_eq!(loaded.node_count(), 3);
    assert_eq!(loaded.connection_count(), 2);

    let constants: Vec<_> = loaded
        .to_data()
        .unwrap()
        .constants
        .into_iter()
        .map(|c| (c.constant_type, c.value))
        .collect();
    let expected: Vec<_> = data
        .constants
        .iter()
        .map(|c| (c.constant_type, c.value.clone()))
        .collect();
    assert_eq!(constants, expected);

    let add = loaded.node_by_key(&data.nodes[0].id).unwrap().id;
    Evaluator::default()
        .evaluate(&mut loaded, add, &NullLogger)
        .unwrap();
    assert_eq!(loaded.output_value(add, 0), Some(&PinValue::Float(8.0)));
}

#[test]
fn retyped_constant_survives_reload() {
    let (mut graph, add) = add_graph(PinValue::Float(5.0), PinValue::Float(3.0));
    let a = graph.nodes().find(|n| n.name == "A").unwrap().id;
    graph.set_constant(a, PinValue::Int(2)).unwrap();
    let key = graph.node(add).unwrap().key.clone();

    let mut loaded = reload(&graph);
    assert_eq!(loaded.connection_count(), 2);
    let add = loaded.node_by_key(&key).unwrap().id;
    Evaluator::default()
        .evaluate(&mut loaded, add, &NullLogger)
        .unwrap();
    assert_eq!(loaded.output_value(add, 0), Some(&PinValue::Float(5.0)));
}

#[test]
fn edited_pins_and_inline_values_survive_reload() {
    let mut graph = Graph::new("edited", types());
    let start = graph.add_node(Box::new(Start), "Start", [0.0, 0.0]);
    let log = graph.add_node(Box::new(DebugLog), "Log", [150.0, 0.0]);
    let add = graph.add_node(Box::new(Math::new(MathOp::Add)), "Add", [0.0, 80.0]);
    let text = graph.add_node(Box::new(ToText), "ToString", [150.0, 80.0]);
    link(&mut graph, start, 0, log, 0);
    graph
        .set_input_value(log, 1, PinValue::String("hello".into()))
        .unwrap();
    link(&mut graph, add, 0, text, 0);
    graph.remove_input_pin(add, 1).unwrap();
    graph.add_input_pin(add, "C", PinType::Float).unwrap();
    let c = graph.add_node(Box::new(Constant::new(PinValue::Int(6))), "C", [-150.0, 80.0]);
    link(&mut graph, c, 0, add, 0);
    let keys: Vec<_> = [log, add, text]
        .iter()
        .map(|id| graph.node(*id).unwrap().key.clone())
        .collect();

    let loaded = reload(&graph);
    assert_eq!(loaded.connection_count(), 3);
    let log = loaded.node_by_key(&keys[0]).unwrap().id;
    assert_eq!(loaded.input_value(log, 1), Some(&PinValue::String("hello".into())));

    let add = loaded.node_by_key(&keys[1]).unwrap();
    let layout: Vec<_> = add.pins().iter().map(|p| (p.name.as_str(), p.pin_type)).collect();
    assert_eq!(
        layout,
        [("A", PinType::Int), ("Result", PinType::Int), ("C", PinType::Float)]
    );
    let text = loaded.node_by_key(&keys[2]).unwrap();
    assert_eq!(text.input(0).unwrap().pin_type, PinType::Int);

    let recorder = Arc::new(Recorder::default());
    let mut loaded = loaded;
    GraphRunner::new(GraphSettings::default())
        .with_logger(recorder.clone())
        .run(&mut loaded)
        .unwrap();
    assert_eq!(*recorder.0.lock(), [(LogLevel::Info, "hello".to_string())]);
}

#[test]
fn specialization_reaches_downstream_generic_nodes() {
    let mut graph = Graph::new("chain", types());
    let first = graph.add_node(Box::new(Math::new(MathOp::Add)), "M1", [0.0, 0.0]);
    let second = graph.add_node(Box::new(Math::new(MathOp::Multiply)), "M2", [150.0, 0.0]);
    link(&mut graph, first, 0, second, 0);
    let a = graph.add_node(Box::new(Constant::new(PinValue::Int(3))), "A", [-150.0, 0.0]);
    link(&mut graph, a, 0, first, 0);
    let b = graph.add_node(Box::new(Constant::new(PinValue::Int(4))), "B", [0.0, 80.0]);
    link(&mut graph, b, 0, second, 1);

    let node = graph.node(second).unwrap();
    assert!(node.pins().iter().all(|p| p.pin_type == PinType::Int));
    Evaluator::default()
        .evaluate(&mut graph, second, &NullLogger)
        .unwrap();
    assert_eq!(graph.output_value(second, 0), Some(&PinValue::Int(12)));

    let loaded = reload(&graph);
    let key = &graph.node(second).unwrap().key;
    let node = loaded.node_by_key(key).unwrap();
    assert!(node.pins().iter().all(|p| p.pin_type == PinType::Int));
}
