mod common;

use common::{batch_norm_model, data, f32_var, i8_var, labels, lower, operator, values};
use tflc_ir::{Activation, OpKind, Scalar};
use tflc_lower::{LowerError, LowerOptions};

/// Statistics folding to scale `[0.5, 1.0, 1.5]` and shift `[-1, -2, -3]`
/// with eps 1.0.
fn stats() -> [Vec<f32>; 4] {
    [
        vec![1.0, 2.0, 3.0],
        vec![0.0; 3],
        vec![2.0; 3],
        vec![3.0; 3],
    ]
}

#[test]
fn float_batch_norm_is_mul_add() {
    let mut model = batch_norm_model(
        f32_var("x", &[1, 3, 4, 4]),
        f32_var("y", &[1, 3, 4, 4]),
        stats(),
        1.0,
        Activation::None,
    );
    let out = lower(&mut model);
    let graph = &model.graph;

    assert_eq!(labels(graph, &out.nodes), ["MUL", "ADD"]);

    let mul = operator(graph, out.nodes[0]);
    assert_eq!(mul.inputs[0], model.input);
    assert_eq!(
        data(graph, mul.inputs[1]),
        &values(&[1, 3, 1, 1], vec![0.5, 1.0, 1.5])
    );
    assert_eq!(
        mul.kind,
        OpKind::Mul {
            activation: Activation::None
        }
    );

    let add = operator(graph, out.nodes[1]);
    assert_eq!(add.inputs[0], mul.outputs[0]);
    assert_eq!(
        data(graph, add.inputs[1]),
        &values(&[1, 3, 1, 1], vec![-1.0, -2.0, -3.0])
    );
    assert_eq!(add.outputs[0], model.output);
    assert_eq!(graph.predecessors(model.output_node), vec![out.nodes[1]]);
}

#[test]
fn activation_is_fused_into_add() {
    let mut model = batch_norm_model(
        f32_var("x", &[2, 3, 5]),
        f32_var("y", &[2, 3, 5]),
        stats(),
        1.0,
        Activation::Relu,
    );
    let out = lower(&mut model);
    let graph = &model.graph;

    let add = operator(graph, out.nodes[1]);
    assert_eq!(
        add.kind,
        OpKind::Add {
            activation: Activation::Relu
        }
    );
    // Rank 3 broadcasts as [1, C, 1].
    assert_eq!(
        data(graph, add.inputs[1]),
        &values(&[1, 3, 1], vec![-1.0, -2.0, -3.0])
    );
}

#[test]
fn quantized_batch_norm_round_trips_through_float() {
    let mut model = batch_norm_model(
        i8_var("x", &[1, 3, 4, 4], 0.1),
        i8_var("y", &[1, 3, 4, 4], 0.2),
        stats(),
        1.0,
        Activation::None,
    );
    let out = lower(&mut model);
    let graph = &model.graph;

    assert_eq!(
        labels(graph, &out.nodes),
        ["DEQUANTIZE", "MUL", "ADD", "QUANTIZE"]
    );

    let dequantize = operator(graph, out.nodes[0]);
    assert_eq!(dequantize.inputs, vec![model.input]);
    let float = graph.tensor(dequantize.outputs[0]).unwrap();
    assert_eq!(float.scalar, Scalar::F32);
    assert!(!float.is_quantized());

    // The multiply works on the dequantized tensor.
    let mul = operator(graph, out.nodes[1]);
    assert_eq!(mul.inputs[0], dequantize.outputs[0]);

    let quantize = operator(graph, out.nodes[3]);
    assert_eq!(quantize.outputs, vec![model.output]);
    assert_eq!(graph.predecessors(model.output_node), vec![out.nodes[3]]);
}

#[test]
fn quantized_input_needs_quantized_output() {
    let mut model = batch_norm_model(
        i8_var("x", &[1, 3, 4, 4], 0.1),
        f32_var("y", &[1, 3, 4, 4]),
        stats(),
        1e-5,
        Activation::None,
    );
    assert!(matches!(
        common::try_lower(&mut model, &LowerOptions::default()),
        Err(LowerError::Precondition { op: "BATCH_NORM", .. })
    ));
}

#[test]
fn rank_one_input_rejected() {
    let mut model = batch_norm_model(
        f32_var("x", &[3]),
        f32_var("y", &[3]),
        stats(),
        1e-5,
        Activation::None,
    );
    let err = common::try_lower(&mut model, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("channel axis"));
}

#[test]
fn statistics_must_match_channels() {
    let mut model = batch_norm_model(
        f32_var("x", &[1, 4, 2, 2]),
        f32_var("y", &[1, 4, 2, 2]),
        stats(),
        1e-5,
        Activation::None,
    );
    let (tensors, edges) = (model.graph.tensor_count(), model.graph.edge_count());
    let err = common::try_lower(&mut model, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("3 elements for 4 channels"));

    assert!(model.graph.node(model.node).unwrap().as_operator().is_none());
    assert_eq!(model.graph.transformable_nodes().unwrap(), vec![model.node]);
    assert_eq!(model.graph.tensor_count(), tensors);
    assert_eq!(model.graph.edge_count(), edges);
    assert_eq!(model.graph.predecessors(model.output_node), vec![model.node]);
}
