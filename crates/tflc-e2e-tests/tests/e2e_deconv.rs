mod common;

use common::{ConvModel, data, deconv_model, dims, filled, labels, lower, operator, try_lower};
use tflc_ir::{Activation, ConvParams, OpKind, Tensor, TensorData, TransposeConvOptions, Padding};
use tflc_lower::{LowerError, LowerOptions};

fn strided(bias: Option<TensorData>) -> common::Model {
    let mut m = ConvModel::f32(
        &[1, 4, 5, 5],
        &[4, 2, 3, 3],
        &[1, 2, 9, 9],
        ConvParams::new(2).with_stride([2, 2]).with_padding([1, 1]),
    );
    if let Some(bias) = bias {
        m = m.with_bias(bias);
    }
    deconv_model(m)
}

#[test]
fn padded_deconv_crops_and_adds_bias() {
    let mut model = strided(Some(filled(&[2], 0.5)));
    let bias = model.graph.tensor_by_name("b").unwrap();
    let out = lower(&mut model);
    let graph = &model.graph;

    assert_eq!(
        labels(graph, &out.nodes),
        ["TRANSPOSE", "TRANSPOSE", "TRANSPOSE_CONV", "SLICE", "ADD", "TRANSPOSE"]
    );

    let reorder = operator(graph, out.nodes[1]);
    assert_eq!(
        data(graph, reorder.inputs[1]),
        &TensorData::i32_vector(vec![1, 2, 3, 0])
    );
    assert_eq!(dims(graph, reorder.outputs[0]), [2, 3, 3, 4]);

    let conv = operator(graph, out.nodes[2]);
    assert_eq!(
        conv.kind,
        OpKind::TransposeConv(TransposeConvOptions {
            padding: Padding::Valid,
            stride_h: 2,
            stride_w: 2,
        })
    );
    // [output_shape, weight, input]: no bias operand.
    assert_eq!(conv.inputs.len(), 3);
    assert_eq!(conv.inputs[1], reorder.outputs[0]);
    assert_eq!(
        data(graph, conv.inputs[0]),
        &TensorData::i32_vector(vec![1, 11, 11, 2])
    );
    assert_eq!(dims(graph, conv.outputs[0]), [1, 11, 11, 2]);

    let slice = operator(graph, out.nodes[3]);
    assert_eq!(slice.inputs[0], conv.outputs[0]);
    assert_eq!(data(graph, slice.inputs[1]), &TensorData::i32_vector(vec![0, 1, 1, 0]));
    assert_eq!(data(graph, slice.inputs[2]), &TensorData::i32_vector(vec![1, 9, 9, 2]));

    let add = operator(graph, out.nodes[4]);
    assert_eq!(add.inputs, vec![slice.outputs[0], bias]);
    assert_eq!(
        add.kind,
        OpKind::Add {
            activation: Activation::None
        }
    );
    assert_eq!(dims(graph, add.outputs[0]), [1, 9, 9, 2]);

    let post = operator(graph, out.nodes[5]);
    assert_eq!(post.inputs[0], add.outputs[0]);
    assert_eq!(post.outputs[0], model.output);
    assert_eq!(graph.predecessors(model.output_node), vec![out.nodes[5]]);
}

#[test]
fn padded_deconv_without_bias() {
    let mut model = strided(None);
    let out = lower(&mut model);
    assert_eq!(
        labels(&model.graph, &out.nodes),
        ["TRANSPOSE", "TRANSPOSE", "TRANSPOSE_CONV", "SLICE", "TRANSPOSE"]
    );
}

#[test]
fn deconv1d_is_lifted() {
    let mut model = deconv_model(ConvModel::f32(
        &[1, 4, 5],
        &[4, 2, 3],
        &[1, 2, 7],
        ConvParams::new(1),
    ));
    let out = lower(&mut model);
    let graph = &model.graph;

    assert_eq!(
        labels(graph, &out.nodes),
        ["RESHAPE", "TRANSPOSE", "TRANSPOSE", "TRANSPOSE_CONV", "TRANSPOSE", "RESHAPE"]
    );
    let conv = operator(graph, out.nodes[3]);
    assert_eq!(
        data(graph, conv.inputs[0]),
        &TensorData::i32_vector(vec![1, 1, 7, 2])
    );
    assert_eq!(operator(graph, out.nodes[5]).outputs[0], model.output);
    assert_eq!(dims(graph, model.output), [1, 2, 7]);
}

#[test]
fn bias_type_must_match_output() {
    let mut model = strided(Some(TensorData::i32_vector(vec![1, 1])));
    assert!(matches!(
        try_lower(&mut model, &LowerOptions::default()),
        Err(LowerError::Precondition { op: "GENERIC_DECONV", .. })
    ));
}

#[test]
fn bias_length_checked() {
    let mut model = strided(Some(filled(&[3], 0.5)));
    let err = try_lower(&mut model, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("expected 1 or 2"));
}

#[test]
fn channel_mismatch_rejected() {
    let mut model = deconv_model(ConvModel {
        weight: Tensor::constant("w", filled(&[3, 2, 3, 3], 1.0)),
        ..ConvModel::f32(&[1, 4, 5, 5], &[4, 2, 3, 3], &[1, 2, 7, 7], ConvParams::new(2))
    });
    let err = try_lower(&mut model, &LowerOptions::default()).unwrap_err();
    assert!(err.to_string().contains("4 channels"));
}

#[test]
fn verification_can_be_skipped() {
    let opts = LowerOptions {
        verify_transpose_conv: false,
        ..Default::default()
    };
    let mut model = strided(None);
    let out = try_lower(&mut model, &opts).unwrap();
    assert_eq!(out.nodes.len(), 5);
}
