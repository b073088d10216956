//! Lowering of generic transposed convolution into `TRANSPOSE_CONV`.
//!
//! The emitted chain, in insertion order:
//!
//! ```text
//! [reshape x] [reshape w] transpose(x) transpose(w) transpose_conv [slice] [add] transpose(y) [reshape y]
//! ```
//!
//! `TRANSPOSE_CONV` has no padding or bias operand: padding is cropped off
//! its output by a slice and bias is added afterwards.

use tflc_ir::{
    Activation, EdgeRestoreMap, GenericTransposeConv, Graph, OpKind, Operator, Padding,
    TensorDesc, TransposeConvOptions,
};

use crate::conv::{lift_to_2d, padded, shape_i32, to_i32, to_u32};
use crate::factory::TensorFactory;
use crate::layout::{permute, wrap_with_layout_transposes};
use crate::verify::verify_chain;
use crate::{LowerError, LowerOptions, LowerOutput, emit_chain};

const OP: &str = "GENERIC_DECONV";

/// `(I, O, kh, kw)` to `(O, kh, kw, I)`.
pub const DECONV_WEIGHT_PERM: [usize; 4] = [1, 2, 3, 0];

/// Lowers a [`GenericTransposeConv`] node that has been detached from `graph`.
pub fn lower_transpose_conv(
    graph: &mut Graph,
    deconv: GenericTransposeConv,
    mapping: &EdgeRestoreMap,
    opts: &LowerOptions,
) -> Result<LowerOutput, LowerError> {
    if deconv.params.groups != 1 {
        return Err(LowerError::precondition(
            OP,
            format!(
                "grouped transposed convolution ({} groups) is not supported",
                deconv.params.groups
            ),
        ));
    }
    if deconv.params.dilation.iter().any(|&d| d != 1) {
        return Err(LowerError::precondition(
            OP,
            format!(
                "dilated transposed convolution {:?} is not supported",
                deconv.params.dilation
            ),
        ));
    }

    let owner = graph.tensor(deconv.output)?.name.clone();
    let mut factory = TensorFactory::new(graph, owner);
    let lifted = lift_to_2d(
        &mut factory,
        OP,
        deconv.input,
        deconv.weight,
        deconv.output,
        &deconv.params,
    )?;
    let params = &lifted.params;

    let in_channels = factory.tensor(lifted.input)?.shape.dims[1];
    let w_dims = factory.tensor(lifted.weight)?.shape.dims.clone();
    if w_dims[0] != in_channels {
        return Err(LowerError::precondition(
            OP,
            format!(
                "input has {in_channels} channels but weight expects {}",
                w_dims[0]
            ),
        ));
    }
    let out_channels = w_dims[1];

    let conv_op = Operator::new(
        OpKind::TransposeConv(TransposeConvOptions {
            padding: Padding::Valid,
            stride_h: to_u32(OP, "stride", params.stride[0])?,
            stride_w: to_u32(OP, "stride", params.stride[1])?,
        }),
        vec![lifted.weight, lifted.input],
        vec![lifted.output],
    );
    // Slot 0 is the weight; the data input is slot 1.
    let mut ops = wrap_with_layout_transposes(&mut factory, OP, vec![conv_op], 1, 0)?;
    let conv_pos = 1;

    let nhwc_out = ops[conv_pos].outputs[0];
    let t = factory.tensor(nhwc_out)?;
    let (scalar, nhwc_shape, quantization) = (t.scalar, t.shape.clone(), t.quantization.clone());

    let mut full_shape = nhwc_shape.clone();
    if params.has_padding() {
        let (ph, pw) = (params.padding[0], params.padding[1]);
        full_shape.dims[1] = padded(OP, full_shape.dims[1], ph)?;
        full_shape.dims[2] = padded(OP, full_shape.dims[2], pw)?;
        let begin = vec![0, to_i32(OP, "padding", ph)?, to_i32(OP, "padding", pw)?, 0];
        let begin = factory.i32_attribute(begin)?;
        let size = factory.i32_attribute(shape_i32(OP, &nhwc_shape)?)?;
        let uncropped =
            factory.transform(TensorDesc::new(scalar, full_shape.clone()), quantization)?;

        ops[conv_pos].outputs[0] = uncropped;
        ops.insert(
            conv_pos + 1,
            Operator::new(OpKind::Slice, vec![uncropped, begin, size], vec![nhwc_out]),
        );
    }

    let output_shape = factory.i32_attribute(shape_i32(OP, &full_shape)?)?;
    ops[conv_pos].inputs.insert(0, output_shape);

    let (reorder, reordered) = permute(&mut factory, OP, lifted.weight, &DECONV_WEIGHT_PERM)?;
    ops[conv_pos].inputs[1] = reordered;
    ops.insert(conv_pos, reorder);

    if let Some(bias) = deconv.bias {
        let b = factory.tensor(bias)?;
        let len = b.shape.num_elements();
        if len != 1 && len != out_channels {
            return Err(LowerError::precondition(
                OP,
                format!(
                    "bias '{}' has {len} elements, expected 1 or {out_channels}",
                    b.name
                ),
            ));
        }
        if b.scalar != scalar {
            return Err(LowerError::precondition(
                OP,
                format!("bias '{}' is {} but the output is {scalar}", b.name, b.scalar),
            ));
        }

        // The op feeding the trailing transpose now feeds the add instead.
        let tail = ops.len() - 2;
        let biased = ops[tail].outputs[0];
        let t = factory.tensor(biased)?;
        let (desc, quantization) = (t.desc(), t.quantization.clone());
        let unbiased = factory.transform(desc, quantization)?;
        ops[tail].outputs[0] = unbiased;
        ops.insert(
            tail + 1,
            Operator::new(
                OpKind::Add {
                    activation: Activation::None,
                },
                vec![unbiased, bias],
                vec![biased],
            ),
        );
    }

    let chain: Vec<Operator> = lifted
        .before
        .into_iter()
        .chain(ops)
        .chain(lifted.after)
        .collect();

    let graph = factory.into_graph();
    let nodes = emit_chain(graph, &chain, mapping)?;
    if opts.verify_transpose_conv {
        verify_chain(graph, &chain)?;
    }

    Ok(LowerOutput {
        nodes,
        diagnostics: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tflc_ir::{ConvParams, Scalar, Tensor, TensorData, TensorShape};

    fn deconv_graph(params: ConvParams) -> (Graph, GenericTransposeConv) {
        let mut graph = Graph::new();
        let input = graph
            .add_input(Tensor::variable("x", TensorDesc::new(Scalar::F32, [1, 4, 5, 5])))
            .unwrap();
        let weight = graph
            .add_tensor(Tensor::constant(
                "w",
                TensorData::f32_vector(vec![1.0; 4 * 2 * 3 * 3])
                    .reshaped(&TensorShape::from([4, 2, 3, 3]))
                    .unwrap(),
            ))
            .unwrap();
        let output = graph
            .add_tensor(Tensor::variable("y", TensorDesc::new(Scalar::F32, [1, 2, 7, 7])))
            .unwrap();
        let deconv = GenericTransposeConv {
            input,
            weight,
            bias: None,
            output,
            params,
        };
        (graph, deconv)
    }

    fn run(graph: &mut Graph, deconv: GenericTransposeConv) -> Result<LowerOutput, LowerError> {
        let id = graph.add_transformable(deconv.clone().into()).unwrap();
        let (_, mapping) = graph.detach_node(id).unwrap();
        lower_transpose_conv(graph, deconv, &mapping, &LowerOptions::default())
    }

    #[test]
    fn groups_rejected() {
        let (mut graph, deconv) = deconv_graph(ConvParams::new(2).with_groups(2));
        assert!(matches!(
            run(&mut graph, deconv),
            Err(LowerError::Precondition { op: "GENERIC_DECONV", .. })
        ));
    }

    #[test]
    fn dilation_rejected() {
        let (mut graph, deconv) = deconv_graph(ConvParams::new(2).with_dilation([2, 2]));
        assert!(matches!(
            run(&mut graph, deconv),
            Err(LowerError::Precondition { .. })
        ));
    }

    #[test]
    fn overflowing_padding_rejected() {
        let (mut graph, deconv) = deconv_graph(ConvParams::new(2).with_padding([0, usize::MAX]));
        let err = run(&mut graph, deconv).unwrap_err();
        assert!(matches!(err, LowerError::Precondition { op: "GENERIC_DECONV", .. }));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn unpadded_chain() {
        let (mut graph, deconv) = deconv_graph(ConvParams::new(2));
        let out = run(&mut graph, deconv).unwrap();
        let labels: Vec<&str> = out
            .nodes
            .iter()
            .map(|&id| graph.node(id).unwrap().kind.label())
            .collect();
        assert_eq!(labels, ["TRANSPOSE", "TRANSPOSE", "TRANSPOSE_CONV", "TRANSPOSE"]);

        let conv = graph.node(out.nodes[2]).unwrap().as_operator().unwrap();
        let shape = graph.tensor(conv.inputs[0]).unwrap();
        assert_eq!(shape.data, Some(TensorData::i32_vector(vec![1, 7, 7, 2])));
    }
}
