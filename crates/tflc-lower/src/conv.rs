//! Lowering of generic convolution into `CONV_2D` / `DEPTHWISE_CONV_2D`.
//!
//! The emitted chain, in insertion order:
//!
//! ```text
//! [reshape x] [reshape w] transpose(x) [pad] transpose(w) conv transpose(y) [reshape y]
//! ```
//!
//! The reshapes only appear for 1-D convolutions, which are lifted to 2-D by
//! a unit spatial axis at position 2.

use ndarray::arr2;
use tflc_ir::{
    Conv2dOptions, ConvParams, DepthwiseConv2dOptions, EdgeRestoreMap, GenericConv, Graph, OpKind,
    Operator, Padding, QuantizationParams, Scalar, TensorData, TensorDesc, TensorId, TensorShape,
};

use crate::factory::TensorFactory;
use crate::layout::{permute, wrap_with_layout_transposes};
use crate::verify::verify_chain;
use crate::{Diagnostic, DiagnosticLevel, LowerError, LowerOptions, LowerOutput, emit_chain};

const OP: &str = "GENERIC_CONV";

/// Axis at which 1-D tensors gain their unit spatial axis.
const LIFTED_AXIS: usize = 2;

/// `(O, I, kh, kw)` to `(O, kh, kw, I)`.
pub const CONV_WEIGHT_PERM: [usize; 4] = [0, 2, 3, 1];

/// `(O, 1, kh, kw)` to `(1, kh, kw, O)`.
pub const DEPTHWISE_WEIGHT_PERM: [usize; 4] = [1, 2, 3, 0];

/// Convolution operands after lifting to 2-D.
pub(crate) struct Lifted {
    pub input: TensorId,
    pub weight: TensorId,
    pub output: TensorId,
    pub params: ConvParams,
    /// Reshapes to run ahead of the convolution.
    pub before: Vec<Operator>,
    /// Reshape restoring the original output rank.
    pub after: Vec<Operator>,
}

/// Checks operand ranks and lifts a 1-D (rank-3) convolution to 2-D.
///
/// A constant weight is lifted into a new attribute tensor; a bufferless
/// one gets a reshape like the input.
pub(crate) fn lift_to_2d(
    factory: &mut TensorFactory<'_>,
    op: &'static str,
    input: TensorId,
    weight: TensorId,
    output: TensorId,
    params: &ConvParams,
) -> Result<Lifted, LowerError> {
    let in_rank = factory.tensor(input)?.rank();
    let w_rank = factory.tensor(weight)?.rank();
    let out_rank = factory.tensor(output)?.rank();

    if !matches!(in_rank, 3 | 4) || !matches!(w_rank, 3 | 4) {
        return Err(LowerError::precondition(
            op,
            format!(
                "only 1-D/2-D convolution is supported, got input rank {in_rank} and weight rank {w_rank}"
            ),
        ));
    }
    if in_rank != w_rank || in_rank != out_rank {
        return Err(LowerError::precondition(
            op,
            format!("input, weight and output ranks differ ({in_rank}, {w_rank}, {out_rank})"),
        ));
    }

    let spatial = in_rank - 2;
    for (what, values) in [
        ("stride", &params.stride),
        ("padding", &params.padding),
        ("dilation", &params.dilation),
    ] {
        if values.len() != spatial {
            return Err(LowerError::precondition(
                op,
                format!(
                    "{what} has {} entries for {spatial} spatial axes",
                    values.len()
                ),
            ));
        }
    }
    for (what, values) in [("stride", &params.stride), ("dilation", &params.dilation)] {
        if values.contains(&0) {
            return Err(LowerError::precondition(
                op,
                format!("{what} {values:?} must be at least 1 on every axis"),
            ));
        }
    }

    if in_rank == 4 {
        return Ok(Lifted {
            input,
            weight,
            output,
            params: params.clone(),
            before: Vec::new(),
            after: Vec::new(),
        });
    }

    let mut before = Vec::new();
    let input = expand(factory, op, input, &mut before)?;
    let weight = if factory.tensor(weight)?.is_constant() {
        lift_constant(factory, op, weight)?
    } else {
        expand(factory, op, weight, &mut before)?
    };

    let out = factory.tensor(output)?;
    let out_shape = out.shape.clone();
    let desc = TensorDesc::new(out.scalar, out.shape.with_axis_inserted(LIFTED_AXIS));
    let quantization = out
        .quantization
        .as_ref()
        .map(|q| q.with_axis_inserted(LIFTED_AXIS));
    let name = format!("{}_4d_output", factory.owner());
    let output4 = factory.named_transform(name, desc, quantization)?;
    let after = vec![reshape(factory, op, output4, &out_shape, output)?];

    Ok(Lifted {
        input,
        weight,
        output: output4,
        params: params.lifted(),
        before,
        after,
    })
}

/// `value` as an `i32` operand.
pub(crate) fn to_i32(op: &'static str, what: &str, value: usize) -> Result<i32, LowerError> {
    i32::try_from(value)
        .map_err(|_| LowerError::precondition(op, format!("{what} {value} does not fit in i32")))
}

/// `value` as a `u32` builtin option.
pub(crate) fn to_u32(op: &'static str, what: &str, value: usize) -> Result<u32, LowerError> {
    u32::try_from(value)
        .map_err(|_| LowerError::precondition(op, format!("{what} {value} does not fit in u32")))
}

/// Dims of `shape` as an `i32` shape operand.
pub(crate) fn shape_i32(op: &'static str, shape: &TensorShape) -> Result<Vec<i32>, LowerError> {
    shape
        .to_i32()
        .ok_or_else(|| LowerError::precondition(op, format!("shape {shape} does not fit in i32")))
}

/// `dim` grown by `pad` on both sides.
pub(crate) fn padded(op: &'static str, dim: usize, pad: usize) -> Result<usize, LowerError> {
    pad.checked_mul(2)
        .and_then(|both| dim.checked_add(both))
        .ok_or_else(|| {
            LowerError::precondition(op, format!("padding {pad} overflows a dimension of {dim}"))
        })
}

/// Emits a reshape of `source` into `dest`, which must have `shape`.
fn reshape(
    factory: &mut TensorFactory<'_>,
    op: &'static str,
    source: TensorId,
    shape: &TensorShape,
    dest: TensorId,
) -> Result<Operator, LowerError> {
    let new_shape = shape_i32(op, shape)?;
    let shape_attr = factory.i32_attribute(new_shape.clone())?;
    Ok(Operator::new(
        OpKind::Reshape { new_shape },
        vec![source, shape_attr],
        vec![dest],
    ))
}

/// Reshapes a bufferless rank-3 tensor to rank 4, pushing the reshape to `ops`.
fn expand(
    factory: &mut TensorFactory<'_>,
    op: &'static str,
    tensor: TensorId,
    ops: &mut Vec<Operator>,
) -> Result<TensorId, LowerError> {
    let t = factory.tensor(tensor)?;
    let shape = t.shape.with_axis_inserted(LIFTED_AXIS);
    let desc = TensorDesc::new(t.scalar, shape.clone());
    let quantization = t
        .quantization
        .as_ref()
        .map(|q| q.with_axis_inserted(LIFTED_AXIS));
    let name = format!("{}_{}_4d_input", factory.owner(), t.name);
    let expanded = factory.named_transform(name, desc, quantization)?;
    ops.push(reshape(factory, op, tensor, &shape, expanded)?);
    Ok(expanded)
}

fn lift_constant(
    factory: &mut TensorFactory<'_>,
    op: &'static str,
    tensor: TensorId,
) -> Result<TensorId, LowerError> {
    let t = factory.tensor(tensor)?;
    let shape = t.shape.with_axis_inserted(LIFTED_AXIS);
    let data = t
        .data
        .as_ref()
        .and_then(|d| d.reshaped(&shape))
        .ok_or_else(|| {
            LowerError::precondition(op, format!("buffer of '{}' does not match its shape", t.name))
        })?;
    let quantization = t
        .quantization
        .as_ref()
        .map(|q| q.with_axis_inserted(LIFTED_AXIS));
    let name = format!("{}_{}_4d_input", factory.owner(), t.name);
    factory.named_attribute(name, data, quantization)
}

/// Lowers a [`GenericConv`] node that has been detached from `graph`.
pub fn lower_conv(
    graph: &mut Graph,
    conv: GenericConv,
    mapping: &EdgeRestoreMap,
    opts: &LowerOptions,
) -> Result<LowerOutput, LowerError> {
    if conv.params.groups == 0 {
        return Err(LowerError::precondition(OP, "group count must be at least 1"));
    }

    let owner = graph.tensor(conv.output)?.name.clone();
    let mut factory = TensorFactory::new(graph, owner);
    let lifted = lift_to_2d(
        &mut factory,
        OP,
        conv.input,
        conv.weight,
        conv.output,
        &conv.params,
    )?;
    let params = &lifted.params;

    let x = factory.tensor(lifted.input)?;
    let (in_channels, input_scalar, input_quant) =
        (x.shape.dims[1], x.scalar, x.quantization.clone());
    let w = factory.tensor(lifted.weight)?;
    let (out_channels, group_width, weight_quant) =
        (w.shape.dims[0], w.shape.dims[1], w.quantization.clone());
    let groups = params.groups;

    if in_channels != group_width * groups {
        return Err(LowerError::precondition(
            OP,
            format!(
                "input has {in_channels} channels but weight expects {group_width} per group over {groups} groups"
            ),
        ));
    }

    let (stride_h, stride_w) = (
        to_u32(OP, "stride", params.stride[0])?,
        to_u32(OP, "stride", params.stride[1])?,
    );
    let (dilation_h_factor, dilation_w_factor) = (
        to_u32(OP, "dilation", params.dilation[0])?,
        to_u32(OP, "dilation", params.dilation[1])?,
    );

    let mut diagnostics = Vec::new();
    let depthwise = group_width == 1 && out_channels == groups;
    let kind = if depthwise {
        OpKind::DepthwiseConv2d(DepthwiseConv2dOptions {
            padding: Padding::Valid,
            stride_h,
            stride_w,
            depth_multiplier: 1,
            dilation_h_factor,
            dilation_w_factor,
            activation: conv.activation,
        })
    } else {
        if in_channels != group_width {
            let message = format!(
                "'{}': grouped convolution ({groups} groups) is not supported by every TFLite runtime",
                factory.owner()
            );
            if opts.deny_grouped_conv {
                return Err(LowerError::precondition(OP, message));
            }
            log::warn!("{message}");
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warning,
                message,
            });
        }
        OpKind::Conv2d(Conv2dOptions {
            padding: Padding::Valid,
            stride_h,
            stride_w,
            dilation_h_factor,
            dilation_w_factor,
            activation: conv.activation,
        })
    };

    let conv_op = Operator::new(kind, vec![lifted.input, lifted.weight], vec![lifted.output]);
    let mut ops = wrap_with_layout_transposes(&mut factory, OP, vec![conv_op], 0, 0)?;

    if params.has_padding() {
        let (ph, pw) = (params.padding[0], params.padding[1]);
        let pad_input = ops[0].outputs[0];
        let t = factory.tensor(pad_input)?;
        let mut dims = t.shape.dims.clone();
        dims[1] = padded(OP, dims[1], ph)?;
        dims[2] = padded(OP, dims[2], pw)?;
        let (ph, pw) = (to_i32(OP, "padding", ph)?, to_i32(OP, "padding", pw)?);
        let desc = TensorDesc::new(t.scalar, TensorShape::new(dims));
        let quantization = t.quantization.clone();
        let pad_out = factory.transform(desc, quantization)?;
        let pads = arr2(&[[0, 0], [ph, ph], [pw, pw], [0, 0]]);
        let pads = factory.attribute(TensorData::I32(pads.into_dyn()), None)?;

        ops[1].inputs[0] = pad_out;
        ops.insert(
            1,
            Operator::new(OpKind::Pad, vec![pad_input, pads], vec![pad_out]),
        );
    }

    // Conv sits just before the trailing transpose.
    let conv_pos = ops.len() - 2;
    let perm: &[usize] = if depthwise {
        &DEPTHWISE_WEIGHT_PERM
    } else {
        &CONV_WEIGHT_PERM
    };
    let (reorder, reordered) = permute(&mut factory, OP, lifted.weight, perm)?;
    ops[conv_pos].inputs[1] = reordered;
    ops.insert(conv_pos, reorder);
    let conv_pos = conv_pos + 1;

    let bias = conv_bias(
        &mut factory,
        conv.bias,
        out_channels,
        input_scalar,
        input_quant.as_ref(),
        weight_quant.as_ref(),
    )?;
    ops[conv_pos].inputs.push(bias);

    let chain: Vec<Operator> = lifted
        .before
        .into_iter()
        .chain(ops)
        .chain(lifted.after)
        .collect();

    let graph = factory.into_graph();
    let nodes = emit_chain(graph, &chain, mapping)?;
    verify_chain(graph, &chain)?;

    Ok(LowerOutput { nodes, diagnostics })
}

/// The bias operand of the convolution: the supplied one, a broadcast of a
/// single-element one, or zeros.
fn conv_bias(
    factory: &mut TensorFactory<'_>,
    bias: Option<TensorId>,
    out_channels: usize,
    input_scalar: Scalar,
    input_quant: Option<&QuantizationParams>,
    weight_quant: Option<&QuantizationParams>,
) -> Result<TensorId, LowerError> {
    let Some(bias) = bias else {
        let data = if input_scalar.is_float() {
            TensorData::f32_vector(vec![0.0; out_channels])
        } else {
            TensorData::i32_vector(vec![0; out_channels])
        };
        let quantization = match (input_quant, weight_quant) {
            (Some(iq), Some(wq)) if !input_scalar.is_float() => Some(bias_quantization(iq, wq)),
            _ => None,
        };
        return factory.attribute(data, quantization);
    };

    let b = factory.tensor(bias)?;
    let len = b.shape.num_elements();
    if len == out_channels {
        return Ok(bias);
    }
    if len != 1 {
        return Err(LowerError::precondition(
            OP,
            format!(
                "bias '{}' has {len} elements, expected 1 or {out_channels}",
                b.name
            ),
        ));
    }
    let data = b
        .data
        .as_ref()
        .and_then(|d| d.repeat_first(out_channels))
        .ok_or_else(|| {
            LowerError::precondition(
                OP,
                format!("single-element bias '{}' must be constant to broadcast", b.name),
            )
        })?;
    let quantization = b.quantization.clone();
    factory.attribute(data, quantization)
}

/// Bias scale is `input_scale * weight_scale`, per weight channel when the
/// weight is quantized per axis. Zero points are 0.
fn bias_quantization(input: &QuantizationParams, weight: &QuantizationParams) -> QuantizationParams {
    let input_scale = input.scales.first().copied().unwrap_or(1.0);
    let scales: Vec<f32> = weight.scales.iter().map(|s| s * input_scale).collect();
    let zero_points = vec![0; scales.len()];
    if weight.is_per_axis() {
        QuantizationParams::per_axis(scales, zero_points, 0)
    } else {
        QuantizationParams {
            scales,
            zero_points,
            axis: None,
        }
    }
}
