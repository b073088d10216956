//! Single-node graphs built from command-line shapes.

use miette::{IntoDiagnostic, miette};
use ndarray::{ArrayD, IxDyn};
use tflc_ir::{
    Activation, BatchNorm, ConvParams, GenericConv, GenericTransposeConv, Graph, NodeId,
    QuantizationParams, Scalar, Tensor, TensorData, TensorDesc, TensorShape,
};

use crate::{BatchNormArgs, ConvArgs};

/// A graph holding one transformable node between a model input and output.
pub struct Fixture {
    pub graph: Graph,
    pub node: NodeId,
}

const INPUT_SCALE: f32 = 0.05;
const WEIGHT_SCALE: f32 = 0.02;
const OUTPUT_SCALE: f32 = 0.1;

/// Expands a per-axis CLI value list: empty means `default`, one value
/// applies to every spatial axis.
fn per_axis(
    values: &[usize],
    spatial: usize,
    default: usize,
    flag: &str,
) -> miette::Result<Vec<usize>> {
    match values {
        [] => Ok(vec![default; spatial]),
        [v] => Ok(vec![*v; spatial]),
        _ if values.len() == spatial => Ok(values.to_vec()),
        _ => Err(miette!(
            "--{flag} has {} values for {spatial} spatial axes",
            values.len()
        )),
    }
}

/// Output shape of a (transposed) convolution, channel-first.
fn conv_output_shape(
    input: &[usize],
    weight: &[usize],
    params: &ConvParams,
    transposed: bool,
) -> miette::Result<Vec<usize>> {
    let out_channels = if transposed {
        weight[1] * params.groups
    } else {
        weight[0]
    };
    let mut shape = vec![input[0], out_channels];
    for axis in 0..input.len() - 2 {
        let (x, k) = (input[axis + 2], weight[axis + 2]);
        let (s, p, d) = (params.stride[axis], params.padding[axis], params.dilation[axis]);
        let span = d * k.saturating_sub(1) + 1;
        let size = if transposed {
            let full = x.saturating_sub(1) * s + span + params.output_padding[axis];
            full.checked_sub(2 * p).filter(|&n| n > 0)
        } else {
            (x + 2 * p)
                .checked_sub(span)
                .filter(|_| s > 0)
                .map(|n| n / s + 1)
        };
        let size = size.ok_or_else(|| {
            miette!("spatial axis {axis}: size {x} with kernel {k} leaves no output")
        })?;
        shape.push(size);
    }
    Ok(shape)
}

/// A bufferless f32 tensor, or an int8 one with per-tensor `scale`.
fn variable(name: &str, dims: &[usize], quantized: bool, scale: f32) -> Tensor {
    let (scalar, quantization) = if quantized {
        (Scalar::I8, Some(QuantizationParams::per_tensor(scale, 0)))
    } else {
        (Scalar::F32, None)
    };
    Tensor::variable(name, TensorDesc::new(scalar, TensorShape::new(dims)))
        .with_quantization(quantization)
}

pub fn conv(args: &ConvArgs, transposed: bool) -> miette::Result<Fixture> {
    let rank = args.input.len();
    if rank < 3 || args.weight.len() != rank {
        return Err(miette!(
            "input {:?} and weight {:?} must have the same rank, at least 3",
            args.input,
            args.weight
        ));
    }
    let spatial = rank - 2;
    let params = ConvParams::new(spatial)
        .with_stride(per_axis(&args.stride, spatial, 1, "stride")?)
        .with_padding(per_axis(&args.padding, spatial, 0, "padding")?)
        .with_dilation(per_axis(&args.dilation, spatial, 1, "dilation")?)
        .with_output_padding(per_axis(&args.output_padding, spatial, 0, "output-padding")?)
        .with_groups(args.groups);
    let out_dims = conv_output_shape(&args.input, &args.weight, &params, transposed)?;

    let mut graph = Graph::new();
    let x = variable("x", &args.input, args.quantized, INPUT_SCALE);
    let input = graph.add_input(x).into_diagnostic()?;

    let weight_dims = IxDyn(&args.weight);
    let weight = if args.quantized {
        let channels = args.weight[0];
        Tensor::constant("weight", TensorData::I8(ArrayD::from_elem(weight_dims, 1)))
            .with_quantization(Some(QuantizationParams::per_axis(
                vec![WEIGHT_SCALE; channels],
                vec![0; channels],
                0,
            )))
    } else {
        Tensor::constant("weight", TensorData::F32(ArrayD::from_elem(weight_dims, 0.1)))
    };
    let weight = graph.add_tensor(weight).into_diagnostic()?;

    let out_channels = out_dims[1];
    let bias = if args.bias {
        let data = match (args.quantized, transposed) {
            (false, _) => TensorData::f32_vector(vec![0.5; out_channels]),
            // Added to the int8 output after the transposed convolution.
            (true, true) => TensorData::I8(ArrayD::from_elem(IxDyn(&[out_channels]), 1)),
            (true, false) => TensorData::i32_vector(vec![10; out_channels]),
        };
        let quantization = args.quantized.then(|| {
            let scale = if transposed {
                OUTPUT_SCALE
            } else {
                INPUT_SCALE * WEIGHT_SCALE
            };
            QuantizationParams::per_tensor(scale, 0)
        });
        let bias = Tensor::constant("bias", data).with_quantization(quantization);
        Some(graph.add_tensor(bias).into_diagnostic()?)
    } else {
        None
    };

    let y = variable("y", &out_dims, args.quantized, OUTPUT_SCALE);
    let output = graph.add_tensor(y).into_diagnostic()?;

    let op = if transposed {
        GenericTransposeConv {
            input,
            weight,
            bias,
            output,
            params,
        }
        .into()
    } else {
        GenericConv {
            input,
            weight,
            bias,
            output,
            params,
            activation: Activation::None,
        }
        .into()
    };
    let node = graph.add_transformable(op).into_diagnostic()?;
    graph.mark_output(output).into_diagnostic()?;
    Ok(Fixture { graph, node })
}

pub fn batch_norm(args: &BatchNormArgs) -> miette::Result<Fixture> {
    let Some(&channels) = args.input.get(1) else {
        return Err(miette!("input {:?} has no channel axis", args.input));
    };

    let mut graph = Graph::new();
    let x = variable("x", &args.input, args.quantized, INPUT_SCALE);
    let input = graph.add_input(x).into_diagnostic()?;

    let mut stat = |name: &str, value: f32| {
        let data = TensorData::f32_vector(vec![value; channels]);
        graph.add_tensor(Tensor::constant(name, data)).into_diagnostic()
    };
    let weight = stat("bn.weight", 1.0)?;
    let bias = stat("bn.bias", 0.0)?;
    let running_mean = stat("bn.running_mean", 0.0)?;
    let running_var = stat("bn.running_var", 1.0)?;

    let y = variable("y", &args.input, args.quantized, OUTPUT_SCALE);
    let output = graph.add_tensor(y).into_diagnostic()?;

    let bn = BatchNorm {
        input,
        weight,
        bias,
        running_mean,
        running_var,
        output,
        eps: args.eps,
        activation: Activation::None,
    };
    let node = graph.add_transformable(bn.into()).into_diagnostic()?;
    graph.mark_output(output).into_diagnostic()?;
    Ok(Fixture { graph, node })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_shape_with_padding() {
        let params = ConvParams::new(2).with_padding([1, 1]);
        let shape = conv_output_shape(&[1, 3, 8, 8], &[4, 3, 3, 3], &params, false).unwrap();
        assert_eq!(shape, vec![1, 4, 8, 8]);
    }

    #[test]
    fn deconv_shape_with_stride() {
        let params = ConvParams::new(2).with_stride([2, 2]).with_padding([1, 1]);
        let shape = conv_output_shape(&[1, 4, 5, 5], &[4, 2, 3, 3], &params, true).unwrap();
        // (5 - 1) * 2 + 3 - 2 = 9
        assert_eq!(shape, vec![1, 2, 9, 9]);
    }

    #[test]
    fn kernel_larger_than_input() {
        let params = ConvParams::new(1);
        assert!(conv_output_shape(&[1, 1, 2], &[1, 1, 5], &params, false).is_err());
    }

    #[test]
    fn per_axis_expansion() {
        assert_eq!(per_axis(&[], 2, 1, "stride").unwrap(), vec![1, 1]);
        assert_eq!(per_axis(&[3], 2, 1, "stride").unwrap(), vec![3, 3]);
        assert!(per_axis(&[1, 2, 3], 2, 1, "stride").is_err());
    }
}
