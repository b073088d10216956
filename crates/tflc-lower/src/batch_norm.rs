//! Lowering of batch normalization into scale/shift arithmetic.
//!
//! With constant running statistics, batch norm over axis 1 folds to
//! `x * scale + shift` where
//!
//! ```text
//! scale = weight / sqrt(var + eps)
//! shift = bias - weight * mean / sqrt(var + eps)
//! ```
//!
//! Quantized inputs are dequantized first and the result quantized back.

use tflc_ir::{
    Activation, BatchNorm, EdgeRestoreMap, Graph, OpKind, Operator, Scalar, Tensor, TensorData,
    TensorDesc, TensorShape,
};

use crate::factory::TensorFactory;
use crate::{LowerError, LowerOutput, emit_chain};

const OP: &str = "BATCH_NORM";

/// Folds `(weight, bias, mean, var)` into per-channel `(scale, shift)`.
pub fn fold_batch_norm(
    weight: &[f32],
    bias: &[f32],
    mean: &[f32],
    var: &[f32],
    eps: f32,
) -> (Vec<f32>, Vec<f32>) {
    weight
        .iter()
        .zip(bias)
        .zip(mean.iter().zip(var))
        .map(|((&w, &b), (&m, &v))| {
            let denom = (v + eps).sqrt();
            (w / denom, b - w * m / denom)
        })
        .unzip()
}

fn channel_values(tensor: &Tensor, channels: usize) -> Result<Vec<f32>, LowerError> {
    let data = tensor.data.as_ref().ok_or_else(|| {
        LowerError::precondition(OP, format!("'{}' must be a constant", tensor.name))
    })?;
    let values = data.as_f32().ok_or_else(|| {
        LowerError::precondition(
            OP,
            format!("'{}' must be f32, found {}", tensor.name, tensor.scalar),
        )
    })?;
    if values.len() != channels {
        return Err(LowerError::precondition(
            OP,
            format!(
                "'{}' has {} elements for {channels} channels",
                tensor.name,
                values.len()
            ),
        ));
    }
    Ok(values.iter().copied().collect())
}

/// Lowers a [`BatchNorm`] node that has been detached from `graph`.
pub fn lower_batch_norm(
    graph: &mut Graph,
    bn: BatchNorm,
    mapping: &EdgeRestoreMap,
) -> Result<LowerOutput, LowerError> {
    let x = graph.tensor(bn.input)?.clone();
    if x.rank() < 2 {
        return Err(LowerError::precondition(
            OP,
            format!("input '{}' needs a channel axis, has shape {}", x.name, x.shape),
        ));
    }
    let channels = x.shape.dims[1];

    let [weight, bias, mean, var] = [bn.weight, bn.bias, bn.running_mean, bn.running_var]
        .map(|id| graph.tensor(id).cloned());
    let weight = channel_values(&weight?, channels)?;
    let bias = channel_values(&bias?, channels)?;
    let mean = channel_values(&mean?, channels)?;
    let var = channel_values(&var?, channels)?;
    let (scale, shift) = fold_batch_norm(&weight, &bias, &mean, &var, bn.eps);

    let quantized = x.is_quantized();
    if !quantized && x.scalar != Scalar::F32 {
        return Err(LowerError::precondition(
            OP,
            format!("unquantized input '{}' must be f32, found {}", x.name, x.scalar),
        ));
    }
    let output = graph.tensor(bn.output)?;
    if quantized && !output.is_quantized() {
        return Err(LowerError::precondition(
            OP,
            format!("output '{}' of a quantized input must be quantized", output.name),
        ));
    }

    // [1, C, 1, ...] broadcasts along the channel axis.
    let mut broadcast = vec![1; x.rank()];
    broadcast[1] = channels;
    let broadcast = TensorShape::new(broadcast);
    let reshape = |values: Vec<f32>| {
        TensorData::f32_vector(values)
            .reshaped(&broadcast)
            .ok_or_else(|| LowerError::precondition(OP, "channel count does not match"))
    };
    let scale = reshape(scale)?;
    let shift = reshape(shift)?;

    let owner = output.name.clone();
    let mut factory = TensorFactory::new(graph, owner);
    let scale = factory.attribute(scale, None)?;
    let shift = factory.attribute(shift, None)?;
    let float_desc = TensorDesc::new(Scalar::F32, x.shape.clone());

    let mut chain = Vec::with_capacity(4);
    let mut operand = bn.input;
    if quantized {
        let dequantized = factory.transform(float_desc.clone(), None)?;
        chain.push(Operator::new(
            OpKind::Dequantize,
            vec![bn.input],
            vec![dequantized],
        ));
        operand = dequantized;
    }

    let scaled = factory.transform(float_desc.clone(), None)?;
    chain.push(Operator::new(
        OpKind::Mul {
            activation: Activation::None,
        },
        vec![operand, scale],
        vec![scaled],
    ));

    let shifted = if quantized {
        factory.transform(float_desc, None)?
    } else {
        bn.output
    };
    chain.push(Operator::new(
        OpKind::Add {
            activation: bn.activation,
        },
        vec![scaled, shift],
        vec![shifted],
    ));

    if quantized {
        chain.push(Operator::new(
            OpKind::Quantize,
            vec![shifted],
            vec![bn.output],
        ));
    }

    let graph = factory.into_graph();
    let nodes = emit_chain(graph, &chain, mapping)?;
    Ok(LowerOutput {
        nodes,
        diagnostics: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_identity_statistics() {
        let (scale, shift) =
            fold_batch_norm(&[1.0, 2.0], &[0.0, 1.0], &[0.0, 0.5], &[1.0, 4.0], 0.0);
        assert_eq!(scale, vec![1.0, 1.0]);
        assert_eq!(shift, vec![0.0, 0.5]);
    }

    #[test]
    fn fold_uses_eps() {
        let (scale, _) = fold_batch_norm(&[1.0], &[0.0], &[0.0], &[0.0], 0.25);
        assert_eq!(scale, vec![2.0]);
    }

    #[test]
    fn non_constant_statistics_rejected() {
        let t = Tensor::variable("mean", TensorDesc::new(Scalar::F32, [3]));
        assert!(matches!(
            channel_values(&t, 3),
            Err(LowerError::Precondition { op: "BATCH_NORM", .. })
        ));
    }

    #[test]
    fn wrong_channel_count_rejected() {
        let t = Tensor::constant("var", TensorData::f32_vector(vec![1.0; 4]));
        let err = channel_values(&t, 3).unwrap_err();
        assert!(err.to_string().contains("4 elements for 3 channels"));
    }
}
