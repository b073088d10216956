//! Channel-first to channel-last layout conversion.

use tflc_ir::{OpKind, Operator, TensorDesc, TensorId};

use crate::LowerError;
use crate::factory::TensorFactory;

/// Permutation taking `(N, C, H, W)` to `(N, H, W, C)`.
pub const NCHW_TO_NHWC: [usize; 4] = [0, 2, 3, 1];

/// Permutation taking `(N, H, W, C)` to `(N, C, H, W)`.
pub const NHWC_TO_NCHW: [usize; 4] = [0, 3, 1, 2];

fn perm_i32(perm: &[usize]) -> Vec<i32> {
    perm.iter().map(|&p| p as i32).collect()
}

/// Wraps a channel-first chain with layout transposes.
///
/// `ops[0].inputs[input_idx]` is replaced by a channel-last copy produced by
/// a leading transpose, and `ops.last().outputs[output_idx]` by a
/// channel-last tensor that a trailing transpose converts back. The
/// original tensors end up outside the chain, untouched.
///
/// Returns `[pre, ops..., post]`. Failures are reported against `op`, the
/// lowering that requested the wrap.
pub fn wrap_with_layout_transposes(
    factory: &mut TensorFactory<'_>,
    op: &'static str,
    mut ops: Vec<Operator>,
    input_idx: usize,
    output_idx: usize,
) -> Result<Vec<Operator>, LowerError> {
    let orig_input = ops
        .first()
        .and_then(|first| first.inputs.get(input_idx))
        .copied()
        .ok_or_else(|| LowerError::precondition(op, format!("chain has no input {input_idx}")))?;
    let orig_output = ops
        .last()
        .and_then(|last| last.outputs.get(output_idx))
        .copied()
        .ok_or_else(|| {
            LowerError::precondition(op, format!("chain has no output {output_idx}"))
        })?;

    let to_nchw = factory.i32_attribute(perm_i32(&NHWC_TO_NCHW))?;
    let to_nhwc = factory.i32_attribute(perm_i32(&NCHW_TO_NHWC))?;
    let new_input = channel_last_copy(factory, op, orig_input)?;
    let new_output = channel_last_copy(factory, op, orig_output)?;

    if let Some(first) = ops.first_mut() {
        first.inputs[input_idx] = new_input;
    }
    if let Some(last) = ops.last_mut() {
        last.outputs[output_idx] = new_output;
    }

    let pre = Operator::new(OpKind::Transpose, vec![orig_input, to_nhwc], vec![new_input]);
    let post = Operator::new(OpKind::Transpose, vec![new_output, to_nchw], vec![orig_output]);

    let mut chain = Vec::with_capacity(ops.len() + 2);
    chain.push(pre);
    chain.extend(ops);
    chain.push(post);
    Ok(chain)
}

/// A bufferless channel-last counterpart of a channel-first tensor.
fn channel_last_copy(
    factory: &mut TensorFactory<'_>,
    op: &'static str,
    tensor: TensorId,
) -> Result<TensorId, LowerError> {
    let t = factory.tensor(tensor)?;
    let shape = t.shape.permuted(&NCHW_TO_NHWC).ok_or_else(|| {
        LowerError::precondition(
            op,
            format!("expected a 4-D channel-first tensor, '{}' has shape {}", t.name, t.shape),
        )
    })?;
    let desc = TensorDesc::new(t.scalar, shape);
    let quantization = t.quantization.as_ref().map(|q| q.permuted(&NCHW_TO_NHWC));
    factory.transform(desc, quantization)
}

/// Emits a transpose of `source` by `perm`, returning the operator and the
/// permuted tensor it produces.
///
/// Per-axis quantization follows the permuted axis.
pub fn permute(
    factory: &mut TensorFactory<'_>,
    op: &'static str,
    source: TensorId,
    perm: &[usize],
) -> Result<(Operator, TensorId), LowerError> {
    let perm_attr = factory.i32_attribute(perm_i32(perm))?;
    let t = factory.tensor(source)?;
    let shape = t.shape.permuted(perm).ok_or_else(|| {
        LowerError::precondition(
            op,
            format!("permutation {perm:?} does not fit '{}' of shape {}", t.name, t.shape),
        )
    })?;
    let desc = TensorDesc::new(t.scalar, shape);
    let quantization = t.quantization.as_ref().map(|q| q.permuted(perm));
    let out = factory.transform(desc, quantization)?;
    Ok((
        Operator::new(OpKind::Transpose, vec![source, perm_attr], vec![out]),
        out,
    ))
}
