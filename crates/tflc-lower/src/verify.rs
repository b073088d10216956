//! Structural check of an emitted chain.

use tflc_ir::{Graph, Operator};

use crate::LowerError;

/// Checks that every operator of `chain` but the last feeds a node.
///
/// Each intermediate output must be produced by a live node with at least
/// one outgoing edge, and its first consumer must not be a constant node.
/// A failure means the lowering left a dangling or wrongly folded
/// intermediate behind.
pub fn verify_chain(graph: &Graph, chain: &[Operator]) -> Result<(), LowerError> {
    let Some((_, intermediates)) = chain.split_last() else {
        return Ok(());
    };

    for op in intermediates {
        let Some(&output) = op.outputs.first() else {
            continue;
        };
        let name = &graph.tensor(output)?.name;
        let fault = |reason: &str| LowerError::InternalConsistency {
            tensor: name.clone(),
            reason: reason.to_string(),
        };

        let node = graph
            .tensor_node(name)
            .ok_or_else(|| fault("no node produces this intermediate"))?;
        if graph.out_degree(node) == 0 {
            return Err(fault("intermediate has no consumer"));
        }
        let consumer = graph.successors(node)[0];
        if graph.node(consumer).is_some_and(|n| n.is_constant()) {
            return Err(fault("intermediate feeds a constant node"));
        }
    }
    Ok(())
}
