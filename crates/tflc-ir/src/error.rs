//! Error types for the graph container.

use crate::graph::{NodeId, TensorId};

/// Errors that can occur when building or rewiring a [`Graph`](crate::Graph).
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A tensor id does not refer to a registered tensor.
    #[error("unknown tensor {0}")]
    UnknownTensor(TensorId),

    /// A node id does not refer to a live node.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A tensor with this name is already registered.
    #[error("tensor name '{name}' is already in use")]
    DuplicateTensor { name: String },

    /// The tensor already has a producer; each tensor has at most one.
    #[error("tensor '{tensor}' is already produced by node '{node}'")]
    DuplicateProducer { tensor: String, node: String },

    /// Operand count does not match the operator contract.
    #[error("{op}: expected {expected} {what}, found {found}")]
    ArityMismatch {
        op: &'static str,
        what: &'static str,
        expected: String,
        found: usize,
    },

    /// Element types do not match the operator contract.
    #[error("{op}: {detail}")]
    TypeMismatch { op: &'static str, detail: String },

    /// A successor edge could not be reattached to a live producer.
    #[error("cannot restore edge to '{node}': tensor '{tensor}' has no live producer")]
    UnresolvedEdge { tensor: String, node: String },

    /// The graph is not a DAG.
    #[error("graph contains a cycle ({visited} of {total} nodes ordered)")]
    Cycle { visited: usize, total: usize },
}
