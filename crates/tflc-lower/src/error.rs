//! Error types for the lowering stage.

use tflc_ir::GraphError;

/// Errors that abort a single lowering call.
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    /// The node handed to the lowering is malformed or unsupported.
    #[error("{op}: {reason}")]
    Precondition { op: &'static str, reason: String },

    /// The emitted subgraph is malformed; this is a bug in the lowering.
    #[error("internal consistency fault at '{tensor}': {reason}")]
    InternalConsistency { tensor: String, reason: String },

    /// The graph container rejected an insertion or rewiring.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl LowerError {
    pub(crate) fn precondition(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Precondition {
            op,
            reason: reason.into(),
        }
    }
}
