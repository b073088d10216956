//! Lowering of high-level model nodes into TFLite primitives.
//!
//! Each [`TransformableOp`] variant has one lowering that replaces the
//! detached node with a chain of primitive [`Operator`]s and reattaches the
//! surrounding edges. [`lower`] dispatches on the variant; [`lower_graph`]
//! lowers every transformable node of a graph in topological order.
//!
//! Lowerings mutate the graph and must run one at a time.

mod batch_norm;
mod conv;
mod deconv;
mod error;
pub mod factory;
pub mod layout;
mod verify;

use std::fmt;

pub use batch_norm::{fold_batch_norm, lower_batch_norm};
pub use conv::{CONV_WEIGHT_PERM, DEPTHWISE_WEIGHT_PERM, lower_conv};
pub use deconv::{DECONV_WEIGHT_PERM, lower_transpose_conv};
pub use error::LowerError;
pub use verify::verify_chain;

use tflc_ir::{EdgeRestoreMap, Graph, GraphError, NodeId, NodeKind, Operator, TransformableOp};

/// Options controlling lowering.
#[derive(Clone, Debug)]
pub struct LowerOptions {
    /// Reject grouped convolutions that are not depthwise instead of
    /// lowering them with a warning.
    pub deny_grouped_conv: bool,
    /// Run the emitted-chain check after transposed-convolution lowering
    /// as well as after convolution lowering.
    pub verify_transpose_conv: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            deny_grouped_conv: false,
            verify_transpose_conv: true,
        }
    }
}

impl fmt::Display for LowerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LowerOptions {{ deny_grouped_conv: {}, verify_transpose_conv: {} }}",
            self.deny_grouped_conv, self.verify_transpose_conv
        )
    }
}

/// A non-fatal diagnostic message from a lowering.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// The emitted graph may not run on every target runtime.
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "Warning",
        })
    }
}

/// What one lowering emitted.
#[derive(Clone, Debug, Default)]
pub struct LowerOutput {
    /// Emitted primitive nodes, in insertion order.
    pub nodes: Vec<NodeId>,
    /// Non-fatal diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

/// Summary of [`lower_graph`].
#[derive(Clone, Debug, Default)]
pub struct LowerReport {
    /// Number of high-level nodes replaced.
    pub lowered: usize,
    /// Every emitted primitive node, in insertion order.
    pub nodes: Vec<NodeId>,
    /// Diagnostics of all lowerings.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for LowerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} node(s) lowered into {} primitive(s), {} diagnostic(s)",
            self.lowered,
            self.nodes.len(),
            self.diagnostics.len()
        )
    }
}

/// Lowers `op`, whose node has already been detached from `graph`, and
/// reattaches the edges captured in `mapping`.
///
/// `mapping` is consumed: a node is lowered exactly once.
///
/// On error the graph is rolled back: everything the lowering added is
/// dropped and the node is reattached with its original edges.
pub fn lower(
    graph: &mut Graph,
    op: TransformableOp,
    mapping: EdgeRestoreMap,
    opts: &LowerOptions,
) -> Result<LowerOutput, LowerError> {
    let kind = op.kind_name();
    let original = op.clone();
    let result = match op {
        TransformableOp::BatchNorm(bn) => lower_batch_norm(graph, bn, &mapping),
        TransformableOp::GenericConv(conv) => lower_conv(graph, conv, &mapping, opts),
        TransformableOp::GenericTransposeConv(deconv) => {
            lower_transpose_conv(graph, deconv, &mapping, opts)
        }
    };
    let output = match result {
        Ok(output) => output,
        Err(err) => {
            log::debug!("{kind} '{}' not lowered: {err}", mapping.name);
            graph.reattach_node(NodeKind::Transformable(original), &mapping);
            return Err(err);
        }
    };
    log::info!(
        "lowered {kind} '{}' into {} primitive(s)",
        mapping.name,
        output.nodes.len()
    );
    Ok(output)
}

/// Detaches the transformable node `id` and lowers it. A failed lowering
/// leaves the node attached.
pub fn lower_node(
    graph: &mut Graph,
    id: NodeId,
    opts: &LowerOptions,
) -> Result<LowerOutput, LowerError> {
    let node = graph.node(id).ok_or(GraphError::UnknownNode(id))?;
    if !matches!(node.kind, NodeKind::Transformable(_)) {
        return Err(LowerError::precondition(
            node.kind.label(),
            format!("node {id} ('{}') is not transformable", node.name),
        ));
    }

    let (kind, mapping) = graph.detach_node(id)?;
    let NodeKind::Transformable(op) = kind else {
        return Err(GraphError::UnknownNode(id).into());
    };
    lower(graph, op, mapping, opts)
}

/// Lowers every transformable node of `graph`, one at a time, in
/// topological order.
///
/// Stops at the first error; nodes lowered before it stay lowered and the
/// failing node is left in place.
pub fn lower_graph(graph: &mut Graph, opts: &LowerOptions) -> Result<LowerReport, LowerError> {
    let mut report = LowerReport::default();
    for id in graph.transformable_nodes()? {
        let output = lower_node(graph, id, opts)?;
        report.lowered += 1;
        report.nodes.extend(output.nodes);
        report.diagnostics.extend(output.diagnostics);
    }
    Ok(report)
}

/// Inserts `chain` as lowering-origin nodes and reattaches the replaced
/// node's edges.
pub(crate) fn emit_chain(
    graph: &mut Graph,
    chain: &[Operator],
    mapping: &EdgeRestoreMap,
) -> Result<Vec<NodeId>, LowerError> {
    let mut nodes = Vec::with_capacity(chain.len());
    for op in chain {
        let id = graph.add_operator(op.clone(), true)?;
        log::debug!("{}: emitted {} as {id}", mapping.name, op.kind);
        nodes.push(id);
    }
    let restored = graph.try_restore_edges(mapping)?;
    log::debug!("{}: restored {restored} edge(s)", mapping.name);
    Ok(nodes)
}
