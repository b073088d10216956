//! Display implementations and text dump for debugging.

use std::fmt;

use crate::graph::{Graph, NodeKind};
use crate::op::{Activation, OpKind, Padding};
use crate::tensor::{QuantizationParams, Tensor};
use crate::types::{Scalar, ScalarKind, TensorShape};

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Sint => write!(f, "sint"),
            Self::Uint => write!(f, "uint"),
            Self::Float => write!(f, "float"),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::Sint => write!(f, "i{}", self.width * 8),
            ScalarKind::Uint => write!(f, "u{}", self.width * 8),
            ScalarKind::Float => write!(f, "f{}", self.width * 8),
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Same => write!(f, "SAME"),
            Self::Valid => write!(f, "VALID"),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Relu => write!(f, "RELU"),
            Self::ReluN1To1 => write!(f, "RELU_N1_TO_1"),
            Self::Relu6 => write!(f, "RELU6"),
            Self::Tanh => write!(f, "TANH"),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op_name())?;
        match self {
            Self::Reshape { new_shape } => write!(f, " new_shape={new_shape:?}"),
            Self::Mul { activation } | Self::Add { activation } => {
                write_activation(f, *activation)
            }
            Self::Conv2d(o) => {
                write!(
                    f,
                    " padding={} stride=({}, {}) dilation=({}, {})",
                    o.padding, o.stride_h, o.stride_w, o.dilation_h_factor, o.dilation_w_factor
                )?;
                write_activation(f, o.activation)
            }
            Self::DepthwiseConv2d(o) => {
                write!(
                    f,
                    " padding={} stride=({}, {}) dilation=({}, {}) depth_multiplier={}",
                    o.padding,
                    o.stride_h,
                    o.stride_w,
                    o.dilation_h_factor,
                    o.dilation_w_factor,
                    o.depth_multiplier
                )?;
                write_activation(f, o.activation)
            }
            Self::TransposeConv(o) => write!(
                f,
                " padding={} stride=({}, {})",
                o.padding, o.stride_h, o.stride_w
            ),
            Self::Transpose | Self::Pad | Self::Slice | Self::Dequantize | Self::Quantize => {
                Ok(())
            }
        }
    }
}

fn write_activation(f: &mut fmt::Formatter<'_>, activation: Activation) -> fmt::Result {
    match activation {
        Activation::None => Ok(()),
        a => write!(f, " activation={a}"),
    }
}

impl fmt::Display for QuantizationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scale={:?} zero_point={:?}", self.scales, self.zero_points)?;
        if let Some(axis) = self.axis {
            write!(f, " axis={axis}")?;
        }
        Ok(())
    }
}

fn format_tensor(tensor: &Tensor) -> String {
    let mut s = format!("{}: {}{}", tensor.name, tensor.scalar, tensor.shape);
    if tensor.is_constant() {
        s.push_str(" const");
    }
    if let Some(q) = &tensor.quantization {
        s.push_str(&format!(" ({q})"));
    }
    s
}

/// Render a graph as human-readable text.
///
/// Nodes are listed in id order; nodes inserted by a lowering are marked
/// with `*`.
pub fn dump_graph(graph: &Graph) -> String {
    let mut out = String::new();

    out.push_str("Tensors:\n");
    for (id, tensor) in graph.tensors() {
        out.push_str(&format!("  {id} {}\n", format_tensor(tensor)));
    }

    out.push_str("\nNodes:\n");
    for node in graph.nodes() {
        let marker = if node.lowering_origin { "*" } else { " " };
        let body = match &node.kind {
            NodeKind::Operator(op) => {
                let ins: Vec<String> = op.inputs.iter().map(|t| t.to_string()).collect();
                let outs: Vec<String> = op.outputs.iter().map(|t| t.to_string()).collect();
                format!("{} ({}) -> ({})", op.kind, ins.join(", "), outs.join(", "))
            }
            kind => {
                let tensors: Vec<String> = kind
                    .inputs()
                    .into_iter()
                    .chain(kind.outputs())
                    .map(|t| t.to_string())
                    .collect();
                format!("{} {}", kind.label(), tensors.join(", "))
            }
        };
        out.push_str(&format!("  {marker}{} {body}  // {}\n", node.id, node.name));
    }

    if graph.edge_count() > 0 {
        out.push_str("\nEdges:\n");
        for e in graph.edges() {
            out.push_str(&format!("  {} -> {} via {}\n", e.source, e.target, e.tensor));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{Conv2dOptions, Operator};
    use crate::tensor::{TensorData, TensorDesc};

    #[test]
    fn scalar_display() {
        assert_eq!(Scalar::F32.to_string(), "f32");
        assert_eq!(Scalar::I8.to_string(), "i8");
        assert_eq!(Scalar::U8.to_string(), "u8");
        assert_eq!(Scalar::BOOL.to_string(), "bool");
    }

    #[test]
    fn shape_display() {
        assert_eq!(TensorShape::from([1, 3, 224, 224]).to_string(), "[1, 3, 224, 224]");
        assert_eq!(TensorShape::default().to_string(), "[]");
    }

    #[test]
    fn op_kind_display() {
        let conv = OpKind::Conv2d(Conv2dOptions {
            padding: Padding::Valid,
            stride_h: 2,
            stride_w: 2,
            dilation_h_factor: 1,
            dilation_w_factor: 1,
            activation: Activation::Relu6,
        });
        assert_eq!(
            conv.to_string(),
            "CONV_2D padding=VALID stride=(2, 2) dilation=(1, 1) activation=RELU6"
        );
        assert_eq!(OpKind::Transpose.to_string(), "TRANSPOSE");
    }

    #[test]
    fn dump_lists_sections() {
        let mut graph = Graph::new();
        let x = graph
            .add_input(Tensor::variable("x", TensorDesc::new(Scalar::F32, [1, 3, 4, 4])))
            .unwrap();
        let perm = graph
            .add_tensor(Tensor::constant("perm", TensorData::i32_vector(vec![0, 2, 3, 1])))
            .unwrap();
        let y = graph
            .add_tensor(Tensor::variable("y", TensorDesc::new(Scalar::F32, [1, 4, 4, 3])))
            .unwrap();
        graph
            .add_operator(Operator::new(OpKind::Transpose, vec![x, perm], vec![y]), true)
            .unwrap();

        let text = dump_graph(&graph);
        assert!(text.contains("Tensors:"));
        assert!(text.contains("t0 x: f32[1, 3, 4, 4]"));
        assert!(text.contains("t1 perm: i32[4] const"));
        assert!(text.contains("*n1 TRANSPOSE (t0, t1) -> (t2)"));
        assert!(text.contains("n0 -> n1 via t0"));
    }
}
