//! Primitive operators of the target format.

use std::ops::RangeInclusive;

use crate::error::GraphError;
use crate::graph::{Graph, TensorId};
use crate::schema::builtin_op;
use crate::types::Scalar;

/// Implicit padding mode of TFLite convolution primitives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Padding {
    Same,
    #[default]
    Valid,
}

/// Activation a runtime may fuse into an arithmetic or convolution node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    #[default]
    None,
    Relu,
    ReluN1To1,
    Relu6,
    Tanh,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conv2dOptions {
    pub padding: Padding,
    pub stride_h: u32,
    pub stride_w: u32,
    pub dilation_h_factor: u32,
    pub dilation_w_factor: u32,
    pub activation: Activation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepthwiseConv2dOptions {
    pub padding: Padding,
    pub stride_h: u32,
    pub stride_w: u32,
    pub depth_multiplier: u32,
    pub dilation_h_factor: u32,
    pub dilation_w_factor: u32,
    pub activation: Activation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransposeConvOptions {
    pub padding: Padding,
    pub stride_h: u32,
    pub stride_w: u32,
}

/// The closed set of primitive kinds, with kind-specific attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Inputs: data, perm (`i32`).
    Transpose,
    /// Inputs: data, paddings (`i32`, shape `[rank, 2]`).
    Pad,
    /// Inputs: data, begin (`i32`), size (`i32`).
    Slice,
    /// Inputs: data, optional shape (`i32`).
    Reshape { new_shape: Vec<i32> },
    Mul { activation: Activation },
    Add { activation: Activation },
    Dequantize,
    Quantize,
    /// Inputs: input (NHWC), filter (OHWI), optional bias.
    Conv2d(Conv2dOptions),
    /// Inputs: input (NHWC), filter (1HWO), optional bias.
    DepthwiseConv2d(DepthwiseConv2dOptions),
    /// Inputs: output shape (`i32`), filter (OHWI), input (NHWC), optional bias.
    TransposeConv(TransposeConvOptions),
}

impl OpKind {
    /// TFLite `BuiltinOperator` code.
    pub fn builtin_code(&self) -> i32 {
        match self {
            Self::Transpose => builtin_op::TRANSPOSE,
            Self::Pad => builtin_op::PAD,
            Self::Slice => builtin_op::SLICE,
            Self::Reshape { .. } => builtin_op::RESHAPE,
            Self::Mul { .. } => builtin_op::MUL,
            Self::Add { .. } => builtin_op::ADD,
            Self::Dequantize => builtin_op::DEQUANTIZE,
            Self::Quantize => builtin_op::QUANTIZE,
            Self::Conv2d(_) => builtin_op::CONV_2D,
            Self::DepthwiseConv2d(_) => builtin_op::DEPTHWISE_CONV_2D,
            Self::TransposeConv(_) => builtin_op::TRANSPOSE_CONV,
        }
    }

    /// TFLite builtin operator name.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Transpose => "TRANSPOSE",
            Self::Pad => "PAD",
            Self::Slice => "SLICE",
            Self::Reshape { .. } => "RESHAPE",
            Self::Mul { .. } => "MUL",
            Self::Add { .. } => "ADD",
            Self::Dequantize => "DEQUANTIZE",
            Self::Quantize => "QUANTIZE",
            Self::Conv2d(_) => "CONV_2D",
            Self::DepthwiseConv2d(_) => "DEPTHWISE_CONV_2D",
            Self::TransposeConv(_) => "TRANSPOSE_CONV",
        }
    }

    fn input_arity(&self) -> RangeInclusive<usize> {
        match self {
            Self::Transpose | Self::Pad | Self::Mul { .. } | Self::Add { .. } => 2..=2,
            Self::Slice => 3..=3,
            Self::Reshape { .. } => 1..=2,
            Self::Dequantize | Self::Quantize => 1..=1,
            Self::Conv2d(_) | Self::DepthwiseConv2d(_) => 2..=3,
            Self::TransposeConv(_) => 3..=4,
        }
    }

    /// Input slots that carry `i32` shape-like attributes.
    fn i32_slots(&self) -> &'static [usize] {
        match self {
            Self::Transpose | Self::Pad | Self::Reshape { .. } => &[1],
            Self::Slice => &[1, 2],
            Self::TransposeConv(_) => &[0],
            _ => &[],
        }
    }

    /// Slot of the primary data input.
    fn data_slot(&self) -> usize {
        match self {
            Self::TransposeConv(_) => 2,
            _ => 0,
        }
    }
}

/// A primitive operator node: kind, ordered inputs, ordered outputs.
#[derive(Clone, Debug, PartialEq)]
pub struct Operator {
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
}

impl Operator {
    pub fn new(kind: OpKind, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self {
            kind,
            inputs,
            outputs,
        }
    }

    /// Checks the input/output counts and element types against the
    /// contract of the operator kind.
    pub fn validate(&self, graph: &Graph) -> Result<(), GraphError> {
        let op = self.kind.op_name();
        let arity = self.kind.input_arity();
        if !arity.contains(&self.inputs.len()) {
            return Err(GraphError::ArityMismatch {
                op,
                what: "inputs",
                expected: format!("{}..={}", arity.start(), arity.end()),
                found: self.inputs.len(),
            });
        }
        if self.outputs.len() != 1 {
            return Err(GraphError::ArityMismatch {
                op,
                what: "outputs",
                expected: "1".into(),
                found: self.outputs.len(),
            });
        }

        for &slot in self.kind.i32_slots() {
            if let Some(&id) = self.inputs.get(slot) {
                let t = graph.tensor(id)?;
                if t.scalar != Scalar::I32 {
                    return Err(GraphError::TypeMismatch {
                        op,
                        detail: format!("input {slot} '{}' must be i32, found {}", t.name, t.scalar),
                    });
                }
            }
        }

        let data = graph.tensor(self.inputs[self.kind.data_slot()])?;
        let out = graph.tensor(self.outputs[0])?;

        match &self.kind {
            OpKind::Mul { .. } | OpKind::Add { .. } => {
                let rhs = graph.tensor(self.inputs[1])?;
                if data.scalar != rhs.scalar || data.scalar != out.scalar {
                    return Err(GraphError::TypeMismatch {
                        op,
                        detail: format!(
                            "operands {} and {} with result {} must share an element type",
                            data.scalar, rhs.scalar, out.scalar
                        ),
                    });
                }
            }
            OpKind::Dequantize => {
                if !(data.is_quantized() || data.scalar == Scalar::F16) || !out.scalar.is_float() {
                    return Err(GraphError::TypeMismatch {
                        op,
                        detail: format!(
                            "'{}' ({}) must be quantized and '{}' ({}) floating point",
                            data.name, data.scalar, out.name, out.scalar
                        ),
                    });
                }
            }
            OpKind::Quantize => {
                if !(data.scalar.is_float() || data.is_quantized()) || !out.is_quantized() {
                    return Err(GraphError::TypeMismatch {
                        op,
                        detail: format!(
                            "'{}' must carry quantization parameters",
                            out.name
                        ),
                    });
                }
            }
            _ => {
                if data.scalar != out.scalar {
                    return Err(GraphError::TypeMismatch {
                        op,
                        detail: format!(
                            "data input '{}' is {} but output '{}' is {}",
                            data.name, data.scalar, out.name, out.scalar
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}
