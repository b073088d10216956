//! High-level operators that have no direct counterpart in the target
//! primitive set and must be lowered before serialization.

use crate::graph::TensorId;
use crate::op::Activation;

/// Batch normalization over axis 1 of an NC... tensor, with constant
/// running statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchNorm {
    pub input: TensorId,
    pub weight: TensorId,
    pub bias: TensorId,
    pub running_mean: TensorId,
    pub running_var: TensorId,
    pub output: TensorId,
    pub eps: f32,
    pub activation: Activation,
}

/// Stride/padding/dilation parameters of an N-d (transposed) convolution,
/// one entry per spatial axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvParams {
    pub stride: Vec<usize>,
    pub padding: Vec<usize>,
    pub dilation: Vec<usize>,
    pub output_padding: Vec<usize>,
    pub groups: usize,
}

impl ConvParams {
    /// Unit stride and dilation, no padding, a single group.
    pub fn new(spatial_rank: usize) -> Self {
        Self {
            stride: vec![1; spatial_rank],
            padding: vec![0; spatial_rank],
            dilation: vec![1; spatial_rank],
            output_padding: vec![0; spatial_rank],
            groups: 1,
        }
    }

    pub fn with_stride(mut self, stride: impl Into<Vec<usize>>) -> Self {
        self.stride = stride.into();
        self
    }

    pub fn with_padding(mut self, padding: impl Into<Vec<usize>>) -> Self {
        self.padding = padding.into();
        self
    }

    pub fn with_dilation(mut self, dilation: impl Into<Vec<usize>>) -> Self {
        self.dilation = dilation.into();
        self
    }

    pub fn with_output_padding(mut self, output_padding: impl Into<Vec<usize>>) -> Self {
        self.output_padding = output_padding.into();
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    /// Prepends the entries for a new leading unit spatial axis.
    pub fn lifted(&self) -> Self {
        let prepend = |v: &[usize], x: usize| -> Vec<usize> {
            std::iter::once(x).chain(v.iter().copied()).collect()
        };
        Self {
            stride: prepend(&self.stride, 1),
            padding: prepend(&self.padding, 0),
            dilation: prepend(&self.dilation, 1),
            output_padding: prepend(&self.output_padding, 0),
            groups: self.groups,
        }
    }

    pub fn has_padding(&self) -> bool {
        self.padding.iter().any(|&p| p != 0)
    }
}

/// Convolution with PyTorch weight layout `(out, in / groups, spatial...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericConv {
    pub input: TensorId,
    pub weight: TensorId,
    pub bias: Option<TensorId>,
    pub output: TensorId,
    pub params: ConvParams,
    pub activation: Activation,
}

/// Transposed convolution with PyTorch weight layout
/// `(in, out / groups, spatial...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericTransposeConv {
    pub input: TensorId,
    pub weight: TensorId,
    pub bias: Option<TensorId>,
    pub output: TensorId,
    pub params: ConvParams,
}

/// A node the lowering stage must replace with primitives.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformableOp {
    BatchNorm(BatchNorm),
    GenericConv(GenericConv),
    GenericTransposeConv(GenericTransposeConv),
}

impl TransformableOp {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::BatchNorm(_) => "BATCH_NORM",
            Self::GenericConv(_) => "GENERIC_CONV",
            Self::GenericTransposeConv(_) => "GENERIC_DECONV",
        }
    }

    /// Consumed tensors, in declaration order.
    pub fn inputs(&self) -> Vec<TensorId> {
        match self {
            Self::BatchNorm(bn) => vec![
                bn.input,
                bn.weight,
                bn.bias,
                bn.running_mean,
                bn.running_var,
            ],
            Self::GenericConv(c) => [Some(c.input), Some(c.weight), c.bias]
                .into_iter()
                .flatten()
                .collect(),
            Self::GenericTransposeConv(c) => [Some(c.input), Some(c.weight), c.bias]
                .into_iter()
                .flatten()
                .collect(),
        }
    }

    /// Produced tensors.
    pub fn outputs(&self) -> Vec<TensorId> {
        match self {
            Self::BatchNorm(bn) => vec![bn.output],
            Self::GenericConv(c) => vec![c.output],
            Self::GenericTransposeConv(c) => vec![c.output],
        }
    }
}

impl From<BatchNorm> for TransformableOp {
    fn from(op: BatchNorm) -> Self {
        Self::BatchNorm(op)
    }
}

impl From<GenericConv> for TransformableOp {
    fn from(op: GenericConv) -> Self {
        Self::GenericConv(op)
    }
}

impl From<GenericTransposeConv> for TransformableOp {
    fn from(op: GenericTransposeConv) -> Self {
        Self::GenericTransposeConv(op)
    }
}
