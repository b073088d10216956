//! tflc intermediate representation.
//!
//! A model graph of named, typed tensors and the nodes that produce and
//! consume them. Nodes are either TFLite primitives ([`Operator`]) or
//! high-level nodes awaiting lowering ([`TransformableOp`]).

mod display;
mod error;
pub mod graph;
mod op;
pub mod schema;
mod tensor;
mod transformable;
mod types;

pub use display::dump_graph;
pub use error::GraphError;
pub use graph::{Edge, EdgeRestoreMap, Graph, Node, NodeId, NodeKind, TensorId};
pub use op::{
    Activation, Conv2dOptions, DepthwiseConv2dOptions, OpKind, Operator, Padding,
    TransposeConvOptions,
};
pub use tensor::{QuantizationParams, Tensor, TensorData, TensorDesc};
pub use transformable::{
    BatchNorm, ConvParams, GenericConv, GenericTransposeConv, TransformableOp,
};
pub use types::{Bytes, Scalar, ScalarKind, TensorShape, inverse_permutation, is_permutation};
