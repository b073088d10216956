//! Naming and registration of the tensors a lowering creates.

use tflc_ir::{Graph, QuantizationParams, Tensor, TensorData, TensorDesc, TensorId};

use crate::LowerError;

/// Creates the attribute (constant) and transform (intermediate) tensors of
/// one lowering call.
///
/// Unnamed tensors are named after the owning node's first output plus a
/// per-kind counter: `{owner}_attr`, `{owner}_attr_1`, ... and
/// `{owner}_transform`, `{owner}_transform_1`, ...
pub struct TensorFactory<'g> {
    graph: &'g mut Graph,
    owner: String,
    attr_count: usize,
    transform_count: usize,
}

impl<'g> TensorFactory<'g> {
    pub fn new(graph: &'g mut Graph, owner: impl Into<String>) -> Self {
        Self {
            graph,
            owner: owner.into(),
            attr_count: 0,
            transform_count: 0,
        }
    }

    /// Name of the output the generated names derive from.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// A constant tensor carrying `data`.
    pub fn attribute(
        &mut self,
        data: TensorData,
        quantization: Option<QuantizationParams>,
    ) -> Result<TensorId, LowerError> {
        let name = next_name(&self.owner, "attr", &mut self.attr_count);
        self.named_attribute(name, data, quantization)
    }

    pub fn named_attribute(
        &mut self,
        name: String,
        data: TensorData,
        quantization: Option<QuantizationParams>,
    ) -> Result<TensorId, LowerError> {
        let tensor = Tensor::constant(name, data).with_quantization(quantization);
        Ok(self.graph.add_tensor(tensor)?)
    }

    /// An `i32` rank-1 attribute, the form of perm/shape/begin/size operands.
    pub fn i32_attribute(&mut self, values: Vec<i32>) -> Result<TensorId, LowerError> {
        self.attribute(TensorData::i32_vector(values), None)
    }

    /// A bufferless tensor described by `desc`.
    pub fn transform(
        &mut self,
        desc: TensorDesc,
        quantization: Option<QuantizationParams>,
    ) -> Result<TensorId, LowerError> {
        let name = next_name(&self.owner, "transform", &mut self.transform_count);
        self.named_transform(name, desc, quantization)
    }

    pub fn named_transform(
        &mut self,
        name: String,
        desc: TensorDesc,
        quantization: Option<QuantizationParams>,
    ) -> Result<TensorId, LowerError> {
        let tensor = Tensor::variable(name, desc).with_quantization(quantization);
        Ok(self.graph.add_tensor(tensor)?)
    }

    pub fn tensor(&self, id: TensorId) -> Result<&Tensor, LowerError> {
        Ok(self.graph.tensor(id)?)
    }

    /// Give the graph back once every tensor has been created.
    pub fn into_graph(self) -> &'g mut Graph {
        self.graph
    }
}

fn next_name(owner: &str, kind: &str, count: &mut usize) -> String {
    let name = match *count {
        0 => format!("{owner}_{kind}"),
        n => format!("{owner}_{kind}_{n}"),
    };
    *count += 1;
    name
}
