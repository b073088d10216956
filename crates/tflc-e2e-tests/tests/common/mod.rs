use ndarray::{ArrayD, IxDyn};
use tflc_ir::{
    Activation, BatchNorm, ConvParams, GenericConv, GenericTransposeConv, Graph, NodeId, Operator,
    QuantizationParams, Scalar, Tensor, TensorData, TensorDesc, TensorId, TensorShape,
};
use tflc_lower::{LowerError, LowerOptions, LowerOutput};

/// A graph holding one transformable node between a model input and output.
#[allow(dead_code)]
pub struct Model {
    pub graph: Graph,
    pub node: NodeId,
    pub input: TensorId,
    pub output: TensorId,
    pub output_node: NodeId,
}

/// An f32 constant of shape `dims` filled with `value`.
#[allow(dead_code)]
pub fn filled(dims: &[usize], value: f32) -> TensorData {
    TensorData::F32(ArrayD::from_elem(IxDyn(dims), value))
}

/// An int8 constant of shape `dims` filled with `value`.
#[allow(dead_code)]
pub fn filled_i8(dims: &[usize], value: i8) -> TensorData {
    TensorData::I8(ArrayD::from_elem(IxDyn(dims), value))
}

/// An f32 constant with the given values, reshaped to `dims`.
#[allow(dead_code)]
pub fn values(dims: &[usize], values: Vec<f32>) -> TensorData {
    TensorData::f32_vector(values)
        .reshaped(&TensorShape::from(dims))
        .expect("element count must match shape")
}

#[allow(dead_code)]
pub fn f32_var(name: &str, dims: &[usize]) -> Tensor {
    Tensor::variable(name, TensorDesc::new(Scalar::F32, dims))
}

#[allow(dead_code)]
pub fn i8_var(name: &str, dims: &[usize], scale: f32) -> Tensor {
    Tensor::variable(name, TensorDesc::new(Scalar::I8, dims))
        .with_quantization(Some(QuantizationParams::per_tensor(scale, 0)))
}

/// Inputs of a convolution model: operand tensors plus parameters.
#[allow(dead_code)]
pub struct ConvModel {
    pub x: Tensor,
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    pub y: Tensor,
    pub params: ConvParams,
}

#[allow(dead_code)]
impl ConvModel {
    /// An f32 convolution with a constant weight of 0.5s.
    pub fn f32(x: &[usize], w: &[usize], y: &[usize], params: ConvParams) -> Self {
        Self {
            x: f32_var("x", x),
            weight: Tensor::constant("w", filled(w, 0.5)),
            bias: None,
            y: f32_var("y", y),
            params,
        }
    }

    pub fn with_bias(mut self, bias: TensorData) -> Self {
        self.bias = Some(Tensor::constant("b", bias));
        self
    }
}

/// Builds `x -> conv -> y`.
#[allow(dead_code)]
pub fn conv_model(m: ConvModel, activation: Activation) -> Model {
    build(m, |input, weight, bias, output, params| {
        GenericConv {
            input,
            weight,
            bias,
            output,
            params,
            activation,
        }
        .into()
    })
}

/// Builds `x -> transposed conv -> y`.
#[allow(dead_code)]
pub fn deconv_model(m: ConvModel) -> Model {
    build(m, |input, weight, bias, output, params| {
        GenericTransposeConv {
            input,
            weight,
            bias,
            output,
            params,
        }
        .into()
    })
}

fn build(
    m: ConvModel,
    make: impl FnOnce(
        TensorId,
        TensorId,
        Option<TensorId>,
        TensorId,
        ConvParams,
    ) -> tflc_ir::TransformableOp,
) -> Model {
    let mut graph = Graph::new();
    let input = graph.add_input(m.x).unwrap();
    let weight = graph.add_tensor(m.weight).unwrap();
    let bias = m.bias.map(|b| graph.add_tensor(b).unwrap());
    let output = graph.add_tensor(m.y).unwrap();
    let node = graph
        .add_transformable(make(input, weight, bias, output, m.params))
        .unwrap();
    let output_node = graph.mark_output(output).unwrap();
    Model {
        graph,
        node,
        input,
        output,
        output_node,
    }
}

/// Builds `x -> batch norm -> y` over `dims` with the given per-channel
/// statistics.
#[allow(dead_code)]
pub fn batch_norm_model(
    x: Tensor,
    y: Tensor,
    stats: [Vec<f32>; 4],
    eps: f32,
    activation: Activation,
) -> Model {
    let mut graph = Graph::new();
    let input = graph.add_input(x).unwrap();
    let [weight, bias, mean, var] = stats;
    let mut stat = |name: &str, values: Vec<f32>| {
        graph
            .add_tensor(Tensor::constant(name, TensorData::f32_vector(values)))
            .unwrap()
    };
    let weight = stat("bn.weight", weight);
    let bias = stat("bn.bias", bias);
    let running_mean = stat("bn.running_mean", mean);
    let running_var = stat("bn.running_var", var);
    let output = graph.add_tensor(y).unwrap();
    let node = graph
        .add_transformable(
            BatchNorm {
                input,
                weight,
                bias,
                running_mean,
                running_var,
                output,
                eps,
                activation,
            }
            .into(),
        )
        .unwrap();
    let output_node = graph.mark_output(output).unwrap();
    Model {
        graph,
        node,
        input,
        output,
        output_node,
    }
}

/// Lower the model's node with default options.
#[allow(dead_code)]
pub fn lower(model: &mut Model) -> LowerOutput {
    try_lower(model, &LowerOptions::default()).expect("lowering failed")
}

/// Like `lower` but with explicit options, returning the result.
#[allow(dead_code)]
pub fn try_lower(model: &mut Model, opts: &LowerOptions) -> Result<LowerOutput, LowerError> {
    tflc_lower::lower_node(&mut model.graph, model.node, opts)
}

/// Operator names of `nodes`, in order.
#[allow(dead_code)]
pub fn labels(graph: &Graph, nodes: &[NodeId]) -> Vec<&'static str> {
    nodes
        .iter()
        .map(|&id| graph.node(id).expect("emitted node is live").kind.label())
        .collect()
}

/// The primitive operator of an emitted node.
#[allow(dead_code)]
pub fn operator(graph: &Graph, id: NodeId) -> &Operator {
    graph
        .node(id)
        .and_then(|n| n.as_operator())
        .expect("emitted node is an operator")
}

/// Shape of a tensor as a plain vector.
#[allow(dead_code)]
pub fn dims(graph: &Graph, id: TensorId) -> Vec<usize> {
    graph.tensor(id).unwrap().shape.dims.clone()
}

/// The constant buffer of a tensor.
#[allow(dead_code)]
pub fn data(graph: &Graph, id: TensorId) -> &TensorData {
    graph
        .tensor(id)
        .unwrap()
        .data
        .as_ref()
        .expect("tensor has a buffer")
}
