#![no_main]

use libfuzzer_sys::fuzz_target;
use tflc_ir::{
    Activation, BatchNorm, ConvParams, GenericConv, GenericTransposeConv, Graph, NodeId, Scalar,
    Tensor, TensorData, TensorDesc, TensorShape, TransformableOp,
};
use tflc_lower::LowerOptions;

/// Small dimension from one byte: 1..=8.
fn dim(byte: u8) -> usize {
    usize::from(byte % 8) + 1
}

fn constant(graph: &mut Graph, name: &str, dims: &[usize]) -> Option<tflc_ir::TensorId> {
    let len = dims.iter().product();
    let data = TensorData::f32_vector(vec![0.5; len]).reshaped(&TensorShape::from(dims))?;
    graph.add_tensor(Tensor::constant(name, data)).ok()
}

fn variable(graph: &mut Graph, name: &str, dims: &[usize]) -> Option<tflc_ir::TensorId> {
    graph
        .add_tensor(Tensor::variable(name, TensorDesc::new(Scalar::F32, dims)))
        .ok()
}

/// Builds a single transformable node whose shapes and parameters come
/// straight from `data`. Shapes need not be consistent.
fn build(data: &[u8]) -> Option<(Graph, NodeId)> {
    let (&selector, rest) = data.split_first()?;
    let spatial = if selector & 0x10 != 0 { 2 } else { 1 };
    let b = |i: usize| rest.get(i).copied().unwrap_or(1);

    let mut graph = Graph::new();
    let mut x_dims = vec![1, dim(b(0))];
    x_dims.extend((0..spatial).map(|i| dim(b(1 + i)) + 2));
    let input = graph
        .add_input(Tensor::variable("x", TensorDesc::new(Scalar::F32, x_dims.clone())))
        .ok()?;

    let op: TransformableOp = match selector % 3 {
        0 => {
            let channels = dim(b(3));
            let stats: Vec<_> = ["w", "b", "mean", "var"]
                .iter()
                .map(|name| constant(&mut graph, name, &[channels]))
                .collect::<Option<_>>()?;
            let output = variable(&mut graph, "y", &x_dims)?;
            BatchNorm {
                input,
                weight: stats[0],
                bias: stats[1],
                running_mean: stats[2],
                running_var: stats[3],
                output,
                eps: 1e-5,
                activation: Activation::None,
            }
            .into()
        }
        kind => {
            let mut w_dims = vec![dim(b(4)), dim(b(5))];
            w_dims.extend((0..spatial).map(|i| dim(b(6 + i)) % 4 + 1));
            let weight = constant(&mut graph, "weight", &w_dims)?;
            let bias = if b(8) & 1 != 0 {
                Some(constant(&mut graph, "bias", &[dim(b(9))])?)
            } else {
                None
            };
            let mut y_dims = vec![1, dim(b(10))];
            y_dims.extend((0..spatial).map(|i| dim(b(11 + i))));
            let output = variable(&mut graph, "y", &y_dims)?;
            let params = ConvParams::new(spatial)
                .with_stride(vec![usize::from(b(13) % 3) + 1; spatial])
                .with_padding(vec![usize::from(b(14) % 3); spatial])
                .with_dilation(vec![usize::from(b(15) % 2) + 1; spatial])
                .with_groups(usize::from(b(16) % 4));
            if kind == 1 {
                GenericConv {
                    input,
                    weight,
                    bias,
                    output,
                    params,
                    activation: Activation::None,
                }
                .into()
            } else {
                GenericTransposeConv {
                    input,
                    weight,
                    bias,
                    output,
                    params,
                }
                .into()
            }
        }
    };

    let node = graph.add_transformable(op).ok()?;
    let output = graph.tensor_by_name("y")?;
    graph.mark_output(output).ok()?;
    Some((graph, node))
}

fuzz_target!(|data: &[u8]| {
    if let Some((mut graph, node)) = build(data) {
        // Lowering must reject bad shapes with an error, never panic.
        let _ = tflc_lower::lower_node(&mut graph, node, &LowerOptions::default());
    }
});
