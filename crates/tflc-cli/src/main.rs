mod fixture;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::{Context, IntoDiagnostic};

use tflc_lower::LowerOptions;

/// tflc: lower one high-level model node into TFLite primitives
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    node: NodeArgs,

    /// Output path for the lowered graph dump (default: stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Reject grouped convolutions that are not depthwise
    #[arg(long, global = true)]
    deny_grouped_conv: bool,

    /// Skip the emitted-chain check after transposed-convolution lowering
    #[arg(long, global = true)]
    no_verify_transpose_conv: bool,

    /// Dump the graph before lowering to stderr
    #[arg(long, global = true)]
    emit_input: bool,
}

#[derive(Subcommand)]
enum NodeArgs {
    /// 1-D or 2-D convolution, standard, grouped, or depthwise
    Conv(ConvArgs),
    /// 1-D or 2-D transposed convolution
    Deconv(ConvArgs),
    /// Batch normalization over the channel axis
    BatchNorm(BatchNormArgs),
}

#[derive(Args)]
pub(crate) struct ConvArgs {
    /// Input shape, channel-first (e.g. 1,3,8,8)
    #[arg(long, value_delimiter = ',', required = true)]
    input: Vec<usize>,

    /// Weight shape in PyTorch layout (e.g. 4,3,3,3)
    #[arg(long, value_delimiter = ',', required = true)]
    weight: Vec<usize>,

    /// Stride per spatial axis; a single value applies to all (default: 1)
    #[arg(long, value_delimiter = ',')]
    stride: Vec<usize>,

    /// Symmetric padding per spatial axis (default: 0)
    #[arg(long, value_delimiter = ',')]
    padding: Vec<usize>,

    /// Dilation per spatial axis (default: 1)
    #[arg(long, value_delimiter = ',')]
    dilation: Vec<usize>,

    /// Extra output size per spatial axis, transposed convolution only (default: 0)
    #[arg(long, value_delimiter = ',')]
    output_padding: Vec<usize>,

    /// Group count
    #[arg(long, default_value = "1")]
    groups: usize,

    /// Attach a constant bias with one element per output channel
    #[arg(long)]
    bias: bool,

    /// Use int8 tensors with quantization parameters
    #[arg(long)]
    quantized: bool,
}

#[derive(Args)]
pub(crate) struct BatchNormArgs {
    /// Input shape, channel-first (e.g. 1,3,8,8)
    #[arg(long, value_delimiter = ',', required = true)]
    input: Vec<usize>,

    /// Variance epsilon
    #[arg(long, default_value = "1e-5")]
    eps: f32,

    /// Use int8 input and output with quantization parameters
    #[arg(long)]
    quantized: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    // 1. Build the single-node graph.
    let fixture = match &cli.node {
        NodeArgs::Conv(args) => fixture::conv(args, false),
        NodeArgs::Deconv(args) => fixture::conv(args, true),
        NodeArgs::BatchNorm(args) => fixture::batch_norm(args),
    }
    .wrap_err("invalid node description")?;
    let mut graph = fixture.graph;

    if cli.emit_input {
        eprintln!("{}", tflc_ir::dump_graph(&graph));
    }

    // 2. Lower.
    let opts = LowerOptions {
        deny_grouped_conv: cli.deny_grouped_conv,
        verify_transpose_conv: !cli.no_verify_transpose_conv,
    };
    let output = tflc_lower::lower_node(&mut graph, fixture.node, &opts)
        .into_diagnostic()
        .wrap_err("lowering failed")?;

    // 3. Print diagnostics.
    for diag in &output.diagnostics {
        eprintln!("{diag}");
    }

    // 4. Write the lowered graph.
    let text = tflc_ir::dump_graph(&graph);
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }

    Ok(())
}
