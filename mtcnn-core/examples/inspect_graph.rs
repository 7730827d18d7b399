use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use mtcnn_core::{GraphSummary, OUTPUT_NODE_NAMES};
use tract_tensorflow::prelude::*;

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let model_path = args
        .next()
        .context("usage: cargo run -p mtcnn-core --example inspect_graph <mtcnn.pb> [op]")?;
    let op_filter = args.next();

    let bytes = fs::read(&model_path).with_context(|| format!("failed to read {model_path}"))?;
    let summary = GraphSummary::from_bytes(&bytes)?;

    println!("Model: {model_path} ({} bytes)", bytes.len());
    println!("Nodes: {}", summary.node_count);
    for (op, count) in &summary.ops {
        if op_filter.as_deref().is_none_or(|filter| filter == op) {
            println!("  {op:<12} {count}");
        }
    }
    if !summary.variables.is_empty() {
        println!("Unfrozen variables: {}", summary.variables.join(", "));
    }
    if !summary.missing_outputs.is_empty() {
        println!("Missing outputs: {}", summary.missing_outputs.join(", "));
    }

    println!("Loading with tract-tensorflow...");
    let model = tract_tensorflow::tensorflow()
        .model_for_path(Path::new(&model_path))
        .with_context(|| format!("failed to parse model {model_path}"))?;
    for input in model.inputs.iter() {
        let fact = model.outlet_fact(*input)?;
        println!("  input \"{}\": {:?}", model.node(input.node).name, fact);
    }
    for output in OUTPUT_NODE_NAMES {
        match model.node_by_name(output) {
            Ok(node) => println!("  output \"{output}\" op={}", node.op.name()),
            Err(err) => println!("  output \"{output}\" unresolved: {err}"),
        }
    }

    Ok(())
}
