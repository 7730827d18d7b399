//! Synthetic parameter files.
//!
//! Produces `det1/2/3.safetensors` with the exact tensor names and shapes the
//! networks declare, filled with small pseudo-random values. Integration tests
//! and demos use these instead of the trained MTCNN weights.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use safetensors::{Dtype, tensor::TensorView};

use crate::graph::AttrValue;
use crate::network::{StageKind, build_stage};
use crate::session::Session;

/// Deterministic xorshift stream mapped into `[-0.1, 0.1)`.
struct Values(u32);

impl Values {
    fn next(&mut self) -> f32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        (x as f32 / u32::MAX as f32) * 0.2 - 0.1
    }
}

/// Serialized safetensors payload for one stage.
pub fn synthetic_stage_params(kind: StageKind, seed: u32) -> Result<Vec<u8>> {
    let mut session = Session::default();
    build_stage(&mut session, kind)?;
    let prefix = format!("{}/", kind.scope());
    let mut values = Values(seed.max(1));

    let mut tensors = Vec::new();
    for name in session.variable_names() {
        let node = session
            .graph()
            .node(name)
            .with_context(|| format!("variable {name} vanished"))?;
        let shape = match node.attr("shape") {
            Some(AttrValue::Shape(shape)) => shape
                .iter()
                .map(|&dim| usize::try_from(dim))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("variable {name} has an unknown dimension"))?,
            _ => anyhow::bail!("variable {name} has no static shape"),
        };
        let count: usize = shape.iter().product();
        let data: Vec<u8> = (0..count)
            .flat_map(|_| values.next().to_le_bytes())
            .collect();
        let key = name.strip_prefix(&prefix).unwrap_or(name).to_string();
        tensors.push((key, shape, data));
    }

    let views = tensors
        .iter()
        .map(|(key, shape, data)| {
            TensorView::new(Dtype::F32, shape.clone(), data)
                .map(|view| (key.as_str(), view))
                .with_context(|| format!("invalid synthetic tensor {key}"))
        })
        .collect::<Result<Vec<_>>>()?;
    safetensors::serialize(views, &None).context("failed to serialize synthetic parameters")
}

/// Write synthetic parameter files for all three stages into `dir`.
pub fn write_synthetic_params<P: AsRef<Path>>(dir: P, seed: u32) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create parameter directory {}", dir.display()))?;
    for (offset, kind) in StageKind::ALL.into_iter().enumerate() {
        let bytes = synthetic_stage_params(kind, seed.wrapping_add(offset as u32 * 7919))?;
        let path = dir.join(kind.params_file());
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
