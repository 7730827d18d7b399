//! Trained parameter loading.
//!
//! Each MTCNN stage ships its weights as one safetensors file (`det1`, `det2`,
//! `det3`). Tensor keys are `<layer>/<param>` relative to the stage scope, so
//! `conv1/weights` in `det1.safetensors` lands in variable `pnet/conv1/weights`.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;
use safetensors::{Dtype, SafeTensors};

use crate::graph::TensorValue;
use crate::network::StageKind;
use crate::session::Session;

/// Environment variable consulted when no parameter directory is given.
pub const PARAMS_DIR_ENV: &str = "MTCNN_PARAMS_DIR";
/// Fallback parameter directory, relative to the working directory.
pub const DEFAULT_PARAMS_DIR: &str = "models/mtcnn";

/// Resolve the parameter directory: explicit path, then `$MTCNN_PARAMS_DIR`,
/// then `models/mtcnn`.
pub fn resolve_params_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    match env::var_os(PARAMS_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_PARAMS_DIR),
    }
}

/// A directory of per-stage parameter files.
#[derive(Debug, Clone)]
pub struct ParameterSource {
    root: PathBuf,
}

impl ParameterSource {
    /// Resolve and validate the parameter directory.
    pub fn open(explicit: Option<&Path>) -> Result<Self> {
        let root = resolve_params_dir(explicit);
        anyhow::ensure!(
            root.is_dir(),
            "parameter directory not found: {} (pass --params-dir or set {PARAMS_DIR_ENV})",
            root.display()
        );
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_path(&self, kind: StageKind) -> PathBuf {
        self.root.join(kind.params_file())
    }

    pub fn load_stage(&self, kind: StageKind) -> Result<StageParams> {
        let path = self.stage_path(kind);
        let bytes = fs::read(&path)
            .with_context(|| format!("failed to read {kind} parameters from {}", path.display()))?;
        StageParams::from_bytes(&bytes)
            .with_context(|| format!("invalid {kind} parameters in {}", path.display()))
    }
}

/// Parameter tensors of one stage, keyed by `<layer>/<param>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageParams {
    tensors: BTreeMap<String, TensorValue>,
}

impl StageParams {
    /// Decode a safetensors buffer. Every tensor must be little-endian `F32`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file = SafeTensors::deserialize(bytes).context("failed to parse safetensors header")?;
        let mut tensors = BTreeMap::new();
        for (name, view) in file.tensors() {
            anyhow::ensure!(
                view.dtype() == Dtype::F32,
                "tensor {name} has dtype {:?}; only F32 parameters are supported",
                view.dtype()
            );
            let shape = view
                .shape()
                .iter()
                .map(|&dim| i64::try_from(dim))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("tensor {name} has an oversized dimension"))?;
            let values: Vec<f32> = bytemuck::pod_collect_to_vec::<u8, f32>(view.data())
                .into_iter()
                .map(|v| f32::from_bits(u32::from_le(v.to_bits())))
                .collect();
            let tensor = TensorValue::from_f32(shape, values)
                .with_context(|| format!("tensor {name} payload does not match its shape"))?;
            tensors.insert(name, tensor);
        }
        Ok(Self { tensors })
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&TensorValue> {
        self.tensors.get(key)
    }

    /// Assign every tensor to `<scope>/<key>` in `session`, returning how many were set.
    pub fn assign_into(&self, session: &mut Session, scope: &str) -> Result<usize> {
        for (key, value) in &self.tensors {
            let variable = format!("{scope}/{key}");
            session
                .assign(&variable, value.clone())
                .with_context(|| format!("failed to load parameter {key} into scope {scope}"))?;
            debug!("assigned {variable} {:?}", value.shape());
        }
        Ok(self.tensors.len())
    }
}
