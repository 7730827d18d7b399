//! Core MTCNN graph freezing primitives.
//!
//! This crate wires the three MTCNN networks into an explicit session graph,
//! loads their trained parameters, folds variables into constants, and writes
//! the result as a TensorFlow `GraphDef` alongside a TensorBoard event log.

/// TensorBoard event file writer and reader.
pub mod events;
/// Binary `GraphDef` export.
pub mod export;
/// Synthetic parameter files for tests and demos.
pub mod fixtures;
/// Variable-to-constant folding.
pub mod freeze;
/// Typed computation graph.
pub mod graph;
/// Serialized graph summaries.
pub mod inspect;
/// PNet, RNet and ONet layer wiring.
pub mod network;
/// Trained parameter loading.
pub mod params;
/// Detection cascade helpers for consumers of the frozen graph.
pub mod postprocess;
/// Per-image standardization for embedding networks.
pub mod prewhiten;
/// TensorFlow protobuf messages.
pub mod proto;
/// Graph plus variable store.
pub mod session;

pub use events::{EventWriter, read_events};
pub use export::write_graph_def;
pub use freeze::{FreezeError, FreezeOptions, FrozenGraph, convert_variables_to_constants};
pub use graph::{AttrValue, DataType, Graph, GraphError, Node, TensorData, TensorValue};
pub use inspect::GraphSummary;
pub use network::{Mtcnn, OUTPUT_NODE_NAMES, StageHandle, StageKind, create_mtcnn};
pub use params::{ParameterSource, StageParams, resolve_params_dir};
pub use postprocess::{
    BoundingBox, CascadeConfig, Candidate, ProposalMaps, StageOutput, StageRunner, detect_faces,
};
pub use prewhiten::{mean_std, prewhiten};
pub use proto::{decode_graph, encode_graph};
pub use session::{Session, SessionConfig};
