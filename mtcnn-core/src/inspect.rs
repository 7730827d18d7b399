//! Summaries of serialized graphs.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::graph::Graph;
use crate::network::OUTPUT_NODE_NAMES;
use crate::proto::decode_graph;
use crate::session::VARIABLE_OPS;

/// Node statistics for a serialized `GraphDef`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSummary {
    pub node_count: usize,
    /// Node count per op type.
    pub ops: BTreeMap<String, usize>,
    /// MTCNN output nodes absent from the graph.
    pub missing_outputs: Vec<String>,
    /// Variable nodes that survived freezing.
    pub variables: Vec<String>,
}

impl GraphSummary {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_graph(&decode_graph(bytes)?))
    }

    pub fn from_graph(graph: &Graph) -> Self {
        let mut ops = BTreeMap::new();
        for node in graph.nodes() {
            *ops.entry(node.op.clone()).or_insert(0) += 1;
        }
        Self {
            node_count: graph.len(),
            ops,
            missing_outputs: OUTPUT_NODE_NAMES
                .iter()
                .filter(|name| !graph.contains(name))
                .map(|name| name.to_string())
                .collect(),
            variables: graph
                .nodes()
                .iter()
                .filter(|node| VARIABLE_OPS.contains(&node.op.as_str()))
                .map(|node| node.name.clone())
                .collect(),
        }
    }

    /// A graph a detector can run: all outputs present, nothing left to initialize.
    pub fn is_frozen_mtcnn(&self) -> bool {
        self.missing_outputs.is_empty() && self.variables.is_empty()
    }
}
