//! Typed computation graph.
//!
//! The graph is an ordered node table with a name index. Nodes keep their
//! creation order because both the freezer and the wire encoding preserve it,
//! which keeps exported files stable between runs.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

/// Element types used by the MTCNN graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    Int32,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Float => "float32",
            DataType::Int32 => "int32",
        }
    }
}

/// Structural errors raised while building or querying a graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node '{0}' already exists in the graph")]
    DuplicateNode(String),
    #[error("node '{0}' not found in the graph")]
    UnknownNode(String),
    #[error("tensor payload has {actual} elements but shape {shape:?} needs {expected}")]
    PayloadMismatch {
        shape: Vec<i64>,
        expected: usize,
        actual: usize,
    },
}

/// Flat tensor payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float(Vec<f32>),
    Int32(Vec<i32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float(values) => values.len(),
            TensorData::Int32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::Float(_) => DataType::Float,
            TensorData::Int32(_) => DataType::Int32,
        }
    }
}

/// A dense tensor with a fully known shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    shape: Vec<i64>,
    data: TensorData,
}

impl TensorValue {
    /// Build a tensor, checking that the payload fills the shape exactly.
    pub fn new(shape: Vec<i64>, data: TensorData) -> Result<Self, GraphError> {
        let expected = element_count(&shape);
        if expected != Some(data.len()) {
            return Err(GraphError::PayloadMismatch {
                expected: expected.unwrap_or(0),
                actual: data.len(),
                shape,
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<i64>, values: Vec<f32>) -> Result<Self, GraphError> {
        Self::new(shape, TensorData::Float(values))
    }

    pub fn from_i32(shape: Vec<i64>, values: Vec<i32>) -> Result<Self, GraphError> {
        Self::new(shape, TensorData::Int32(values))
    }

    /// A rank-0 int32 tensor.
    pub fn scalar_i32(value: i32) -> Self {
        Self {
            shape: Vec::new(),
            data: TensorData::Int32(vec![value]),
        }
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Number of elements described by `shape`, or `None` for unknown/negative dims.
pub fn element_count(shape: &[i64]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| {
        usize::try_from(dim).ok().and_then(|d| acc.checked_mul(d))
    })
}

/// Node attribute values.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Type(DataType),
    /// Static shape; `-1` marks an unknown dimension.
    Shape(Vec<i64>),
    Tensor(TensorValue),
    Int(i64),
    Ints(Vec<i64>),
    Str(String),
    Strs(Vec<String>),
    Bool(bool),
}

/// One operation in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op: String,
    /// Input references: `node`, `node:1`, or `^node` for control edges.
    pub inputs: Vec<String>,
    pub device: String,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Node {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            inputs: Vec::new(),
            device: String::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    /// Names of the nodes this node depends on, data and control edges alike.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input_node_name(input))
    }
}

/// Strip the control marker and output slot from an input reference.
pub fn input_node_name(input: &str) -> &str {
    let name = input.strip_prefix('^').unwrap_or(input);
    match name.rsplit_once(':') {
        Some((node, slot)) if slot.chars().all(|c| c.is_ascii_digit()) => node,
        _ => name,
    }
}

/// Ordered collection of uniquely named nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. Names must be unique.
    pub fn add_node(&mut self, node: Node) -> Result<&Node, GraphError> {
        if self.index.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode(node.name));
        }
        let position = self.nodes.len();
        self.index.insert(node.name.clone(), position);
        self.nodes.push(node);
        Ok(&self.nodes[position])
    }

    /// Swap a node for another with the same name, keeping its position.
    pub fn replace_node(&mut self, node: Node) -> Result<(), GraphError> {
        let position = *self
            .index
            .get(&node.name)
            .ok_or_else(|| GraphError::UnknownNode(node.name.clone()))?;
        self.nodes[position] = node;
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&position| &self.nodes[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return `base` if unused, otherwise the first free `base_N` (N >= 1).
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|suffix| format!("{base}_{suffix}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Names of every node reachable backwards from `roots`, roots included.
    ///
    /// Fails on the first root that is not part of the graph. Dangling inputs
    /// of reachable nodes are ignored; the wire format tolerates them and the
    /// freezer validates outputs separately.
    pub fn dependency_closure<'a, I>(&self, roots: I) -> Result<HashSet<String>, GraphError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut reached = HashSet::new();
        let mut pending = Vec::new();
        for root in roots {
            let name = input_node_name(root);
            if !self.contains(name) {
                return Err(GraphError::UnknownNode(name.to_string()));
            }
            pending.push(name.to_string());
        }

        while let Some(name) = pending.pop() {
            if !reached.insert(name.clone()) {
                continue;
            }
            if let Some(node) = self.node(&name) {
                pending.extend(
                    node.dependencies()
                        .filter(|dep| !reached.contains(*dep))
                        .map(str::to_string),
                );
            }
        }
        Ok(reached)
    }
}
