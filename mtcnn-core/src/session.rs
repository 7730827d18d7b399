//! Exclusively owned computation context.
//!
//! A [`Session`] holds the live graph and the current value of every variable.
//! It is threaded through network construction, parameter loading and
//! freezing by `&mut`/`&` borrow, so there is no ambient global graph.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::graph::{AttrValue, DataType, Graph, Node, TensorValue};

/// Op types that hold trainable state.
pub const VARIABLE_OPS: [&str; 3] = ["VariableV2", "Variable", "VarHandleOp"];

/// Device visibility for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of visible devices per device type (`CPU`, `GPU`).
    pub device_count: BTreeMap<String, u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::cpu_only()
    }
}

impl SessionConfig {
    /// One CPU, no accelerators.
    pub fn cpu_only() -> Self {
        Self {
            device_count: BTreeMap::from([("CPU".to_string(), 1), ("GPU".to_string(), 0)]),
        }
    }

    pub fn visible(&self, device_type: &str) -> u32 {
        self.device_count.get(device_type).copied().unwrap_or(0)
    }
}

/// Live graph plus variable values.
#[derive(Debug, Default)]
pub struct Session {
    graph: Graph,
    values: BTreeMap<String, TensorValue>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        if config.visible("GPU") > 0 {
            warn!(
                "{} GPU device(s) requested; graph construction and freezing always run on the CPU",
                config.visible("GPU")
            );
        }
        debug!("session devices: {:?}", config.device_count);
        Self {
            graph: Graph::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Declare a float variable and its `<name>/read` identity.
    ///
    /// Returns the name of the read tensor, which is what consumers wire to.
    pub fn declare_variable(&mut self, name: &str, shape: &[i64]) -> Result<String> {
        let variable = Node::new(name, "VariableV2")
            .with_attr("container", AttrValue::Str(String::new()))
            .with_attr("dtype", AttrValue::Type(DataType::Float))
            .with_attr("shape", AttrValue::Shape(shape.to_vec()))
            .with_attr("shared_name", AttrValue::Str(String::new()));
        self.graph
            .add_node(variable)
            .with_context(|| format!("failed to declare variable {name}"))?;

        let read_name = format!("{name}/read");
        let read = Node::new(&read_name, "Identity")
            .with_input(name)
            .with_attr("T", AttrValue::Type(DataType::Float))
            .with_attr("_class", AttrValue::Strs(vec![format!("loc:@{name}")]));
        self.graph.add_node(read)?;
        Ok(read_name)
    }

    /// Names of all variable nodes, in creation order.
    pub fn variable_names(&self) -> Vec<&str> {
        self.graph
            .nodes()
            .iter()
            .filter(|node| VARIABLE_OPS.contains(&node.op.as_str()))
            .map(|node| node.name.as_str())
            .collect()
    }

    /// Store `value` into variable `name` and record the assignment in the graph.
    ///
    /// The graph gains a `<name>/Assign/value` constant feeding an `Assign`
    /// node. Those nodes are never reachable from model outputs, so the freezer
    /// drops them again.
    pub fn assign(&mut self, name: &str, value: TensorValue) -> Result<()> {
        let node = self
            .graph
            .node(name)
            .with_context(|| format!("variable {name} does not exist in the graph"))?;
        anyhow::ensure!(
            VARIABLE_OPS.contains(&node.op.as_str()),
            "node {name} is a {} op, not a variable",
            node.op
        );
        if let Some(AttrValue::Shape(expected)) = node.attr("shape") {
            anyhow::ensure!(
                expected.as_slice() == value.shape(),
                "shape mismatch for {name}: variable is {expected:?}, value is {:?}",
                value.shape()
            );
        }
        if let Some(AttrValue::Type(dtype)) = node.attr("dtype") {
            anyhow::ensure!(
                *dtype == value.dtype(),
                "dtype mismatch for {name}: variable is {}, value is {}",
                dtype.name(),
                value.dtype().name()
            );
        }

        let assign_name = self.graph.unique_name(&format!("{name}/Assign"));
        let value_name = format!("{assign_name}/value");
        self.graph.add_node(
            Node::new(&value_name, "Const")
                .with_attr("dtype", AttrValue::Type(value.dtype()))
                .with_attr("value", AttrValue::Tensor(value.clone())),
        )?;
        self.graph.add_node(
            Node::new(&assign_name, "Assign")
                .with_input(name)
                .with_input(&value_name)
                .with_attr("T", AttrValue::Type(value.dtype()))
                .with_attr("_class", AttrValue::Strs(vec![format!("loc:@{name}")]))
                .with_attr("use_locking", AttrValue::Bool(true))
                .with_attr("validate_shape", AttrValue::Bool(true)),
        )?;

        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Current value of a variable, if it has been assigned.
    pub fn value(&self, name: &str) -> Option<&TensorValue> {
        self.values.get(name)
    }

    /// Variables that have never been assigned.
    pub fn uninitialized_variables(&self) -> Vec<&str> {
        self.variable_names()
            .into_iter()
            .filter(|name| !self.values.contains_key(*name))
            .collect()
    }
}
