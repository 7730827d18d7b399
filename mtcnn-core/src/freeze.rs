//! Variable-to-constant folding.
//!
//! Freezing extracts the subgraph that the requested outputs depend on and
//! swaps each reachable variable for a `Const` node carrying the session's
//! current value. Assignment and initializer nodes are not reachable from
//! model outputs, so they disappear with the pruning.

use std::collections::BTreeSet;

use log::{debug, info};
use thiserror::Error;

use crate::graph::{AttrValue, Graph, GraphError, Node};
use crate::session::{Session, VARIABLE_OPS};
use mtcnn_utils::timing_guard;

/// Failures raised while freezing a session graph.
#[derive(Debug, Error)]
pub enum FreezeError {
    #[error("output node(s) not found in the graph: {}", .0.join(", "))]
    MissingOutputs(Vec<String>),
    #[error("variable '{0}' is reachable from the outputs but has no value")]
    UninitializedVariable(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Which variables to fold. Variables excluded here are copied unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeOptions {
    /// Only fold these variables when set.
    pub allow: Option<BTreeSet<String>>,
    /// Never fold these variables.
    pub deny: BTreeSet<String>,
}

impl FreezeOptions {
    fn folds(&self, variable: &str) -> bool {
        self.allow
            .as_ref()
            .is_none_or(|allow| allow.contains(variable))
            && !self.deny.contains(variable)
    }
}

/// Result of [`convert_variables_to_constants`].
#[derive(Debug, Clone)]
pub struct FrozenGraph {
    pub graph: Graph,
    /// Number of variables replaced by constants.
    pub frozen_variables: usize,
}

/// Fold the variables reachable from `outputs` into constants and prune the rest.
///
/// Node order follows the session graph, so identical sessions freeze into
/// identical graphs.
pub fn convert_variables_to_constants(
    session: &Session,
    outputs: &[&str],
    options: &FreezeOptions,
) -> Result<FrozenGraph, FreezeError> {
    let _guard = timing_guard("mtcnn_core::freeze", log::Level::Debug);
    let source = session.graph();

    let missing: Vec<String> = outputs
        .iter()
        .map(|name| crate::graph::input_node_name(name))
        .filter(|name| !source.contains(name))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(FreezeError::MissingOutputs(missing));
    }

    let reachable = source.dependency_closure(outputs.iter().copied())?;
    let mut frozen = Graph::new();
    let mut frozen_variables = 0;

    for node in source.nodes() {
        if !reachable.contains(&node.name) {
            continue;
        }
        let replacement = match node.op.as_str() {
            op if VARIABLE_OPS.contains(&op) && options.folds(&node.name) => {
                let value = session
                    .value(&node.name)
                    .ok_or_else(|| FreezeError::UninitializedVariable(node.name.clone()))?;
                frozen_variables += 1;
                debug!("folding {} {:?}", node.name, value.shape());
                Node::new(&node.name, "Const")
                    .with_attr("dtype", AttrValue::Type(value.dtype()))
                    .with_attr("value", AttrValue::Tensor(value.clone()))
            }
            "ReadVariableOp" if reads_folded_variable(node, options) => {
                let mut identity = node.clone();
                identity.op = "Identity".to_string();
                if let Some(dtype) = identity.attrs.remove("dtype") {
                    identity.attrs.insert("T".to_string(), dtype);
                }
                identity
            }
            _ => node.clone(),
        };
        frozen.add_node(replacement)?;
    }

    info!("Froze {frozen_variables} variables.");
    debug!(
        "frozen graph keeps {} of {} nodes",
        frozen.len(),
        source.len()
    );
    Ok(FrozenGraph {
        graph: frozen,
        frozen_variables,
    })
}

fn reads_folded_variable(node: &Node, options: &FreezeOptions) -> bool {
    node.dependencies()
        .next()
        .is_some_and(|handle| options.folds(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DataType, TensorValue};

    fn session_with_two_layers() -> Session {
        let mut session = Session::default();
        session
            .graph_mut()
            .add_node(Node::new("input", "Placeholder"))
            .unwrap();
        let w = session.declare_variable("w", &[2]).unwrap();
        session
            .graph_mut()
            .add_node(Node::new("mul", "Mul").with_input("input").with_input(w))
            .unwrap();
        let unused = session.declare_variable("unused", &[1]).unwrap();
        session
            .graph_mut()
            .add_node(Node::new("side", "Identity").with_input(unused))
            .unwrap();
        session
            .assign("w", TensorValue::from_f32(vec![2], vec![1.0, 2.0]).unwrap())
            .unwrap();
        session
    }

    #[test]
    fn folds_reachable_variables_and_prunes_the_rest() {
        let session = session_with_two_layers();
        let frozen =
            convert_variables_to_constants(&session, &["mul"], &FreezeOptions::default()).unwrap();

        assert_eq!(frozen.frozen_variables, 1);
        let names: Vec<&str> = frozen
            .graph
            .nodes()
            .iter()
            .map(|node| node.name.as_str())
            .collect();
        assert_eq!(names, vec!["input", "w", "w/read", "mul"]);

        let w = frozen.graph.node("w").unwrap();
        assert_eq!(w.op, "Const");
        assert_eq!(w.attr("dtype"), Some(&AttrValue::Type(DataType::Float)));
        assert_eq!(
            w.attr("value"),
            Some(&AttrValue::Tensor(session.value("w").unwrap().clone()))
        );
        assert!(!frozen.graph.contains("w/Assign"));
        assert!(!frozen.graph.contains("unused"));
    }

    #[test]
    fn missing_outputs_are_all_reported() {
        let session = session_with_two_layers();
        let err = convert_variables_to_constants(
            &session,
            &["mul", "nope", "gone:1"],
            &FreezeOptions::default(),
        )
        .unwrap_err();
        assert_eq!(format!("{err}"), "output node(s) not found in the graph: nope, gone");
    }

    #[test]
    fn reachable_variables_need_values() {
        let session = session_with_two_layers();
        let err = convert_variables_to_constants(&session, &["side"], &FreezeOptions::default())
            .unwrap_err();
        assert!(matches!(err, FreezeError::UninitializedVariable(name) if name == "unused"));
    }

    #[test]
    fn deny_list_keeps_variables() {
        let session = session_with_two_layers();
        let options = FreezeOptions {
            deny: BTreeSet::from(["w".to_string()]),
            ..FreezeOptions::default()
        };
        let frozen = convert_variables_to_constants(&session, &["mul"], &options).unwrap();
        assert_eq!(frozen.frozen_variables, 0);
        assert_eq!(frozen.graph.node("w").unwrap().op, "VariableV2");
    }

    #[test]
    fn allow_list_limits_folding_and_rewrites_resource_reads() {
        let mut session = Session::default();
        let graph = session.graph_mut();
        graph
            .add_node(
                Node::new("h", "VarHandleOp")
                    .with_attr("dtype", AttrValue::Type(DataType::Float))
                    .with_attr("shape", AttrValue::Shape(vec![1])),
            )
            .unwrap();
        graph
            .add_node(
                Node::new("h/Read", "ReadVariableOp")
                    .with_input("h")
                    .with_attr("dtype", AttrValue::Type(DataType::Float)),
            )
            .unwrap();
        session
            .assign("h", TensorValue::from_f32(vec![1], vec![3.0]).unwrap())
            .unwrap();

        let options = FreezeOptions {
            allow: Some(BTreeSet::from(["h".to_string()])),
            ..FreezeOptions::default()
        };
        let frozen = convert_variables_to_constants(&session, &["h/Read"], &options).unwrap();
        assert_eq!(frozen.frozen_variables, 1);
        let read = frozen.graph.node("h/Read").unwrap();
        assert_eq!(read.op, "Identity");
        assert_eq!(read.attr("T"), Some(&AttrValue::Type(DataType::Float)));
        assert!(read.attr("dtype").is_none());

        let none = FreezeOptions {
            allow: Some(BTreeSet::new()),
            ..FreezeOptions::default()
        };
        let kept = convert_variables_to_constants(&session, &["h/Read"], &none).unwrap();
        assert_eq!(kept.graph.node("h/Read").unwrap().op, "ReadVariableOp");
    }
}
