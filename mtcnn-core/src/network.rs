//! Declarative MTCNN network wiring.
//!
//! [`NetworkBuilder`] appends layers to a [`Session`] graph under a name scope,
//! tracking the static shape of every layer output so fully-connected widths
//! and PReLU slope sizes follow from the input shape. Node names match the
//! published MTCNN graph (`pnet/conv4-2/BiasAdd`, `rnet/prob1`, ...), which is
//! what downstream detectors look up when they run the frozen model.

use std::{collections::HashMap, fmt, path::Path};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::graph::{AttrValue, DataType, Node, TensorValue};
use crate::params::ParameterSource;
use crate::session::Session;
use mtcnn_utils::timing_guard;

/// Output nodes kept when the three networks are frozen together.
pub const OUTPUT_NODE_NAMES: [&str; 7] = [
    "pnet/conv4-2/BiasAdd",
    "pnet/prob1",
    "rnet/conv5-2/conv5-2",
    "rnet/prob1",
    "onet/conv6-2/conv6-2",
    "onet/conv6-3/conv6-3",
    "onet/prob1",
];

/// Spatial padding mode for convolutions and pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Same,
    Valid,
}

impl Padding {
    fn label(self) -> &'static str {
        match self {
            Padding::Same => "SAME",
            Padding::Valid => "VALID",
        }
    }

    /// Output extent along one axis; unknown (`-1`) stays unknown.
    fn output_dim(self, input: i64, kernel: i64, stride: i64) -> Result<i64> {
        if input < 0 {
            return Ok(-1);
        }
        match self {
            Padding::Same => Ok((input + stride - 1) / stride),
            Padding::Valid => {
                anyhow::ensure!(
                    input >= kernel,
                    "VALID window of {kernel} does not fit an extent of {input}"
                );
                Ok((input - kernel) / stride + 1)
            }
        }
    }
}

/// A layer output: the node producing it and its static shape (`-1` = unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOutput {
    pub name: String,
    pub shape: Vec<i64>,
}

impl LayerOutput {
    fn channels(&self) -> Result<i64> {
        match self.shape.last() {
            Some(&channels) if channels > 0 => Ok(channels),
            _ => anyhow::bail!(
                "layer {} has no known channel dimension ({:?})",
                self.name,
                self.shape
            ),
        }
    }
}

/// Appends named layers to a session graph under one scope.
pub struct NetworkBuilder<'s> {
    session: &'s mut Session,
    scope: String,
    layers: HashMap<String, LayerOutput>,
    terminal: Option<LayerOutput>,
}

impl<'s> NetworkBuilder<'s> {
    pub fn new(session: &'s mut Session, scope: impl Into<String>) -> Self {
        Self {
            session,
            scope: scope.into(),
            layers: HashMap::new(),
            terminal: None,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn scoped(&self, name: &str) -> String {
        format!("{}/{}", self.scope, name)
    }

    fn add(&mut self, node: Node) -> Result<String> {
        let name = node.name.clone();
        self.session.graph_mut().add_node(node)?;
        Ok(name)
    }

    /// First free name for an op inside `prefix`, TensorFlow style (`Relu`, `Relu_1`).
    fn op_name(&self, prefix: &str, op: &str) -> String {
        self.session
            .graph()
            .unique_name(&format!("{prefix}/{op}"))
    }

    fn terminal(&self) -> Result<LayerOutput> {
        self.terminal
            .clone()
            .with_context(|| format!("no input fed into network {}", self.scope))
    }

    fn register(&mut self, layer: &str, output: LayerOutput) -> &mut Self {
        self.layers.insert(layer.to_string(), output.clone());
        self.terminal = Some(output);
        self
    }

    /// Create the float placeholder `<scope>/input` and register it as layer `data`.
    pub fn input(&mut self, shape: &[i64]) -> Result<&mut Self> {
        let name = self.add(
            Node::new(self.scoped("input"), "Placeholder")
                .with_attr("dtype", AttrValue::Type(DataType::Float))
                .with_attr("shape", AttrValue::Shape(shape.to_vec())),
        )?;
        Ok(self.register(
            "data",
            LayerOutput {
                name,
                shape: shape.to_vec(),
            },
        ))
    }

    /// Continue building from a previously registered layer.
    pub fn feed(&mut self, layer: &str) -> Result<&mut Self> {
        let output = self
            .layers
            .get(layer)
            .cloned()
            .with_context(|| format!("unknown layer name fed: {layer}"))?;
        self.terminal = Some(output);
        Ok(self)
    }

    /// Output of a registered layer.
    pub fn layer(&self, layer: &str) -> Option<&LayerOutput> {
        self.layers.get(layer)
    }

    /// Biased 2-D convolution without activation: `Conv2D` followed by `BiasAdd`.
    #[allow(clippy::too_many_arguments)]
    pub fn conv(
        &mut self,
        k_h: i64,
        k_w: i64,
        c_o: i64,
        s_h: i64,
        s_w: i64,
        padding: Padding,
        name: &str,
    ) -> Result<&mut Self> {
        let input = self.terminal()?;
        let c_i = input.channels()?;
        let layer = self.scoped(name);

        let weights = self
            .session
            .declare_variable(&format!("{layer}/weights"), &[k_h, k_w, c_i, c_o])?;
        let conv = self.add(
            Node::new(format!("{layer}/Conv2D"), "Conv2D")
                .with_input(&input.name)
                .with_input(weights)
                .with_attr("T", AttrValue::Type(DataType::Float))
                .with_attr("data_format", AttrValue::Str("NHWC".into()))
                .with_attr("dilations", AttrValue::Ints(vec![1, 1, 1, 1]))
                .with_attr("padding", AttrValue::Str(padding.label().into()))
                .with_attr("strides", AttrValue::Ints(vec![1, s_h, s_w, 1]))
                .with_attr("use_cudnn_on_gpu", AttrValue::Bool(true)),
        )?;
        let biases = self
            .session
            .declare_variable(&format!("{layer}/biases"), &[c_o])?;
        let output = self.add(
            Node::new(format!("{layer}/BiasAdd"), "BiasAdd")
                .with_input(conv)
                .with_input(biases)
                .with_attr("T", AttrValue::Type(DataType::Float))
                .with_attr("data_format", AttrValue::Str("NHWC".into())),
        )?;

        let shape = vec![
            input.shape[0],
            padding.output_dim(input.shape[1], k_h, s_h)?,
            padding.output_dim(input.shape[2], k_w, s_w)?,
            c_o,
        ];
        Ok(self.register(name, LayerOutput { name: output, shape }))
    }

    /// Parametric ReLU: `relu(x) + alpha * -relu(-x)`, one slope per channel.
    pub fn prelu(&mut self, name: &str) -> Result<&mut Self> {
        let input = self.terminal()?;
        let channels = input.channels()?;
        let layer = self.scoped(name);
        let float = || AttrValue::Type(DataType::Float);

        let alpha = self
            .session
            .declare_variable(&format!("{layer}/alpha"), &[channels])?;
        let pos = self.add(
            Node::new(self.op_name(&layer, "Relu"), "Relu")
                .with_input(&input.name)
                .with_attr("T", float()),
        )?;
        let negated = self.add(
            Node::new(self.op_name(&layer, "Neg"), "Neg")
                .with_input(&input.name)
                .with_attr("T", float()),
        )?;
        let neg_relu = self.add(
            Node::new(self.op_name(&layer, "Relu"), "Relu")
                .with_input(negated)
                .with_attr("T", float()),
        )?;
        let neg_part = self.add(
            Node::new(self.op_name(&layer, "Neg"), "Neg")
                .with_input(neg_relu)
                .with_attr("T", float()),
        )?;
        let scaled = self.add(
            Node::new(self.op_name(&layer, "Mul"), "Mul")
                .with_input(alpha)
                .with_input(neg_part)
                .with_attr("T", float()),
        )?;
        let output = self.add(
            Node::new(self.op_name(&layer, "add"), "Add")
                .with_input(pos)
                .with_input(scaled)
                .with_attr("T", float()),
        )?;

        let shape = input.shape.clone();
        Ok(self.register(name, LayerOutput { name: output, shape }))
    }

    pub fn max_pool(
        &mut self,
        k_h: i64,
        k_w: i64,
        s_h: i64,
        s_w: i64,
        padding: Padding,
        name: &str,
    ) -> Result<&mut Self> {
        let input = self.terminal()?;
        let output = self.add(
            Node::new(self.scoped(name), "MaxPool")
                .with_input(&input.name)
                .with_attr("T", AttrValue::Type(DataType::Float))
                .with_attr("data_format", AttrValue::Str("NHWC".into()))
                .with_attr("ksize", AttrValue::Ints(vec![1, k_h, k_w, 1]))
                .with_attr("padding", AttrValue::Str(padding.label().into()))
                .with_attr("strides", AttrValue::Ints(vec![1, s_h, s_w, 1])),
        )?;
        let shape = vec![
            input.shape[0],
            padding.output_dim(input.shape[1], k_h, s_h)?,
            padding.output_dim(input.shape[2], k_w, s_w)?,
            input.shape[3],
        ];
        Ok(self.register(name, LayerOutput { name: output, shape }))
    }

    /// Fully connected layer without activation.
    ///
    /// Rank-4 inputs are flattened with a `Reshape` first, which needs every
    /// non-batch dimension to be known.
    pub fn fc(&mut self, num_out: i64, name: &str) -> Result<&mut Self> {
        let input = self.terminal()?;
        let layer = self.scoped(name);

        let (feed_in, dim) = if input.shape.len() == 4 {
            let dim = input.shape[1..]
                .iter()
                .try_fold(1i64, |acc, &d| (d > 0).then_some(acc * d))
                .with_context(|| {
                    format!("cannot flatten {} with shape {:?}", input.name, input.shape)
                })?;
            let target = self.add(
                Node::new(format!("{layer}/Reshape/shape"), "Const")
                    .with_attr("dtype", AttrValue::Type(DataType::Int32))
                    .with_attr(
                        "value",
                        AttrValue::Tensor(TensorValue::from_i32(vec![2], vec![-1, dim as i32])?),
                    ),
            )?;
            let reshaped = self.add(
                Node::new(format!("{layer}/Reshape"), "Reshape")
                    .with_input(&input.name)
                    .with_input(target)
                    .with_attr("T", AttrValue::Type(DataType::Float))
                    .with_attr("Tshape", AttrValue::Type(DataType::Int32)),
            )?;
            (reshaped, dim)
        } else {
            (input.name.clone(), input.channels()?)
        };

        let weights = self
            .session
            .declare_variable(&format!("{layer}/weights"), &[dim, num_out])?;
        let biases = self
            .session
            .declare_variable(&format!("{layer}/biases"), &[num_out])?;
        let matmul = self.add(
            Node::new(format!("{layer}/{name}/MatMul"), "MatMul")
                .with_input(feed_in)
                .with_input(weights)
                .with_attr("T", AttrValue::Type(DataType::Float))
                .with_attr("transpose_a", AttrValue::Bool(false))
                .with_attr("transpose_b", AttrValue::Bool(false)),
        )?;
        let output = self.add(
            Node::new(format!("{layer}/{name}"), "BiasAdd")
                .with_input(matmul)
                .with_input(biases)
                .with_attr("T", AttrValue::Type(DataType::Float))
                .with_attr("data_format", AttrValue::Str("NHWC".into())),
        )?;

        let shape = vec![input.shape[0], num_out];
        Ok(self.register(name, LayerOutput { name: output, shape }))
    }

    /// Numerically stable softmax along `axis`; the final division carries `name`.
    pub fn softmax(&mut self, axis: i32, name: &str) -> Result<&mut Self> {
        let input = self.terminal()?;
        let scope = self.scope.clone();
        let reduce = |name: &str, op: &str, reduced: &str, indices: &str| {
            Node::new(name, op)
                .with_input(reduced)
                .with_input(indices)
                .with_attr("T", AttrValue::Type(DataType::Float))
                .with_attr("Tidx", AttrValue::Type(DataType::Int32))
                .with_attr("keep_dims", AttrValue::Bool(true))
        };

        let max_name = self.op_name(&scope, "Max");
        let max_axis = self.add(axis_const(&format!("{max_name}/reduction_indices"), axis))?;
        let max = self.add(reduce(&max_name, "Max", &input.name, &max_axis))?;
        let shifted = self.add(
            Node::new(self.op_name(&scope, "sub"), "Sub")
                .with_input(&input.name)
                .with_input(max)
                .with_attr("T", AttrValue::Type(DataType::Float)),
        )?;
        let exp = self.add(
            Node::new(self.op_name(&scope, "Exp"), "Exp")
                .with_input(shifted)
                .with_attr("T", AttrValue::Type(DataType::Float)),
        )?;
        let sum_name = self.op_name(&scope, "Sum");
        let sum_axis = self.add(axis_const(&format!("{sum_name}/reduction_indices"), axis))?;
        let sum = self.add(reduce(&sum_name, "Sum", &exp, &sum_axis))?;
        let output = self.add(
            Node::new(self.scoped(name), "RealDiv")
                .with_input(exp)
                .with_input(sum)
                .with_attr("T", AttrValue::Type(DataType::Float)),
        )?;

        let shape = input.shape.clone();
        Ok(self.register(name, LayerOutput { name: output, shape }))
    }
}

fn axis_const(name: &str, axis: i32) -> Node {
    Node::new(name, "Const")
        .with_attr("dtype", AttrValue::Type(DataType::Int32))
        .with_attr("value", AttrValue::Tensor(TensorValue::scalar_i32(axis)))
}

/// The three cascaded MTCNN stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Proposal network, fully convolutional over any image size.
    PNet,
    /// Refinement network on 24x24 crops.
    RNet,
    /// Output network on 48x48 crops, adds five facial landmarks.
    ONet,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::PNet, StageKind::RNet, StageKind::ONet];

    pub fn scope(self) -> &'static str {
        match self {
            StageKind::PNet => "pnet",
            StageKind::RNet => "rnet",
            StageKind::ONet => "onet",
        }
    }

    /// File name of the stage's parameters inside the parameter directory.
    pub fn params_file(self) -> &'static str {
        match self {
            StageKind::PNet => "det1.safetensors",
            StageKind::RNet => "det2.safetensors",
            StageKind::ONet => "det3.safetensors",
        }
    }

    pub fn input_shape(self) -> [i64; 4] {
        match self {
            StageKind::PNet => [-1, -1, -1, 3],
            StageKind::RNet => [-1, 24, 24, 3],
            StageKind::ONet => [-1, 48, 48, 3],
        }
    }

    /// Layers whose outputs the detector consumes, in output order.
    fn output_layers(self) -> &'static [&'static str] {
        match self {
            StageKind::PNet => &["conv4-2", "prob1"],
            StageKind::RNet => &["conv5-2", "prob1"],
            StageKind::ONet => &["conv6-2", "conv6-3", "prob1"],
        }
    }

    fn setup(self, net: &mut NetworkBuilder<'_>) -> Result<()> {
        use Padding::{Same, Valid};

        match self {
            StageKind::PNet => {
                net.feed("data")?
                    .conv(3, 3, 10, 1, 1, Valid, "conv1")?
                    .prelu("PReLU1")?
                    .max_pool(2, 2, 2, 2, Same, "pool1")?
                    .conv(3, 3, 16, 1, 1, Valid, "conv2")?
                    .prelu("PReLU2")?
                    .conv(3, 3, 32, 1, 1, Valid, "conv3")?
                    .prelu("PReLU3")?
                    .conv(1, 1, 2, 1, 1, Same, "conv4-1")?
                    .softmax(3, "prob1")?;
                net.feed("PReLU3")?.conv(1, 1, 4, 1, 1, Same, "conv4-2")?;
            }
            StageKind::RNet => {
                net.feed("data")?
                    .conv(3, 3, 28, 1, 1, Valid, "conv1")?
                    .prelu("prelu1")?
                    .max_pool(3, 3, 2, 2, Same, "pool1")?
                    .conv(3, 3, 48, 1, 1, Valid, "conv2")?
                    .prelu("prelu2")?
                    .max_pool(3, 3, 2, 2, Valid, "pool2")?
                    .conv(2, 2, 64, 1, 1, Valid, "conv3")?
                    .prelu("prelu3")?
                    .fc(128, "conv4")?
                    .prelu("prelu4")?
                    .fc(2, "conv5-1")?
                    .softmax(1, "prob1")?;
                net.feed("prelu4")?.fc(4, "conv5-2")?;
            }
            StageKind::ONet => {
                net.feed("data")?
                    .conv(3, 3, 32, 1, 1, Valid, "conv1")?
                    .prelu("prelu1")?
                    .max_pool(3, 3, 2, 2, Same, "pool1")?
                    .conv(3, 3, 64, 1, 1, Valid, "conv2")?
                    .prelu("prelu2")?
                    .max_pool(3, 3, 2, 2, Valid, "pool2")?
                    .conv(3, 3, 64, 1, 1, Valid, "conv3")?
                    .prelu("prelu3")?
                    .max_pool(2, 2, 2, 2, Same, "pool3")?
                    .conv(2, 2, 128, 1, 1, Valid, "conv4")?
                    .prelu("prelu4")?
                    .fc(256, "conv5")?
                    .prelu("prelu5")?
                    .fc(2, "conv6-1")?
                    .softmax(1, "prob1")?;
                net.feed("prelu5")?.fc(4, "conv6-2")?;
                net.feed("prelu5")?.fc(10, "conv6-3")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scope())
    }
}

/// Entry points of one built stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHandle {
    pub kind: StageKind,
    /// Placeholder to feed images into.
    pub input: String,
    /// Output node names, in the order the detector reads them.
    pub outputs: Vec<String>,
}

/// Handles for all three stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mtcnn {
    pub pnet: StageHandle,
    pub rnet: StageHandle,
    pub onet: StageHandle,
}

impl Mtcnn {
    pub fn stages(&self) -> [&StageHandle; 3] {
        [&self.pnet, &self.rnet, &self.onet]
    }

    /// All output node names across the cascade.
    pub fn output_names(&self) -> Vec<&str> {
        self.stages()
            .into_iter()
            .flat_map(|stage| stage.outputs.iter().map(String::as_str))
            .collect()
    }
}

/// Add one stage's layers to the session graph without loading parameters.
pub fn build_stage(session: &mut Session, kind: StageKind) -> Result<StageHandle> {
    let mut net = NetworkBuilder::new(session, kind.scope());
    net.input(&kind.input_shape())?;
    kind.setup(&mut net)
        .with_context(|| format!("failed to build {kind}"))?;

    let input = net
        .layer("data")
        .map(|layer| layer.name.clone())
        .with_context(|| format!("{kind} has no input layer"))?;
    let outputs = kind
        .output_layers()
        .iter()
        .map(|layer| {
            net.layer(layer)
                .map(|output| output.name.clone())
                .with_context(|| format!("{kind} is missing output layer {layer}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StageHandle {
        kind,
        input,
        outputs,
    })
}

/// Build PNet, RNet and ONet into `session` and load their trained parameters.
///
/// # Arguments
///
/// * `session` - The context that receives the graph and variable values.
/// * `params_dir` - Directory holding `det1/2/3.safetensors`; `None` uses
///   `$MTCNN_PARAMS_DIR` or `models/mtcnn`.
pub fn create_mtcnn(session: &mut Session, params_dir: Option<&Path>) -> Result<Mtcnn> {
    let _guard = timing_guard("mtcnn_core::create_mtcnn", log::Level::Debug);
    let source = ParameterSource::open(params_dir)?;
    info!("Loading MTCNN parameters from {}", source.root().display());

    let mut handles = Vec::with_capacity(StageKind::ALL.len());
    for kind in StageKind::ALL {
        let handle = build_stage(session, kind)?;
        let params = source.load_stage(kind)?;
        let assigned = params.assign_into(session, kind.scope())?;
        debug!("{kind}: {assigned} parameter tensors loaded");
        handles.push(handle);
    }

    let missing = session.uninitialized_variables();
    anyhow::ensure!(
        missing.is_empty(),
        "parameter source {} left {} variable(s) unset: {}",
        source.root().display(),
        missing.len(),
        missing.join(", ")
    );

    let [pnet, rnet, onet]: [StageHandle; 3] = handles
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected three MTCNN stages"))?;
    Ok(Mtcnn { pnet, rnet, onet })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn built(kind: StageKind) -> (Session, StageHandle) {
        let mut session = Session::default();
        let handle = build_stage(&mut session, kind).expect("build stage");
        (session, handle)
    }

    fn var_shape(graph: &Graph, name: &str) -> Vec<i64> {
        match graph.node(name).and_then(|node| node.attr("shape")) {
            Some(AttrValue::Shape(shape)) => shape.clone(),
            other => panic!("{name} has no shape attr: {other:?}"),
        }
    }

    #[test]
    fn stage_outputs_match_the_published_node_names() {
        let names: Vec<String> = StageKind::ALL
            .into_iter()
            .flat_map(|kind| built(kind).1.outputs)
            .collect();
        assert_eq!(names, OUTPUT_NODE_NAMES.map(String::from).to_vec());
    }

    #[test]
    fn pnet_is_fully_convolutional() {
        let (session, handle) = built(StageKind::PNet);
        assert_eq!(handle.input, "pnet/input");
        let graph = session.graph();
        assert_eq!(var_shape(graph, "pnet/conv1/weights"), vec![3, 3, 3, 10]);
        assert_eq!(var_shape(graph, "pnet/PReLU3/alpha"), vec![32]);
        assert_eq!(var_shape(graph, "pnet/conv4-2/weights"), vec![1, 1, 32, 4]);
        assert!(
            !graph.nodes().iter().any(|node| node.op == "Reshape"),
            "pnet must not flatten"
        );
    }

    #[test]
    fn fc_widths_follow_from_static_shapes() {
        let (session, _) = built(StageKind::RNet);
        assert_eq!(var_shape(session.graph(), "rnet/conv4/weights"), vec![576, 128]);
        assert_eq!(var_shape(session.graph(), "rnet/conv5-2/weights"), vec![128, 4]);

        let (session, _) = built(StageKind::ONet);
        assert_eq!(var_shape(session.graph(), "onet/conv5/weights"), vec![1152, 256]);
        assert_eq!(var_shape(session.graph(), "onet/conv6-3/weights"), vec![256, 10]);
    }

    #[test]
    fn prelu_expands_into_tensorflow_primitives() {
        let (session, _) = built(StageKind::PNet);
        let graph = session.graph();
        for (suffix, op) in [
            ("Relu", "Relu"),
            ("Neg", "Neg"),
            ("Relu_1", "Relu"),
            ("Neg_1", "Neg"),
            ("Mul", "Mul"),
            ("add", "Add"),
        ] {
            let node = graph
                .node(&format!("pnet/PReLU1/{suffix}"))
                .unwrap_or_else(|| panic!("missing pnet/PReLU1/{suffix}"));
            assert_eq!(node.op, op);
        }
        let mul = graph.node("pnet/PReLU1/Mul").unwrap();
        assert_eq!(mul.inputs[0], "pnet/PReLU1/alpha/read");
    }

    #[test]
    fn softmax_reduces_over_the_requested_axis() {
        let (session, _) = built(StageKind::RNet);
        let graph = session.graph();
        let prob = graph.node("rnet/prob1").unwrap();
        assert_eq!(prob.op, "RealDiv");
        assert_eq!(prob.inputs, vec!["rnet/Exp", "rnet/Sum"]);
        match graph
            .node("rnet/Max/reduction_indices")
            .and_then(|node| node.attr("value"))
        {
            Some(AttrValue::Tensor(tensor)) => {
                assert_eq!(tensor, &TensorValue::scalar_i32(1))
            }
            other => panic!("unexpected reduction indices {other:?}"),
        }
    }

    #[test]
    fn feeding_an_unknown_layer_fails() {
        let mut session = Session::default();
        let mut net = NetworkBuilder::new(&mut session, "pnet");
        let err = net.feed("data").err().expect("no layers yet");
        assert!(format!("{err}").contains("unknown layer name fed: data"));
    }

    #[test]
    fn valid_windows_must_fit() {
        let mut session = Session::default();
        let mut net = NetworkBuilder::new(&mut session, "tiny");
        net.input(&[-1, 2, 2, 3]).unwrap();
        let err = net
            .conv(3, 3, 4, 1, 1, Padding::Valid, "conv1")
            .err()
            .expect("3x3 VALID on 2x2");
        assert!(format!("{err}").contains("does not fit"));
    }

    #[test]
    fn building_a_stage_twice_collides() {
        let mut session = Session::default();
        build_stage(&mut session, StageKind::RNet).unwrap();
        assert!(build_stage(&mut session, StageKind::RNet).is_err());
    }
}
