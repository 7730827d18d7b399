use std::{fs, path::Path};

use anyhow::Result;
use mtcnn_core::{
    AttrValue, EventWriter, FreezeOptions, GraphSummary, OUTPUT_NODE_NAMES, Session,
    SessionConfig, StageKind, TensorData, convert_variables_to_constants, create_mtcnn,
    decode_graph, fixtures::write_synthetic_params, proto::event::What, read_events,
    write_graph_def,
};
use tempfile::tempdir;
use tract_tensorflow::prelude::*;

fn build_session(params: &Path) -> Result<Session> {
    let mut session = Session::new(SessionConfig::cpu_only());
    create_mtcnn(&mut session, Some(params))?;
    Ok(session)
}

fn freeze_to(session: &Session, path: &Path) -> Result<usize> {
    let frozen =
        convert_variables_to_constants(session, &OUTPUT_NODE_NAMES, &FreezeOptions::default())?;
    write_graph_def(&frozen.graph, path)
}

#[test]
fn frozen_model_loads_in_tensorflow_runtime() -> Result<()> {
    let dir = tempdir()?;
    let params = dir.path().join("params");
    write_synthetic_params(&params, 11)?;
    let session = build_session(&params)?;
    let model_path = dir.path().join("mtcnn.pb");
    freeze_to(&session, &model_path)?;

    let tf = tract_tensorflow::tensorflow();
    let proto = tf.read_frozen_model(&mut fs::File::open(&model_path)?)?;
    for output in OUTPUT_NODE_NAMES {
        assert!(
            proto.node.iter().any(|node| node.name == output),
            "missing output {output}"
        );
    }
    assert!(
        proto
            .node
            .iter()
            .all(|node| !matches!(node.op.as_str(), "VariableV2" | "Assign")),
        "frozen graph still holds variables"
    );

    let model = tf.model_for_path(&model_path)?;
    for output in OUTPUT_NODE_NAMES {
        model.node_by_name(output)?;
    }
    Ok(())
}

#[test]
fn folded_constants_carry_the_assigned_values() -> Result<()> {
    let dir = tempdir()?;
    write_synthetic_params(dir.path(), 17)?;
    let session = build_session(dir.path())?;
    let model_path = dir.path().join("mtcnn.pb");
    freeze_to(&session, &model_path)?;
    let written = decode_graph(&fs::read(&model_path)?)?;

    for name in session.variable_names() {
        let expected = AttrValue::Tensor(session.value(name).expect("assigned").clone());
        let node = written.node(name).expect("variable kept");
        assert_eq!(node.op, "Const", "{name}");
        assert_eq!(node.attr("value"), Some(&expected), "{name}");
    }
    Ok(())
}

#[test]
fn freezing_folds_every_variable_and_drops_assignments() -> Result<()> {
    let dir = tempdir()?;
    write_synthetic_params(dir.path(), 5)?;
    let session = build_session(dir.path())?;
    let variables = session.variable_names().len();
    assert!(session.graph().contains("pnet/conv1/weights/Assign"));

    let frozen =
        convert_variables_to_constants(&session, &OUTPUT_NODE_NAMES, &FreezeOptions::default())?;
    assert_eq!(frozen.frozen_variables, variables);
    assert!(frozen.graph.len() < session.graph().len());

    let summary = GraphSummary::from_graph(&frozen.graph);
    assert!(summary.is_frozen_mtcnn(), "{summary:?}");
    assert_eq!(summary.ops.get("Assign"), None);
    assert_eq!(summary.ops.get("Placeholder"), Some(&3));
    assert_eq!(summary.ops.get("RealDiv"), Some(&3));
    Ok(())
}

#[test]
fn repeated_runs_are_byte_identical() -> Result<()> {
    let dir = tempdir()?;
    write_synthetic_params(dir.path(), 42)?;
    let first = dir.path().join("first.pb");
    let second = dir.path().join("second.pb");
    freeze_to(&build_session(dir.path())?, &first)?;
    freeze_to(&build_session(dir.path())?, &second)?;
    assert_eq!(fs::read(first)?, fs::read(second)?);
    Ok(())
}

#[test]
fn missing_parameter_directory_is_fatal() {
    let dir = tempdir().expect("tempdir");
    let mut session = Session::default();
    let err = create_mtcnn(&mut session, Some(dir.path().join("nowhere").as_path())).unwrap_err();
    assert!(format!("{err}").contains("parameter directory not found"));
    assert!(session.graph().is_empty());
}

#[test]
fn mismatched_parameter_shapes_are_fatal() -> Result<()> {
    let dir = tempdir()?;
    write_synthetic_params(dir.path(), 1)?;
    // RNet parameters in the ONet slot
    fs::copy(
        dir.path().join(StageKind::RNet.params_file()),
        dir.path().join(StageKind::ONet.params_file()),
    )?;
    let mut session = Session::default();
    let err = create_mtcnn(&mut session, Some(dir.path())).unwrap_err();
    assert!(format!("{err:#}").contains("onet/"), "{err:#}");
    Ok(())
}

#[test]
fn event_log_describes_the_live_graph() -> Result<()> {
    let dir = tempdir()?;
    write_synthetic_params(dir.path(), 9)?;
    let session = build_session(dir.path())?;

    let mut writer = EventWriter::create(dir.path().join("log"))?;
    writer.add_graph(session.graph())?;
    let path = writer.close()?;

    let events = read_events(path)?;
    assert_eq!(events.len(), 2);
    match &events[1].what {
        Some(What::GraphDef(bytes)) => {
            let summary = GraphSummary::from_bytes(bytes)?;
            assert_eq!(summary.node_count, session.graph().len());
            assert!(!summary.variables.is_empty());
        }
        other => panic!("expected graph event, got {other:?}"),
    }
    Ok(())
}

/// Batch-1 NHWC feature map.
struct FeatureMap {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f32>,
}

impl FeatureMap {
    fn at(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

fn floats<'a>(session: &'a Session, name: &str) -> (Vec<usize>, &'a [f32]) {
    let value = session.value(name).unwrap_or_else(|| panic!("{name} unassigned"));
    let shape = value.shape().iter().map(|&d| d as usize).collect();
    match value.data() {
        TensorData::Float(values) => (shape, values.as_slice()),
        other => panic!("{name} is not float: {other:?}"),
    }
}

fn conv_valid(session: &Session, layer: &str, input: &FeatureMap) -> FeatureMap {
    let (shape, weights) = floats(session, &format!("{layer}/weights"));
    let (_, biases) = floats(session, &format!("{layer}/biases"));
    let (k_h, k_w, c_in, c_out) = (shape[0], shape[1], shape[2], shape[3]);
    assert_eq!(c_in, input.channels);
    let (height, width) = (input.height - k_h + 1, input.width - k_w + 1);

    let mut data = Vec::with_capacity(height * width * c_out);
    for y in 0..height {
        for x in 0..width {
            for o in 0..c_out {
                let mut acc = biases[o];
                for ky in 0..k_h {
                    for kx in 0..k_w {
                        for i in 0..c_in {
                            let w = weights[((ky * k_w + kx) * c_in + i) * c_out + o];
                            acc += input.at(y + ky, x + kx, i) * w;
                        }
                    }
                }
                data.push(acc);
            }
        }
    }
    FeatureMap {
        height,
        width,
        channels: c_out,
        data,
    }
}

fn prelu(session: &Session, layer: &str, values: &mut [f32]) {
    let (_, alpha) = floats(session, &format!("{layer}/alpha"));
    for (index, value) in values.iter_mut().enumerate() {
        if *value < 0.0 {
            *value *= alpha[index % alpha.len()];
        }
    }
}

fn max_pool(input: &FeatureMap, kernel: usize, stride: usize, same: bool) -> FeatureMap {
    let (height, width, pad_top, pad_left) = if same {
        let out = |extent: usize| extent.div_ceil(stride);
        let pad = |extent: usize| {
            ((out(extent) - 1) * stride + kernel).saturating_sub(extent) / 2
        };
        (
            out(input.height),
            out(input.width),
            pad(input.height),
            pad(input.width),
        )
    } else {
        let out = |extent: usize| (extent - kernel) / stride + 1;
        (out(input.height), out(input.width), 0, 0)
    };

    let mut data = Vec::with_capacity(height * width * input.channels);
    for y in 0..height {
        for x in 0..width {
            for c in 0..input.channels {
                let mut best = f32::NEG_INFINITY;
                for ky in 0..kernel {
                    for kx in 0..kernel {
                        let sy = (y * stride + ky).checked_sub(pad_top);
                        let sx = (x * stride + kx).checked_sub(pad_left);
                        if let (Some(sy), Some(sx)) = (sy, sx)
                            && sy < input.height
                            && sx < input.width
                        {
                            best = best.max(input.at(sy, sx, c));
                        }
                    }
                }
                data.push(best);
            }
        }
    }
    FeatureMap {
        height,
        width,
        channels: input.channels,
        data,
    }
}

fn dense(session: &Session, layer: &str, input: &[f32]) -> Vec<f32> {
    let (shape, weights) = floats(session, &format!("{layer}/weights"));
    let (_, biases) = floats(session, &format!("{layer}/biases"));
    let (rows, cols) = (shape[0], shape[1]);
    assert_eq!(rows, input.len());
    (0..cols)
        .map(|o| {
            input
                .iter()
                .enumerate()
                .fold(biases[o], |acc, (i, x)| acc + x * weights[i * cols + o])
        })
        .collect()
}

/// RNet box regression evaluated directly on the session parameters.
fn rnet_regression(session: &Session, input: FeatureMap) -> Vec<f32> {
    let mut conv1 = conv_valid(session, "rnet/conv1", &input);
    prelu(session, "rnet/prelu1", &mut conv1.data);
    let pool1 = max_pool(&conv1, 3, 2, true);
    let mut conv2 = conv_valid(session, "rnet/conv2", &pool1);
    prelu(session, "rnet/prelu2", &mut conv2.data);
    let pool2 = max_pool(&conv2, 3, 2, false);
    let mut conv3 = conv_valid(session, "rnet/conv3", &pool2);
    prelu(session, "rnet/prelu3", &mut conv3.data);
    let mut conv4 = dense(session, "rnet/conv4", &conv3.data);
    prelu(session, "rnet/prelu4", &mut conv4);
    dense(session, "rnet/conv5-2", &conv4)
}

// tract-tensorflow has no `Exp` kernel, so the softmax `prob1` heads cannot be
// executed there; the RNet regression head covers conv, PReLU, pooling,
// reshape and dense layers.
#[test]
fn frozen_rnet_regression_matches_the_live_parameters() -> Result<()> {
    let dir = tempdir()?;
    let params = dir.path().join("params");
    write_synthetic_params(&params, 23)?;
    let session = build_session(&params)?;
    let model_path = dir.path().join("mtcnn.pb");
    freeze_to(&session, &model_path)?;

    let pixels: Vec<f32> = (0..24 * 24 * 3)
        .map(|i| ((i * 37) % 255) as f32 / 127.5 - 1.0)
        .collect();
    let model = tract_tensorflow::tensorflow()
        .model_for_path(&model_path)?
        .with_input_names(["rnet/input"])?
        .with_output_names(["rnet/conv5-2/conv5-2"])?
        .with_input_fact(0, f32::fact([1, 24, 24, 3]).into())?
        .into_optimized()?
        .into_runnable()?;
    let input = tract_ndarray::Array4::from_shape_vec((1, 24, 24, 3), pixels.clone())?;
    let outputs = model.run(tvec!(input.into_tensor().into()))?;
    assert_eq!(outputs[0].shape(), &[1, 4]);
    let actual = outputs[0].as_slice::<f32>()?;

    let expected = rnet_regression(
        &session,
        FeatureMap {
            height: 24,
            width: 24,
            channels: 3,
            data: pixels,
        },
    );
    assert!(expected.iter().any(|value| *value != 0.0));
    for (a, e) in actual.iter().zip(&expected) {
        assert!((a - e).abs() <= 1e-4, "runtime {actual:?} vs reference {expected:?}");
    }
    Ok(())
}
