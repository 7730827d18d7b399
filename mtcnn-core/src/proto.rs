//! TensorFlow wire messages and conversion from the typed [`Graph`].
//!
//! Only the messages the converter writes or reads are mirrored here. Field
//! numbers match `graph.proto`, `node_def.proto`, `attr_value.proto`,
//! `tensor.proto`, `tensor_shape.proto`, `versions.proto` and `event.proto`
//! from upstream TensorFlow, so any runtime that reads those formats can read
//! our output. Attribute maps are `BTreeMap`s so the encoding is byte-stable.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use prost::Message;

use crate::graph::{self, AttrValue as Attr, DataType as Dtype, Graph, Node, TensorData};

/// GraphDef producer version stamped on exported graphs.
pub const GRAPH_PRODUCER: i32 = 27;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    DtInvalid = 0,
    DtFloat = 1,
    DtDouble = 2,
    DtInt32 = 3,
    DtUint8 = 4,
    DtInt16 = 5,
    DtInt8 = 6,
    DtString = 7,
    DtInt64 = 9,
    DtBool = 10,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GraphDef {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeDef>,
    #[prost(message, optional, tag = "4")]
    pub versions: Option<VersionDef>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionDef {
    #[prost(int32, tag = "1")]
    pub producer: i32,
    #[prost(int32, tag = "2")]
    pub min_consumer: i32,
    #[prost(int32, repeated, tag = "3")]
    pub bad_consumers: Vec<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeDef {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub op: String,
    #[prost(string, repeated, tag = "3")]
    pub input: Vec<String>,
    #[prost(string, tag = "4")]
    pub device: String,
    #[prost(btree_map = "string, message", tag = "5")]
    pub attr: BTreeMap<String, AttrValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttrValue {
    #[prost(oneof = "attr_value::Value", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub value: Option<attr_value::Value>,
}

pub mod attr_value {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListValue {
        #[prost(bytes = "vec", repeated, tag = "2")]
        pub s: Vec<Vec<u8>>,
        #[prost(int64, repeated, tag = "3")]
        pub i: Vec<i64>,
        #[prost(float, repeated, tag = "4")]
        pub f: Vec<f32>,
        #[prost(bool, repeated, tag = "5")]
        pub b: Vec<bool>,
        #[prost(enumeration = "super::DataType", repeated, tag = "6")]
        pub r#type: Vec<i32>,
        #[prost(message, repeated, tag = "7")]
        pub shape: Vec<super::TensorShapeProto>,
        #[prost(message, repeated, tag = "8")]
        pub tensor: Vec<super::TensorProto>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "1")]
        List(ListValue),
        #[prost(bytes, tag = "2")]
        S(Vec<u8>),
        #[prost(int64, tag = "3")]
        I(i64),
        #[prost(float, tag = "4")]
        F(f32),
        #[prost(bool, tag = "5")]
        B(bool),
        #[prost(enumeration = "super::DataType", tag = "6")]
        Type(i32),
        #[prost(message, tag = "7")]
        Shape(super::TensorShapeProto),
        #[prost(message, tag = "8")]
        Tensor(super::TensorProto),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "2")]
    pub dim: Vec<tensor_shape_proto::Dim>,
    #[prost(bool, tag = "3")]
    pub unknown_rank: bool,
}

pub mod tensor_shape_proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Dim {
        #[prost(int64, tag = "1")]
        pub size: i64,
        #[prost(string, tag = "2")]
        pub name: String,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorProto {
    #[prost(enumeration = "DataType", tag = "1")]
    pub dtype: i32,
    #[prost(message, optional, tag = "2")]
    pub tensor_shape: Option<TensorShapeProto>,
    #[prost(int32, tag = "3")]
    pub version_number: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub tensor_content: Vec<u8>,
    #[prost(float, repeated, tag = "5")]
    pub float_val: Vec<f32>,
    #[prost(int32, repeated, tag = "7")]
    pub int_val: Vec<i32>,
}

/// One record of a TensorBoard event file.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(double, tag = "1")]
    pub wall_time: f64,
    #[prost(int64, tag = "2")]
    pub step: i64,
    #[prost(oneof = "event::What", tags = "3, 4")]
    pub what: Option<event::What>,
}

pub mod event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum What {
        #[prost(string, tag = "3")]
        FileVersion(String),
        /// A serialized `GraphDef`.
        #[prost(bytes, tag = "4")]
        GraphDef(Vec<u8>),
    }
}

impl From<Dtype> for DataType {
    fn from(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Float => DataType::DtFloat,
            Dtype::Int32 => DataType::DtInt32,
        }
    }
}

impl TryFrom<DataType> for Dtype {
    type Error = anyhow::Error;

    fn try_from(dtype: DataType) -> Result<Self> {
        match dtype {
            DataType::DtFloat => Ok(Dtype::Float),
            DataType::DtInt32 => Ok(Dtype::Int32),
            other => Err(anyhow!("unsupported tensor dtype {other:?}")),
        }
    }
}

fn shape_proto(dims: &[i64]) -> TensorShapeProto {
    TensorShapeProto {
        dim: dims
            .iter()
            .map(|&size| tensor_shape_proto::Dim {
                size,
                name: String::new(),
            })
            .collect(),
        unknown_rank: false,
    }
}

/// Encode a tensor the way TensorFlow does: scalars inline in the typed value
/// field, everything else as little-endian `tensor_content`.
fn tensor_proto(tensor: &graph::TensorValue) -> TensorProto {
    let mut proto = TensorProto {
        dtype: DataType::from(tensor.dtype()) as i32,
        tensor_shape: Some(shape_proto(tensor.shape())),
        ..Default::default()
    };
    let scalar = tensor.shape().is_empty();
    match tensor.data() {
        TensorData::Float(values) if scalar => proto.float_val = values.clone(),
        TensorData::Int32(values) if scalar => proto.int_val = values.clone(),
        TensorData::Float(values) => {
            proto.tensor_content = values.iter().flat_map(|v| v.to_le_bytes()).collect()
        }
        TensorData::Int32(values) => {
            proto.tensor_content = values.iter().flat_map(|v| v.to_le_bytes()).collect()
        }
    }
    proto
}

fn tensor_from_proto(proto: &TensorProto) -> Result<graph::TensorValue> {
    let dtype = DataType::try_from(proto.dtype)
        .map_err(|_| anyhow!("unknown tensor dtype {}", proto.dtype))?;
    let shape: Vec<i64> = proto
        .tensor_shape
        .as_ref()
        .map(|shape| shape.dim.iter().map(|dim| dim.size).collect())
        .unwrap_or_default();
    let count = graph::element_count(&shape)
        .with_context(|| format!("tensor shape {shape:?} is not fully defined"))?;

    let data = match Dtype::try_from(dtype)? {
        Dtype::Float if !proto.tensor_content.is_empty() => {
            le_to_native(TensorData::Float(bytemuck::pod_collect_to_vec(
                &proto.tensor_content,
            )))
        }
        Dtype::Int32 if !proto.tensor_content.is_empty() => {
            le_to_native(TensorData::Int32(bytemuck::pod_collect_to_vec(
                &proto.tensor_content,
            )))
        }
        Dtype::Float => TensorData::Float(splat(&proto.float_val, count)),
        Dtype::Int32 => TensorData::Int32(splat(&proto.int_val, count)),
    };
    graph::TensorValue::new(shape, data).context("malformed tensor payload")
}

/// TensorFlow may store a single value for a constant-filled tensor.
fn splat<T: Copy>(values: &[T], count: usize) -> Vec<T> {
    match values {
        [single] if count != 1 => vec![*single; count],
        _ => values.to_vec(),
    }
}

fn le_to_native(data: TensorData) -> TensorData {
    if cfg!(target_endian = "little") {
        return data;
    }
    match data {
        TensorData::Float(values) => TensorData::Float(
            values
                .into_iter()
                .map(|v| f32::from_bits(u32::from_le(v.to_bits())))
                .collect(),
        ),
        TensorData::Int32(values) => {
            TensorData::Int32(values.into_iter().map(i32::from_le).collect())
        }
    }
}

fn attr_proto(attr: &Attr) -> AttrValue {
    use attr_value::{ListValue, Value};

    let value = match attr {
        Attr::Type(dtype) => Value::Type(DataType::from(*dtype) as i32),
        Attr::Shape(dims) => Value::Shape(shape_proto(dims)),
        Attr::Tensor(tensor) => Value::Tensor(tensor_proto(tensor)),
        Attr::Int(value) => Value::I(*value),
        Attr::Ints(values) => Value::List(ListValue {
            i: values.clone(),
            ..Default::default()
        }),
        Attr::Str(value) => Value::S(value.as_bytes().to_vec()),
        Attr::Strs(values) => Value::List(ListValue {
            s: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
            ..Default::default()
        }),
        Attr::Bool(value) => Value::B(*value),
    };
    AttrValue { value: Some(value) }
}

fn attr_from_proto(proto: &AttrValue) -> Result<Attr> {
    use attr_value::Value;

    let value = proto.value.as_ref().context("attribute has no value")?;
    Ok(match value {
        Value::Type(raw) => {
            let dtype =
                DataType::try_from(*raw).map_err(|_| anyhow!("unknown attribute dtype {raw}"))?;
            Attr::Type(Dtype::try_from(dtype)?)
        }
        Value::Shape(shape) => Attr::Shape(shape.dim.iter().map(|dim| dim.size).collect()),
        Value::Tensor(tensor) => Attr::Tensor(tensor_from_proto(tensor)?),
        Value::I(v) => Attr::Int(*v),
        Value::B(v) => Attr::Bool(*v),
        Value::S(bytes) => Attr::Str(String::from_utf8_lossy(bytes).into_owned()),
        Value::List(list) if !list.s.is_empty() => Attr::Strs(
            list.s
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .collect(),
        ),
        Value::List(list) => Attr::Ints(list.i.clone()),
        Value::F(v) => anyhow::bail!("float attributes are not used by this graph ({v})"),
    })
}

/// Convert a typed graph into its wire message.
pub fn graph_def(graph: &Graph) -> GraphDef {
    GraphDef {
        node: graph
            .nodes()
            .iter()
            .map(|node| NodeDef {
                name: node.name.clone(),
                op: node.op.clone(),
                input: node.inputs.clone(),
                device: node.device.clone(),
                attr: node
                    .attrs
                    .iter()
                    .map(|(key, value)| (key.clone(), attr_proto(value)))
                    .collect(),
            })
            .collect(),
        versions: Some(VersionDef {
            producer: GRAPH_PRODUCER,
            ..Default::default()
        }),
    }
}

/// Canonical binary encoding of a graph.
pub fn encode_graph(graph: &Graph) -> Vec<u8> {
    graph_def(graph).encode_to_vec()
}

/// Rebuild a typed graph from a serialized `GraphDef`.
pub fn decode_graph(bytes: &[u8]) -> Result<Graph> {
    let proto = GraphDef::decode(bytes).context("failed to decode GraphDef protobuf")?;
    let mut graph = Graph::new();
    for def in proto.node {
        let mut node = Node::new(def.name, def.op);
        node.inputs = def.input;
        node.device = def.device;
        for (key, value) in &def.attr {
            let attr = attr_from_proto(value)
                .with_context(|| format!("node '{}' attribute '{key}'", node.name))?;
            node.attrs.insert(key.clone(), attr);
        }
        graph.add_node(node)?;
    }
    Ok(graph)
}
