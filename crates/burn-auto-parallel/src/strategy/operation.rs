use alloc::collections::BTreeMap;

use crate::graph::{Node, NodeId};
use crate::tensor::TensorMeta;

/// Role of a piece of data in the operation of a node.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum OperationDataType {
    /// Value produced by another node and passed as an argument.
    Argument,
    /// Trainable parameter owned by the node's module.
    Parameter,
    /// Non-trainable state owned by the node's module.
    Buffer,
    /// Value produced by the node.
    Output,
}

/// Physical data an operation reads or writes.
///
/// Arguments and outputs carry the [id](NodeId) of the node holding the value, which is how a
/// consumer's operand is correlated with its producer's output.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OperationData {
    /// Physical name of the data: the producing node's name or the parameter name.
    pub name: String,
    /// Role of the data in the operation.
    pub data_type: OperationDataType,
    /// Tensor metadata, when the data is a tensor.
    pub meta: Option<TensorMeta>,
    /// Node holding the value, for arguments and outputs.
    pub node: Option<NodeId>,
}

/// Maps the logical operand names a strategy generator works with (`"input"`, `"other"`,
/// `"output"`, ...) to the physical data of a node.
pub type OperationDataMapping = BTreeMap<String, OperationData>;

impl OperationData {
    /// The output of `node` consumed as an argument.
    pub fn argument(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            data_type: OperationDataType::Argument,
            meta: node.meta.clone(),
            node: Some(node.id),
        }
    }

    /// The output produced by `node`.
    pub fn output(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            data_type: OperationDataType::Output,
            meta: node.meta.clone(),
            node: Some(node.id),
        }
    }

    /// A module parameter.
    pub fn parameter<S: Into<String>>(name: S, meta: TensorMeta) -> Self {
        Self {
            name: name.into(),
            data_type: OperationDataType::Parameter,
            meta: Some(meta),
            node: None,
        }
    }

    /// A module buffer.
    pub fn buffer<S: Into<String>>(name: S, meta: TensorMeta) -> Self {
        Self {
            name: name.into(),
            data_type: OperationDataType::Buffer,
            meta: Some(meta),
            node: None,
        }
    }

    /// Same data seen through different metadata, e.g. a transposed logical view.
    pub fn with_meta(mut self, meta: TensorMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Whether this is an argument produced by `node`.
    pub fn is_argument_from(&self, node: NodeId) -> bool {
        self.data_type == OperationDataType::Argument && self.node == Some(node)
    }
}
