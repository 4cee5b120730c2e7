use crate::graph::NodeLabel;
use crate::sharding::{LayoutViolation, ShardingSpec};

/// Errors raised while generating and annotating sharding strategies.
///
/// Every variant names the node it is attributable to, so a failure can be traced back to one
/// operator instance of the original model.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AutoParallelError {
    /// The graph or operator binding is structurally unusable for the node's handler.
    #[error("Configuration error on node {node}: {reason}")]
    Configuration {
        /// Offending node.
        node: NodeLabel,
        /// What is missing or inconsistent.
        reason: String,
    },
    /// A predecessor had not published its strategies when the node was processed.
    #[error(
        "Node {node} was processed before its predecessor {predecessor} published its strategies"
    )]
    Ordering {
        /// Node being processed.
        node: NodeLabel,
        /// Predecessor without strategies.
        predecessor: NodeLabel,
    },
    /// A candidate layout cannot be realized for the operand's tensor shape.
    #[error(
        "Invalid layout {} for operand '{operand}' of node {node} with shape {shape:?}: {violation}",
        layout.sharding_sequence(shape.len())
    )]
    InvalidLayout {
        /// Node owning the candidate strategy.
        node: NodeLabel,
        /// Name of the operand whose layout is invalid.
        operand: String,
        /// Rejected layout.
        layout: ShardingSpec,
        /// Global shape of the operand.
        shape: Vec<usize>,
        /// Violated rule.
        violation: LayoutViolation,
    },
}

impl AutoParallelError {
    pub(crate) fn configuration<S: Into<String>>(node: NodeLabel, reason: S) -> Self {
        Self::Configuration {
            node,
            reason: reason.into(),
        }
    }

    /// The node the error is attributed to.
    pub fn node(&self) -> &NodeLabel {
        match self {
            Self::Configuration { node, .. }
            | Self::Ordering { node, .. }
            | Self::InvalidLayout { node, .. } => node,
        }
    }
}
