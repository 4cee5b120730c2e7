use core::fmt;

use derive_new::new;

use super::Module;
use crate::tensor::TensorMeta;

/// Stable identifier of a [node](Node) within its [graph](ComputationGraph).
#[derive(new, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct NodeId {
    /// Position of the node in the graph arena.
    pub value: usize,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.value)
    }
}

/// Id and name of a node, used to attribute errors and diagnostics.
#[derive(new, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeLabel {
    /// Stable id of the node.
    pub id: NodeId,
    /// Name given to the node by the front end.
    pub name: String,
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// What a node computes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeOp {
    /// A graph input.
    Placeholder,
    /// A stateless function, identified by name (e.g. `"add"`).
    CallFunction(String),
    /// A call to a module of the owning module tree, identified by dotted path.
    CallModule(String),
    /// The graph output; its args are the returned values.
    Output,
}

/// Vertex of a [computation graph](ComputationGraph).
#[derive(Clone, Debug)]
pub struct Node {
    /// Stable id of the node.
    pub id: NodeId,
    /// Name of the node, unique within the graph.
    pub name: String,
    /// Operation computed by the node.
    pub op: NodeOp,
    /// Nodes whose outputs are the arguments of this node, in argument order.
    pub args: Vec<NodeId>,
    /// Nodes consuming the output of this node.
    pub users: Vec<NodeId>,
    /// Metadata of the value produced by the node, when it is a tensor.
    pub meta: Option<TensorMeta>,
}

impl Node {
    /// Label used to attribute errors to this node.
    pub fn label(&self) -> NodeLabel {
        NodeLabel::new(self.id, self.name.clone())
    }

    /// Distinct argument nodes, in first-use order.
    pub fn predecessors(&self) -> Vec<NodeId> {
        let mut predecessors = Vec::with_capacity(self.args.len());
        for arg in self.args.iter() {
            if !predecessors.contains(arg) {
                predecessors.push(*arg);
            }
        }
        predecessors
    }

    /// Distinct consumer nodes, in first-use order.
    pub fn successors(&self) -> &[NodeId] {
        &self.users
    }
}

/// Computation graph produced by a front end: nodes in creation order, their data-flow edges,
/// and the module tree owning the parameters of `call_module` nodes.
///
/// The planner only reads the graph; the strategies it produces are kept on the side, keyed
/// by [node id](NodeId).
#[derive(Clone, Debug, Default)]
pub struct ComputationGraph {
    nodes: Vec<Node>,
    owning_module: Option<Module>,
}

impl ComputationGraph {
    /// Creates an empty graph without an owning module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the module tree resolved by `call_module` nodes.
    pub fn with_owning_module(mut self, module: Module) -> Self {
        self.owning_module = Some(module);
        self
    }

    /// The module tree owning the graph's stateful operators.
    pub fn owning_module(&self) -> Option<&Module> {
        self.owning_module.as_ref()
    }

    /// Appends a node and registers it as a user of each of its args.
    ///
    /// # Panics
    ///
    /// If an arg refers to a node that was not added before, which would make the graph cyclic.
    /// See [`try_add_node`](Self::try_add_node) for the fallible version.
    pub fn add_node<S: Into<String>>(
        &mut self,
        name: S,
        op: NodeOp,
        args: Vec<NodeId>,
        meta: Option<TensorMeta>,
    ) -> NodeId {
        match self.try_add_node(name, op, args, meta) {
            Some(id) => id,
            None => panic!("node args must refer to nodes added before"),
        }
    }

    /// Appends a node like [`add_node`](Self::add_node), or returns `None` and leaves the graph
    /// untouched if an arg refers to a node that was not added before.
    pub fn try_add_node<S: Into<String>>(
        &mut self,
        name: S,
        op: NodeOp,
        args: Vec<NodeId>,
        meta: Option<TensorMeta>,
    ) -> Option<NodeId> {
        if args.iter().any(|arg| arg.value >= self.nodes.len()) {
            return None;
        }
        let id = NodeId::new(self.nodes.len());

        for arg in args.iter() {
            let users = &mut self.nodes[arg.value].users;
            if !users.contains(&id) {
                users.push(id);
            }
        }

        self.nodes.push(Node {
            id,
            name: name.into(),
            op,
            args,
            users: Vec::new(),
            meta,
        });
        Some(id)
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.value)
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_add_node_wires_users() {
        let mut graph = ComputationGraph::new();
        let meta = Some(TensorMeta::new([4], DType::F32));
        let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta.clone());
        let y = graph.add_node("y", NodeOp::CallFunction("add".into()), vec![x, x], meta);

        assert_eq!(graph.node(x).unwrap().successors(), &[y]);
        assert_eq!(graph.node(y).unwrap().predecessors(), vec![x]);
        assert_eq!(graph.node(y).unwrap().label().to_string(), "y (#1)");
    }

    #[test]
    fn test_try_add_node_rejects_unknown_arg() {
        let mut graph = ComputationGraph::new();
        let meta = Some(TensorMeta::new([4], DType::F32));
        let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta.clone());

        let id = graph.try_add_node(
            "y",
            NodeOp::CallFunction("add".into()),
            vec![x, NodeId::new(1)],
            meta,
        );

        assert_eq!(id, None);
        assert_eq!(graph.len(), 1);
        assert!(graph.node(x).unwrap().successors().is_empty());
    }

    #[test]
    #[should_panic = "node args must refer to nodes added before"]
    fn test_add_node_panics_on_unknown_arg() {
        let mut graph = ComputationGraph::new();

        graph.add_node("y", NodeOp::Placeholder, vec![NodeId::new(0)], None);
    }
}
