use super::{ComputationGraph, NodeId};

impl ComputationGraph {
    /// Groups nodes into levels such that every node comes after all of its args.
    ///
    /// Nodes of the same level have no data dependency on each other and can be processed
    /// concurrently once every previous level is done. Within a level, nodes keep their creation
    /// order.
    pub fn topological_levels(&self) -> Vec<Vec<NodeId>> {
        let mut depths = vec![0; self.len()];
        let mut levels: Vec<Vec<NodeId>> = Vec::new();

        // Args are always created before their users, so one pass in creation order suffices.
        for node in self.nodes() {
            let depth = node
                .args
                .iter()
                .map(|arg| depths[arg.value] + 1)
                .max()
                .unwrap_or(0);
            depths[node.id.value] = depth;

            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(node.id);
        }

        levels
    }

    /// Nodes in a topological order, level by level.
    pub fn topological_order(&self) -> Vec<NodeId> {
        self.topological_levels().into_iter().flatten().collect()
    }
}
