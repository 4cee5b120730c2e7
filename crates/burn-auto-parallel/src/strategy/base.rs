use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::ops::Deref;

use super::{OperationData, OperationDataType, TrainCycleItem};
use crate::graph::NodeId;
use crate::sharding::ShardingSpec;

/// Published strategies of every processed node.
///
/// A node is present once its handler has run, even when it ended up without candidates.
pub type StrategyMap = BTreeMap<NodeId, Arc<StrategiesVector>>;

/// One candidate assignment of layouts to every operand and result of a node.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardingStrategy {
    /// Human readable name, e.g. `"S0R = S0R x RR"`.
    pub name: String,
    /// Layout of each physical operand, in the order the generator produced them.
    pub sharding_specs: Vec<(OperationData, ShardingSpec)>,
    /// Estimated computation cost.
    pub compute_cost: TrainCycleItem,
    /// Estimated communication cost inside the operation itself.
    pub communication_cost: TrainCycleItem,
    /// Bytes held per device (activations forward, gradients backward).
    pub memory_cost: TrainCycleItem,
    /// For each predecessor, the cost of moving from each of its candidates to this strategy.
    ///
    /// Entry `i` of `resharding_costs[p]` corresponds to candidate `i` of `p`'s
    /// [strategies vector](StrategiesVector).
    pub resharding_costs: BTreeMap<NodeId, Vec<TrainCycleItem>>,
}

impl ShardingStrategy {
    /// Creates a strategy with zero costs.
    pub fn new<S: Into<String>>(name: S, sharding_specs: Vec<(OperationData, ShardingSpec)>) -> Self {
        Self {
            name: name.into(),
            sharding_specs,
            compute_cost: TrainCycleItem::zero(),
            communication_cost: TrainCycleItem::zero(),
            memory_cost: TrainCycleItem::zero(),
            resharding_costs: BTreeMap::new(),
        }
    }

    /// Sets the compute cost.
    pub fn with_compute_cost(mut self, cost: TrainCycleItem) -> Self {
        self.compute_cost = cost;
        self
    }

    /// Sets the communication cost.
    pub fn with_communication_cost(mut self, cost: TrainCycleItem) -> Self {
        self.communication_cost = cost;
        self
    }

    /// Sets the memory cost.
    pub fn with_memory_cost(mut self, cost: TrainCycleItem) -> Self {
        self.memory_cost = cost;
        self
    }

    /// Layout of the given operand.
    pub fn sharding_spec(&self, op_data: &OperationData) -> Option<&ShardingSpec> {
        self.sharding_specs
            .iter()
            .find_map(|(data, spec)| (data == op_data).then_some(spec))
    }

    /// Operand with the given physical name.
    pub fn op_data_by_name(&self, name: &str) -> Option<&OperationData> {
        self.sharding_specs
            .iter()
            .find_map(|(data, _)| (data.name == name).then_some(data))
    }

    /// Layout of the operand with the given physical name.
    pub fn sharding_spec_by_name(&self, name: &str) -> Option<&ShardingSpec> {
        self.sharding_specs
            .iter()
            .find_map(|(data, spec)| (data.name == name).then_some(spec))
    }

    /// The result of the node and its layout.
    pub fn output(&self) -> Option<(&OperationData, &ShardingSpec)> {
        self.sharding_specs
            .iter()
            .find(|(data, _)| data.data_type == OperationDataType::Output)
            .map(|(data, spec)| (data, spec))
    }

    /// Every operand produced by `node`, with its layout.
    pub fn arguments_from(
        &self,
        node: NodeId,
    ) -> impl Iterator<Item = (&OperationData, &ShardingSpec)> + '_ {
        self.sharding_specs
            .iter()
            .filter(move |(data, _)| data.is_argument_from(node))
            .map(|(data, spec)| (data, spec))
    }

    /// Replaces `old` (and its layout) by `new`, keeping its position.
    ///
    /// Returns whether `old` was found.
    pub fn replace_operand(
        &mut self,
        old: &OperationData,
        new: OperationData,
        spec: ShardingSpec,
    ) -> bool {
        match self.sharding_specs.iter_mut().find(|(data, _)| data == old) {
            Some(entry) => {
                *entry = (new, spec);
                true
            }
            None => false,
        }
    }
}

/// The ordered candidate strategies of one node.
///
/// The order is the index space referenced by the successors'
/// [resharding costs](ShardingStrategy::resharding_costs). The vector can only be read once
/// built: it derefs to a slice and is published behind an `Arc` by the planner.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategiesVector {
    node: NodeId,
    strategies: Vec<ShardingStrategy>,
}

impl StrategiesVector {
    /// Creates an empty vector for `node`.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            strategies: Vec::new(),
        }
    }

    /// Node owning the strategies.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn extend<I: IntoIterator<Item = ShardingStrategy>>(&mut self, strategies: I) {
        self.strategies.extend(strategies);
    }
}

impl Deref for StrategiesVector {
    type Target = [ShardingStrategy];

    fn deref(&self) -> &Self::Target {
        &self.strategies
    }
}

impl<'a> IntoIterator for &'a StrategiesVector {
    type Item = &'a ShardingStrategy;
    type IntoIter = core::slice::Iter<'a, ShardingStrategy>;

    fn into_iter(self) -> Self::IntoIter {
        self.strategies.iter()
    }
}
