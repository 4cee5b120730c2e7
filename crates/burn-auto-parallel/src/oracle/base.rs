use crate::sharding::ShardingSpec;
use crate::strategy::TrainCycleItem;
use crate::tensor::TensorMeta;

/// Estimates the cost of moving a tensor from one layout to another.
///
/// Implementations must be deterministic and side-effect free (caching aside), return a zero
/// total for identical layouts, and a finite non-negative cost for any two valid layouts of the
/// same tensor on the same mesh.
pub trait LayoutTransitionOracle: Send + Sync {
    /// Cost and collective sequence turning `source` into `target` for a tensor described by
    /// `meta`.
    fn transition(
        &self,
        meta: &TensorMeta,
        source: &ShardingSpec,
        target: &ShardingSpec,
    ) -> LayoutTransition;
}

/// Result of a [layout transition](LayoutTransitionOracle::transition) query.
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutTransition {
    /// Cost of the whole transition.
    pub cost: TrainCycleItem,
    /// Collectives applied in order.
    pub actions: Vec<CommAction>,
}

impl LayoutTransition {
    /// The free transition between identical layouts.
    pub fn identity() -> Self {
        Self {
            cost: TrainCycleItem::zero(),
            actions: Vec::new(),
        }
    }
}

/// Collective communication pattern, named after its forward and backward behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectivePattern {
    /// All-gather in the forward pass, local split of the gradient in the backward pass.
    GatherFwdSplitBwd,
    /// All-to-all in both passes.
    AllToAllFwdAllToAllBwd,
    /// Local split in the forward pass, all-gather of the gradient in the backward pass.
    SplitFwdGatherBwd,
}

/// One step of a layout transition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommAction {
    /// Collective performed.
    pub pattern: CollectivePattern,
    /// Mesh axis the collective runs over.
    pub mesh_axis: usize,
    /// Tensor dimension the axis is removed from (gather, all-to-all) or added to (split).
    pub dim: usize,
    /// Tensor dimension the axis is moved to by an all-to-all.
    pub target_dim: Option<usize>,
}

impl CommAction {
    /// Layout obtained by applying this action to `spec`.
    pub fn apply(&self, spec: &ShardingSpec) -> ShardingSpec {
        let without = |spec: &ShardingSpec, dim: usize| {
            let axes = spec
                .axes(dim)
                .iter()
                .copied()
                .filter(|axis| *axis != self.mesh_axis)
                .collect::<Vec<_>>();
            spec.clone().with_shard(dim, axes)
        };
        let with = |spec: ShardingSpec, dim: usize| {
            let mut axes = spec.axes(dim).to_vec();
            axes.push(self.mesh_axis);
            spec.with_shard(dim, axes)
        };

        match self.pattern {
            CollectivePattern::GatherFwdSplitBwd => without(spec, self.dim),
            CollectivePattern::AllToAllFwdAllToAllBwd => {
                let spec = without(spec, self.dim);
                match self.target_dim {
                    Some(target_dim) => with(spec, target_dim),
                    None => spec,
                }
            }
            CollectivePattern::SplitFwdGatherBwd => with(spec.clone(), self.dim),
        }
    }
}
