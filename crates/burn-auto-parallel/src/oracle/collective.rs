use alloc::sync::Arc;

use super::{CollectivePattern, CommAction, LayoutTransition, LayoutTransitionOracle};
use crate::sharding::{DeviceMesh, ShardingSpec};
use crate::strategy::TrainCycleItem;
use crate::tensor::TensorMeta;

/// Oracle decomposing a transition into per-axis collectives costed with the mesh's alpha-beta
/// model.
///
/// The transition runs in two phases. First, every dimension drops the mesh axes that are not a
/// prefix of its target axes, innermost first: an axis moving to another dimension whose
/// current axes are the prefix of the target up to that axis is moved with an all-to-all,
/// any other axis is all-gathered. Then the missing target axes are split locally. Each
/// collective is costed on the local shard size at that step.
///
/// The total of a transition is `forward + backward`.
#[derive(Clone, Debug)]
pub struct CollectiveCostOracle {
    mesh: Arc<DeviceMesh>,
}

impl CollectiveCostOracle {
    /// Creates an oracle for the given mesh.
    pub fn new(mesh: Arc<DeviceMesh>) -> Self {
        Self { mesh }
    }

    fn local_bytes(&self, meta: &TensorMeta, spec: &ShardingSpec) -> f64 {
        meta.size_bytes() as f64 / spec.total_shards(&self.mesh) as f64
    }

    /// Cost of `action` applied to `current`, given the layout after it.
    fn action_cost(
        &self,
        meta: &TensorMeta,
        action: &CommAction,
        current: &ShardingSpec,
        next: &ShardingSpec,
    ) -> (f64, f64) {
        let mesh = &self.mesh;
        let axis = action.mesh_axis;

        match action.pattern {
            CollectivePattern::GatherFwdSplitBwd => {
                let gathered = self.local_bytes(meta, next);
                (mesh.all_gather_cost(gathered, axis), mesh.shard_cost(axis))
            }
            CollectivePattern::AllToAllFwdAllToAllBwd => {
                let bytes = self.local_bytes(meta, current);
                let cost = mesh.all_to_all_cost(bytes, axis);
                (cost, cost)
            }
            CollectivePattern::SplitFwdGatherBwd => {
                let gathered = self.local_bytes(meta, current);
                (mesh.shard_cost(axis), mesh.all_gather_cost(gathered, axis))
            }
        }
    }

    fn actions(&self, rank: usize, source: &ShardingSpec, target: &ShardingSpec) -> Vec<CommAction> {
        let mut current = source.clone();
        let mut actions = Vec::new();
        let rank = source
            .partitions()
            .chain(target.partitions())
            .map(|(dim, _)| dim + 1)
            .fold(rank, usize::max);

        for dim in 0..rank {
            while !target.axes(dim).starts_with(current.axes(dim)) {
                let Some(&axis) = current.axes(dim).last() else {
                    break;
                };

                let moved_to = target.dim_of_axis(axis).filter(|target_dim| {
                    let target_axes = target.axes(*target_dim);
                    *target_dim != dim
                        && target_axes
                            .iter()
                            .position(|a| *a == axis)
                            .is_some_and(|pos| current.axes(*target_dim) == &target_axes[..pos])
                });

                let action = match moved_to {
                    Some(target_dim) => CommAction {
                        pattern: CollectivePattern::AllToAllFwdAllToAllBwd,
                        mesh_axis: axis,
                        dim,
                        target_dim: Some(target_dim),
                    },
                    None => CommAction {
                        pattern: CollectivePattern::GatherFwdSplitBwd,
                        mesh_axis: axis,
                        dim,
                        target_dim: None,
                    },
                };
                current = action.apply(&current);
                actions.push(action);
            }
        }

        for dim in 0..rank {
            let done = current.axes(dim).len();
            for &axis in target.axes(dim).iter().skip(done) {
                let action = CommAction {
                    pattern: CollectivePattern::SplitFwdGatherBwd,
                    mesh_axis: axis,
                    dim,
                    target_dim: None,
                };
                current = action.apply(&current);
                actions.push(action);
            }
        }

        actions
    }
}

impl LayoutTransitionOracle for CollectiveCostOracle {
    fn transition(
        &self,
        meta: &TensorMeta,
        source: &ShardingSpec,
        target: &ShardingSpec,
    ) -> LayoutTransition {
        if source == target {
            return LayoutTransition::identity();
        }

        let actions = self.actions(meta.rank(), source, target);
        let mut current = source.clone();
        let (mut forward, mut backward) = (0.0, 0.0);

        for action in actions.iter() {
            let next = action.apply(&current);
            let (fwd, bwd) = self.action_cost(meta, action, &current, &next);
            forward += fwd;
            backward += bwd;
            current = next;
        }

        LayoutTransition {
            cost: TrainCycleItem::summed(forward, backward),
            actions,
        }
    }
}
