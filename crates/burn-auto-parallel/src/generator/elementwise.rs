use derive_new::new;

use super::{StrategyGenerator, compact, local_bytes, shape_of};
use crate::sharding::{DeviceMesh, ShardingSpec};
use crate::strategy::{OperationData, ShardingStrategy, TrainCycleItem};

/// Strategies of element-wise operations with numpy-style broadcasting.
///
/// The output layout is enumerated and every input follows it on the dimensions it shares
/// with the output. Broadcast dimensions of an input stay replicated, and their gradients are
/// all-reduced over the axes sharding the output.
#[derive(new)]
pub struct ElementwiseGenerator<'a> {
    mesh: &'a DeviceMesh,
    inputs: Vec<OperationData>,
    output: OperationData,
}

impl ElementwiseGenerator<'_> {
    fn output_specs(&self) -> Vec<ShardingSpec> {
        let rank = shape_of(&self.output).len();
        let ndim = self.mesh.ndim();
        let mut specs = vec![ShardingSpec::replicated()];

        for dim in 0..rank {
            for axis in 0..ndim {
                specs.push(ShardingSpec::replicated().with_shard(dim, [axis]));
            }
        }

        if ndim > 1 {
            for dim in 0..rank {
                specs.push(ShardingSpec::replicated().with_shard(dim, (0..ndim).collect::<Vec<_>>()));
            }
        }

        if ndim == 2 {
            for dim0 in 0..rank {
                for dim1 in (0..rank).filter(|dim1| *dim1 != dim0) {
                    specs.push(
                        ShardingSpec::replicated()
                            .with_shard(dim0, [0])
                            .with_shard(dim1, [1]),
                    );
                }
            }
        }

        specs
    }

    /// Layout of `input` following the output layout `spec`.
    fn input_spec(&self, input: &OperationData, spec: &ShardingSpec) -> ShardingSpec {
        let output_shape = shape_of(&self.output);
        let input_shape = shape_of(input);
        let offset = output_shape.len().saturating_sub(input_shape.len());

        ShardingSpec::new(spec.partitions().filter_map(|(dim, axes)| {
            let input_dim = dim.checked_sub(offset)?;
            (input_shape.get(input_dim) == output_shape.get(dim))
                .then(|| (input_dim, axes.to_vec()))
        }))
    }

    fn strategy(&self, output_spec: ShardingSpec) -> ShardingStrategy {
        let output_shape = shape_of(&self.output);
        let numel = output_shape.iter().product::<usize>() as f64;
        let shards = output_spec.total_shards(self.mesh) as f64;

        let mut specs = Vec::with_capacity(self.inputs.len() + 1);
        let mut memory = local_bytes(&self.output, &output_spec, self.mesh);
        let mut gradient_sync = 0.0;
        let mut names = Vec::with_capacity(self.inputs.len());

        for input in self.inputs.iter() {
            let input_spec = self.input_spec(input, &output_spec);
            let bytes = local_bytes(input, &input_spec, self.mesh);

            // Axes sharding the output but not the input hold partial gradients of the input.
            for (_, axes) in output_spec.partitions() {
                for axis in axes {
                    if input_spec.dim_of_axis(*axis).is_none() {
                        gradient_sync += self.mesh.all_reduce_cost(bytes, *axis);
                    }
                }
            }

            memory += bytes;
            names.push(compact(&input_spec, shape_of(input).len()));
            specs.push((input.clone(), input_spec));
        }

        let name = format!(
            "{} = {}",
            compact(&output_spec, output_shape.len()),
            names.join(" x ")
        );
        specs.push((self.output.clone(), output_spec));

        ShardingStrategy::new(name, specs)
            .with_compute_cost(TrainCycleItem::summed(numel / shards, numel / shards))
            .with_communication_cost(TrainCycleItem::summed(0.0, gradient_sync))
            .with_memory_cost(TrainCycleItem::summed(memory, memory))
    }
}

impl StrategyGenerator for ElementwiseGenerator<'_> {
    fn name(&self) -> &str {
        "elementwise"
    }

    fn generate(&self) -> Vec<ShardingStrategy> {
        self.output_specs()
            .into_iter()
            .map(|spec| self.strategy(spec))
            .collect()
    }
}
