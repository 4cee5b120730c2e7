use derive_new::new;

use super::{StrategyGenerator, local_bytes, shape_of};
use crate::sharding::{DeviceMesh, ShardingSpec};
use crate::strategy::{OperationData, ShardingStrategy, TrainCycleItem};

/// Strategies of `output[..., n] = input[..., k] x other[k, n] (+ bias[n])`.
///
/// `other` is the logical `[k, n]` view of the weight. Handlers whose physical weight is laid
/// out differently map the layouts back in their post-processing.
#[derive(new)]
pub struct LinearGenerator<'a> {
    mesh: &'a DeviceMesh,
    input: OperationData,
    other: OperationData,
    bias: Option<OperationData>,
    output: OperationData,
}

/// Layouts of one candidate, before costing.
struct Candidate {
    name: String,
    input: ShardingSpec,
    other: ShardingSpec,
    output: ShardingSpec,
    /// Axis over which the forward output is partial and must be all-reduced.
    reduce_output: Option<usize>,
    /// Axis over which the weight gradient is partial.
    reduce_weight_grad: Option<usize>,
    /// Axis over which the input gradient is partial.
    reduce_input_grad: Option<usize>,
}

impl Candidate {
    fn new(name: String, input: ShardingSpec, other: ShardingSpec, output: ShardingSpec) -> Self {
        Self {
            name,
            input,
            other,
            output,
            reduce_output: None,
            reduce_weight_grad: None,
            reduce_input_grad: None,
        }
    }
}

impl LinearGenerator<'_> {
    fn candidates(&self) -> Vec<Candidate> {
        let input_last = shape_of(&self.input).len().saturating_sub(1);
        let output_last = shape_of(&self.output).len().saturating_sub(1);
        let batched = input_last > 0;
        let axes = 0..self.mesh.ndim();
        let replicated = ShardingSpec::replicated;

        let mut candidates = vec![Candidate::new(
            "RR = RR x RR".to_string(),
            replicated(),
            replicated(),
            replicated(),
        )];

        for axis in axes.clone() {
            if batched {
                // Data parallel.
                candidates.push(Candidate {
                    reduce_weight_grad: Some(axis),
                    ..Candidate::new(
                        format!("S{axis}R = S{axis}R x RR"),
                        replicated().with_shard(0, [axis]),
                        replicated(),
                        replicated().with_shard(0, [axis]),
                    )
                });
            }

            // Column parallel.
            candidates.push(Candidate {
                reduce_input_grad: Some(axis),
                ..Candidate::new(
                    format!("RS{axis} = RR x RS{axis}"),
                    replicated(),
                    replicated().with_shard(1, [axis]),
                    replicated().with_shard(output_last, [axis]),
                )
            });

            // Row parallel.
            candidates.push(Candidate {
                reduce_output: Some(axis),
                ..Candidate::new(
                    format!("RR = RS{axis} x S{axis}R"),
                    replicated().with_shard(input_last, [axis]),
                    replicated().with_shard(0, [axis]),
                    replicated(),
                )
            });
        }

        if batched {
            for axis0 in axes.clone() {
                for axis1 in axes.clone().filter(|axis1| *axis1 != axis0) {
                    candidates.push(Candidate {
                        reduce_weight_grad: Some(axis0),
                        reduce_input_grad: Some(axis1),
                        ..Candidate::new(
                            format!("S{axis0}S{axis1} = S{axis0}R x RS{axis1}"),
                            replicated().with_shard(0, [axis0]),
                            replicated().with_shard(1, [axis1]),
                            replicated()
                                .with_shard(0, [axis0])
                                .with_shard(output_last, [axis1]),
                        )
                    });
                    candidates.push(Candidate {
                        reduce_output: Some(axis1),
                        reduce_weight_grad: Some(axis0),
                        ..Candidate::new(
                            format!("S{axis0}R = S{axis0}S{axis1} x S{axis1}R"),
                            replicated()
                                .with_shard(0, [axis0])
                                .with_shard(input_last, [axis1]),
                            replicated().with_shard(0, [axis1]),
                            replicated().with_shard(0, [axis0]),
                        )
                    });
                }
            }
        }

        candidates
    }

    fn strategy(&self, candidate: Candidate) -> ShardingStrategy {
        let mesh = self.mesh;
        let k = shape_of(&self.other).first().copied().unwrap_or(1) as f64;
        let output_numel = shape_of(&self.output).iter().product::<usize>() as f64;

        let mut used_axes = Vec::new();
        for spec in [&candidate.input, &candidate.other, &candidate.output] {
            for (_, axes) in spec.partitions() {
                for axis in axes {
                    if !used_axes.contains(axis) {
                        used_axes.push(*axis);
                    }
                }
            }
        }
        let flops = 2.0 * output_numel * k / mesh.num_shards(&used_axes) as f64;

        // Bias follows the last dimension of the output.
        let bias_spec = {
            let output_last = shape_of(&self.output).len().saturating_sub(1);
            ShardingSpec::new([(0, candidate.output.axes(output_last).to_vec())])
        };

        let input_bytes = local_bytes(&self.input, &candidate.input, mesh);
        let other_bytes = local_bytes(&self.other, &candidate.other, mesh);
        let output_bytes = local_bytes(&self.output, &candidate.output, mesh);
        let bias_bytes = self
            .bias
            .as_ref()
            .map_or(0.0, |bias| local_bytes(bias, &bias_spec, mesh));

        let forward_comm = candidate
            .reduce_output
            .map_or(0.0, |axis| mesh.all_reduce_cost(output_bytes, axis));
        let backward_comm = candidate
            .reduce_weight_grad
            .map_or(0.0, |axis| mesh.all_reduce_cost(other_bytes + bias_bytes, axis))
            + candidate
                .reduce_input_grad
                .map_or(0.0, |axis| mesh.all_reduce_cost(input_bytes, axis));

        let memory = input_bytes + other_bytes + output_bytes + bias_bytes;

        let mut specs = vec![
            (self.input.clone(), candidate.input),
            (self.other.clone(), candidate.other),
        ];
        if let Some(bias) = self.bias.as_ref() {
            specs.push((bias.clone(), bias_spec));
        }
        specs.push((self.output.clone(), candidate.output));

        ShardingStrategy::new(candidate.name, specs)
            .with_compute_cost(TrainCycleItem::summed(flops, 2.0 * flops))
            .with_communication_cost(TrainCycleItem::summed(forward_comm, backward_comm))
            .with_memory_cost(TrainCycleItem::summed(memory, memory))
    }
}

impl StrategyGenerator for LinearGenerator<'_> {
    fn name(&self) -> &str {
        "linear"
    }

    fn generate(&self) -> Vec<ShardingStrategy> {
        self.candidates()
            .into_iter()
            .map(|candidate| self.strategy(candidate))
            .collect()
    }
}
