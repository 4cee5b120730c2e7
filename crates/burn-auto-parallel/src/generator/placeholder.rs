use derive_new::new;

use super::{StrategyGenerator, local_bytes};
use crate::sharding::{DeviceMesh, ShardingSpec};
use crate::strategy::{OperationData, ShardingStrategy, TrainCycleItem};

/// Graph inputs are fed replicated to every device.
#[derive(new)]
pub struct PlaceholderGenerator<'a> {
    mesh: &'a DeviceMesh,
    output: OperationData,
}

impl StrategyGenerator for PlaceholderGenerator<'_> {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn generate(&self) -> Vec<ShardingStrategy> {
        let spec = ShardingSpec::replicated();
        let bytes = local_bytes(&self.output, &spec, self.mesh);

        vec![
            ShardingStrategy::new("Replica Placeholder", vec![(self.output.clone(), spec)])
                .with_memory_cost(TrainCycleItem::summed(bytes, 0.0)),
        ]
    }
}

/// Every value returned by the graph is gathered to a replicated layout.
#[derive(new)]
pub struct OutputGenerator<'a> {
    mesh: &'a DeviceMesh,
    inputs: Vec<OperationData>,
}

impl StrategyGenerator for OutputGenerator<'_> {
    fn name(&self) -> &str {
        "output"
    }

    fn generate(&self) -> Vec<ShardingStrategy> {
        let spec = ShardingSpec::replicated();
        let bytes = self
            .inputs
            .iter()
            .map(|input| local_bytes(input, &spec, self.mesh))
            .sum::<f64>();
        let specs = self
            .inputs
            .iter()
            .map(|input| (input.clone(), spec.clone()))
            .collect();

        vec![
            ShardingStrategy::new("Replica Output", specs)
                .with_memory_cost(TrainCycleItem::summed(bytes, 0.0)),
        ]
    }
}
