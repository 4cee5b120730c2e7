use super::{HandlerContext, ModuleHandler, NodeHandler};
use crate::error::AutoParallelError;
use crate::generator::{LinearGenerator, StrategyGenerator};
use crate::strategy::{OperationData, OperationDataMapping, ShardingStrategy};

/// Handler of linear layers.
///
/// The weight is stored `[out, in]` while the generator reasons about `other = weight^T`, so
/// post-processing swaps the weight layout back to its physical dimensions.
pub struct LinearModuleHandler<'a> {
    module: ModuleHandler<'a>,
}

impl<'a> LinearModuleHandler<'a> {
    /// Resolves the linear layer called by `ctx.node`.
    pub fn new(ctx: HandlerContext<'a>) -> Result<Self, AutoParallelError> {
        Ok(Self {
            module: ModuleHandler::new(ctx)?,
        })
    }

    fn physical_weight(&self) -> Result<OperationData, AutoParallelError> {
        let weight = self.module.parameter("weight")?;
        if weight.rank() != 2 {
            return Err(self.module.context().configuration_error(format!(
                "linear weight must have rank 2, got shape {:?}",
                weight.shape
            )));
        }

        Ok(OperationData::parameter("weight", weight.clone()))
    }

    fn logical_weight(&self) -> Result<OperationData, AutoParallelError> {
        let physical = self.physical_weight()?;
        let logical = physical
            .meta
            .as_ref()
            .map(|meta| meta.transposed(0, 1))
            .ok_or_else(|| {
                self.module
                    .context()
                    .configuration_error("linear weight has no tensor metadata")
            })?;

        Ok(physical.with_meta(logical))
    }
}

impl NodeHandler for LinearModuleHandler<'_> {
    fn context(&self) -> &HandlerContext<'_> {
        self.module.context()
    }

    fn get_operation_data_mapping(&self) -> Result<OperationDataMapping, AutoParallelError> {
        let ctx = self.module.context();
        let mut mapping = OperationDataMapping::new();

        mapping.insert("input".to_string(), ctx.argument(0)?);
        mapping.insert("other".to_string(), self.logical_weight()?);
        if let Some(bias) = self.module.named_parameters.get("bias") {
            mapping.insert(
                "bias".to_string(),
                OperationData::parameter("bias", bias.clone()),
            );
        }
        mapping.insert("output".to_string(), ctx.output()?);

        Ok(mapping)
    }

    fn get_strategy_generator(
        &self,
    ) -> Result<Vec<Box<dyn StrategyGenerator + '_>>, AutoParallelError> {
        let mut mapping = self.get_operation_data_mapping()?;
        let ctx = self.module.context();
        let mut take = |name: &str| {
            mapping
                .remove(name)
                .ok_or_else(|| ctx.configuration_error(format!("missing operand '{name}'")))
        };
        let input = take("input")?;
        let other = take("other")?;
        let output = take("output")?;
        let bias = mapping.remove("bias");

        let generator: Box<dyn StrategyGenerator + '_> = Box::new(LinearGenerator::new(
            ctx.mesh, input, other, bias, output,
        ));
        Ok(vec![generator])
    }

    fn post_process(
        &self,
        mut strategy: ShardingStrategy,
    ) -> Result<Vec<ShardingStrategy>, AutoParallelError> {
        let logical = self.logical_weight()?;
        let spec = strategy
            .sharding_spec(&logical)
            .map(|spec| spec.transposed(0, 1))
            .ok_or_else(|| {
                self.module.context().configuration_error(format!(
                    "strategy '{}' has no layout for the weight",
                    strategy.name
                ))
            })?;

        strategy.replace_operand(&logical, self.physical_weight()?, spec);
        Ok(vec![strategy])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ComputationGraph, Module, NodeOp};
    use crate::oracle::CollectiveCostOracle;
    use crate::sharding::{DeviceMesh, ShardingSpec};
    use crate::strategy::{StrategiesVector, StrategyMap};
    use crate::tensor::{DType, TensorMeta};
    use alloc::sync::Arc;

    #[test]
    fn test_weight_layout_is_transposed_back() {
        let fc = Module::new("linear")
            .with_parameter("weight", TensorMeta::new([4, 8], DType::F32))
            .with_parameter("bias", TensorMeta::new([4], DType::F32));
        let mut graph = ComputationGraph::new();
        let x = graph.add_node(
            "x",
            NodeOp::Placeholder,
            vec![],
            Some(TensorMeta::new([16, 8], DType::F32)),
        );
        let fc_node = graph.add_node(
            "fc",
            NodeOp::CallModule("fc".into()),
            vec![x],
            Some(TensorMeta::new([16, 4], DType::F32)),
        );
        let graph = graph.with_owning_module(Module::new("root").with_child("fc", fc));

        let mesh = Arc::new(DeviceMesh::logical([2]).unwrap());
        let oracle = CollectiveCostOracle::new(mesh.clone());
        let strategies = StrategyMap::new();
        let handler = LinearModuleHandler::new(HandlerContext {
            graph: &graph,
            node: graph.node(fc_node).unwrap(),
            mesh: &mesh,
            oracle: &oracle,
            strategies: &strategies,
        })
        .unwrap();

        let registration = handler.register_strategy(false).unwrap();
        let committed: &StrategiesVector = &registration.strategies;
        let column = committed
            .iter()
            .find(|strategy| strategy.name == "RS0 = RR x RS0")
            .unwrap();
        let physical = OperationData::parameter("weight", TensorMeta::new([4, 8], DType::F32));

        assert_eq!(committed.len(), 4);
        assert!(registration.rejected.is_empty());
        assert_eq!(
            column.sharding_spec(&physical),
            Some(&ShardingSpec::replicated().with_shard(0, [0]))
        );
        assert!(committed.iter().all(|strategy| strategy.sharding_spec(&physical).is_some()));
    }
}
