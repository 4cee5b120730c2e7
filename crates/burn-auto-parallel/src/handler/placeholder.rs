use derive_new::new;

use super::{HandlerContext, NodeHandler};
use crate::error::AutoParallelError;
use crate::generator::{OutputGenerator, PlaceholderGenerator, StrategyGenerator};
use crate::strategy::OperationDataMapping;

/// Handler of graph inputs.
#[derive(new)]
pub struct PlaceholderHandler<'a> {
    ctx: HandlerContext<'a>,
}

impl NodeHandler for PlaceholderHandler<'_> {
    fn context(&self) -> &HandlerContext<'_> {
        &self.ctx
    }

    fn get_operation_data_mapping(&self) -> Result<OperationDataMapping, AutoParallelError> {
        let mut mapping = OperationDataMapping::new();
        mapping.insert("output".to_string(), self.ctx.output()?);
        Ok(mapping)
    }

    fn get_strategy_generator(
        &self,
    ) -> Result<Vec<Box<dyn StrategyGenerator + '_>>, AutoParallelError> {
        let output = self
            .get_operation_data_mapping()?
            .remove("output")
            .ok_or_else(|| self.ctx.configuration_error("missing operand 'output'"))?;

        let generator: Box<dyn StrategyGenerator + '_> =
            Box::new(PlaceholderGenerator::new(self.ctx.mesh, output));
        Ok(vec![generator])
    }
}

/// Handler of the graph output node.
#[derive(new)]
pub struct OutputHandler<'a> {
    ctx: HandlerContext<'a>,
}

impl NodeHandler for OutputHandler<'_> {
    fn context(&self) -> &HandlerContext<'_> {
        &self.ctx
    }

    fn get_operation_data_mapping(&self) -> Result<OperationDataMapping, AutoParallelError> {
        let mut mapping = OperationDataMapping::new();
        for index in 0..self.ctx.node.args.len() {
            mapping.insert(format!("input_{index}"), self.ctx.argument(index)?);
        }
        Ok(mapping)
    }

    fn get_strategy_generator(
        &self,
    ) -> Result<Vec<Box<dyn StrategyGenerator + '_>>, AutoParallelError> {
        let mapping = self.get_operation_data_mapping()?;
        // Keys sort lexicographically, restore argument order.
        let inputs = (0..mapping.len())
            .filter_map(|index| mapping.get(&format!("input_{index}")).cloned())
            .collect();

        let generator: Box<dyn StrategyGenerator + '_> =
            Box::new(OutputGenerator::new(self.ctx.mesh, inputs));
        Ok(vec![generator])
    }
}
