use derive_new::new;

use super::{HandlerContext, NodeHandler};
use crate::error::AutoParallelError;
use crate::generator::{ElementwiseGenerator, StrategyGenerator};
use crate::strategy::OperationDataMapping;

/// Logical names of the arguments of unary and binary element-wise functions.
const ARGUMENTS: [&str; 2] = ["input", "other"];

/// Handler of unary and binary element-wise functions (`add`, `mul`, `relu`, ...).
#[derive(new)]
pub struct ElementwiseHandler<'a> {
    ctx: HandlerContext<'a>,
}

impl NodeHandler for ElementwiseHandler<'_> {
    fn context(&self) -> &HandlerContext<'_> {
        &self.ctx
    }

    fn get_operation_data_mapping(&self) -> Result<OperationDataMapping, AutoParallelError> {
        let num_args = self.ctx.node.args.len();
        if num_args == 0 || num_args > ARGUMENTS.len() {
            return Err(self.ctx.configuration_error(format!(
                "element-wise functions take 1 or 2 arguments, got {num_args}"
            )));
        }

        let mut mapping = OperationDataMapping::new();
        for (index, name) in ARGUMENTS.iter().take(num_args).enumerate() {
            mapping.insert(name.to_string(), self.ctx.argument(index)?);
        }
        mapping.insert("output".to_string(), self.ctx.output()?);

        Ok(mapping)
    }

    fn get_strategy_generator(
        &self,
    ) -> Result<Vec<Box<dyn StrategyGenerator + '_>>, AutoParallelError> {
        let mut mapping = self.get_operation_data_mapping()?;
        let output = mapping
            .remove("output")
            .ok_or_else(|| self.ctx.configuration_error("missing operand 'output'"))?;
        let inputs = ARGUMENTS
            .iter()
            .filter_map(|name| mapping.remove(*name))
            .collect();

        let generator: Box<dyn StrategyGenerator + '_> =
            Box::new(ElementwiseGenerator::new(self.ctx.mesh, inputs, output));
        Ok(vec![generator])
    }
}
