use hashbrown::HashMap;

use super::HandlerContext;
use crate::error::AutoParallelError;
use crate::graph::{Module, NodeOp};
use crate::tensor::TensorMeta;

/// State shared by the handlers of nodes bound to a stateful operator instance.
///
/// Construction resolves the module the node calls in the graph's owning module and captures
/// its own parameters and buffers. A node that is not bound to a resolvable module is refused.
pub struct ModuleHandler<'a> {
    ctx: HandlerContext<'a>,
    /// Module called by the node.
    pub module: &'a Module,
    /// Parameters owned by the module, not including its children's.
    pub named_parameters: &'a HashMap<String, TensorMeta>,
    /// Buffers owned by the module, not including its children's.
    pub named_buffers: &'a HashMap<String, TensorMeta>,
}

impl<'a> ModuleHandler<'a> {
    /// Resolves the module called by `ctx.node`.
    pub fn new(ctx: HandlerContext<'a>) -> Result<Self, AutoParallelError> {
        let NodeOp::CallModule(target) = &ctx.node.op else {
            return Err(ctx.configuration_error("the node does not call a module"));
        };
        let owning_module = ctx.graph.owning_module().ok_or_else(|| {
            ctx.configuration_error("the graph is not associated with an owning module")
        })?;
        let module = owning_module.get_submodule(target).ok_or_else(|| {
            ctx.configuration_error(format!(
                "module '{target}' cannot be resolved in the owning module"
            ))
        })?;

        Ok(Self {
            ctx,
            module,
            named_parameters: module.named_parameters(),
            named_buffers: module.named_buffers(),
        })
    }

    /// Shared state the handler reads.
    pub fn context(&self) -> &HandlerContext<'a> {
        &self.ctx
    }

    /// Metadata of a parameter of the module.
    pub fn parameter(&self, name: &str) -> Result<&'a TensorMeta, AutoParallelError> {
        self.named_parameters.get(name).ok_or_else(|| {
            self.ctx.configuration_error(format!(
                "module of kind '{}' has no parameter '{name}'",
                self.module.kind
            ))
        })
    }
}
