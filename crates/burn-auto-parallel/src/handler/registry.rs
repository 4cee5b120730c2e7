use hashbrown::HashMap;

use super::{
    ElementwiseHandler, HandlerContext, LinearModuleHandler, NodeHandler, OutputHandler,
    PlaceholderHandler,
};
use crate::error::AutoParallelError;
use crate::graph::NodeOp;

/// Builds the handler of one node.
pub type HandlerFactory =
    for<'a> fn(HandlerContext<'a>) -> Result<Box<dyn NodeHandler + 'a>, AutoParallelError>;

/// Element-wise functions handled out of the box.
const ELEMENTWISE_FUNCTIONS: [&str; 7] = ["add", "sub", "mul", "div", "relu", "gelu", "neg"];

/// Picks the handler of a node from its operation.
///
/// Graph inputs and outputs always get the built-in handlers. Functions are looked up by name
/// and module calls by the kind of the module they resolve to.
#[derive(Clone)]
pub struct HandlerRegistry {
    functions: HashMap<String, HandlerFactory>,
    modules: HashMap<String, HandlerFactory>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        for function in ELEMENTWISE_FUNCTIONS {
            registry = registry.with_function(function, elementwise);
        }
        registry.with_module("linear", linear)
    }
}

impl HandlerRegistry {
    /// Creates a registry without any function or module handler.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            modules: HashMap::new(),
        }
    }

    /// Handles calls to the function `name` with `factory`.
    pub fn with_function<S: Into<String>>(mut self, name: S, factory: HandlerFactory) -> Self {
        self.functions.insert(name.into(), factory);
        self
    }

    /// Handles calls to modules of kind `kind` with `factory`.
    pub fn with_module<S: Into<String>>(mut self, kind: S, factory: HandlerFactory) -> Self {
        self.modules.insert(kind.into(), factory);
        self
    }

    /// Builds the handler of `ctx.node`.
    pub fn handler<'a>(
        &self,
        ctx: HandlerContext<'a>,
    ) -> Result<Box<dyn NodeHandler + 'a>, AutoParallelError> {
        match &ctx.node.op {
            NodeOp::Placeholder => Ok(Box::new(PlaceholderHandler::new(ctx))),
            NodeOp::Output => Ok(Box::new(OutputHandler::new(ctx))),
            NodeOp::CallFunction(name) => {
                let factory = self.functions.get(name).ok_or_else(|| {
                    ctx.configuration_error(format!("no handler registered for function '{name}'"))
                })?;
                factory(ctx)
            }
            NodeOp::CallModule(target) => {
                let module = ctx
                    .graph
                    .owning_module()
                    .and_then(|owner| owner.get_submodule(target))
                    .ok_or_else(|| {
                        ctx.configuration_error(format!(
                            "module '{target}' cannot be resolved in the owning module"
                        ))
                    })?;
                let factory = self.modules.get(&module.kind).ok_or_else(|| {
                    ctx.configuration_error(format!(
                        "no handler registered for modules of kind '{}'",
                        module.kind
                    ))
                })?;
                factory(ctx)
            }
        }
    }
}

fn elementwise<'a>(ctx: HandlerContext<'a>) -> Result<Box<dyn NodeHandler + 'a>, AutoParallelError> {
    Ok(Box::new(ElementwiseHandler::new(ctx)))
}

fn linear<'a>(ctx: HandlerContext<'a>) -> Result<Box<dyn NodeHandler + 'a>, AutoParallelError> {
    Ok(Box::new(LinearModuleHandler::new(ctx)?))
}
