use crate::error::AutoParallelError;
use crate::generator::StrategyGenerator;
use crate::graph::{ComputationGraph, Node};
use crate::oracle::LayoutTransitionOracle;
use crate::sharding::DeviceMesh;
use crate::strategy::{
    OperationData, OperationDataMapping, ShardingStrategy, StrategiesVector, StrategyMap,
    TrainCycleItem,
};
use crate::tensor::TensorMeta;

/// Everything a [node handler](NodeHandler) reads while processing one node.
///
/// All of it is shared and read-only: the graph, the mesh, the layout oracle, and the
/// strategies already published by the nodes processed before.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    /// Graph the node belongs to.
    pub graph: &'a ComputationGraph,
    /// Node being processed.
    pub node: &'a Node,
    /// Device mesh the strategies are generated for.
    pub mesh: &'a DeviceMesh,
    /// Oracle pricing layout transitions between a predecessor and the node.
    pub oracle: &'a dyn LayoutTransitionOracle,
    /// Strategies of the nodes processed so far.
    pub strategies: &'a StrategyMap,
}

impl HandlerContext<'_> {
    /// Shorthand for a configuration error on the current node.
    pub fn configuration_error<S: Into<String>>(&self, reason: S) -> AutoParallelError {
        AutoParallelError::configuration(self.node.label(), reason)
    }

    /// The output of the `index`-th argument of the node, as an operand.
    pub fn argument(&self, index: usize) -> Result<OperationData, AutoParallelError> {
        let id = self.node.args.get(index).ok_or_else(|| {
            self.configuration_error(format!(
                "expected at least {} argument(s), got {}",
                index + 1,
                self.node.args.len()
            ))
        })?;
        let arg = self.graph.node(*id).ok_or_else(|| {
            self.configuration_error(format!("argument {id} is not part of the graph"))
        })?;
        if arg.meta.is_none() {
            return Err(self.configuration_error(format!(
                "argument {} has no tensor metadata",
                arg.label()
            )));
        }

        Ok(OperationData::argument(arg))
    }

    /// The output of the node, as an operand.
    pub fn output(&self) -> Result<OperationData, AutoParallelError> {
        if self.node.meta.is_none() {
            return Err(self.configuration_error("the node output has no tensor metadata"));
        }

        Ok(OperationData::output(self.node))
    }
}

/// Outcome of [registering](NodeHandler::register_strategy) the strategies of a node.
#[derive(Debug)]
pub struct Registration {
    /// Committed candidates, in generation order.
    pub strategies: StrategiesVector,
    /// Candidates excluded because one of their layouts does not fit its tensor.
    pub rejected: Vec<AutoParallelError>,
}

impl Registration {
    /// Whether candidates were generated but none survived validation.
    pub fn is_dead_end(&self) -> bool {
        self.strategies.is_empty() && !self.rejected.is_empty()
    }
}

/// Drives strategy discovery and cost annotation for exactly one node.
///
/// Operator families implement the mapping from logical operands to the node's physical data,
/// the choice of generators and, optionally, a post-processing step. The provided methods
/// implement the pipeline shared by every family:
///
/// 1. every generator's candidates are post-processed and flattened, in generator order;
/// 2. candidates with a layout that does not fit its tensor are rejected;
/// 3. the surviving candidates get their resharding costs against every predecessor;
/// 4. they are committed, in order, to the node's [strategies vector](StrategiesVector).
pub trait NodeHandler {
    /// Shared state the handler reads.
    fn context(&self) -> &HandlerContext<'_>;

    /// Maps the logical operand names of the generators to the node's physical data.
    fn get_operation_data_mapping(&self) -> Result<OperationDataMapping, AutoParallelError>;

    /// Generators applying to the node. An empty list is legal: the node has no strategy.
    fn get_strategy_generator(
        &self,
    ) -> Result<Vec<Box<dyn StrategyGenerator + '_>>, AutoParallelError>;

    /// Transforms one generated strategy into one or several strategies.
    ///
    /// Used when a physical operand is not laid out like the logical operand the generator
    /// reasons about, e.g. a transposed weight.
    fn post_process(
        &self,
        strategy: ShardingStrategy,
    ) -> Result<Vec<ShardingStrategy>, AutoParallelError> {
        Ok(vec![strategy])
    }

    /// Checks every layout of `strategy` against the shape of its operand.
    fn validate(&self, strategy: &ShardingStrategy) -> Result<(), AutoParallelError> {
        let ctx = self.context();

        for (data, spec) in strategy.sharding_specs.iter() {
            let Some(meta) = data.meta.as_ref() else {
                continue;
            };
            spec.check_validity(meta, ctx.mesh)
                .map_err(|violation| AutoParallelError::InvalidLayout {
                    node: ctx.node.label(),
                    operand: data.name.clone(),
                    layout: spec.clone(),
                    shape: meta.shape.clone(),
                    violation,
                })?;
        }

        Ok(())
    }

    /// Fills `strategy.resharding_costs` with, for every predecessor, the cost of moving from
    /// each of its candidates to the layouts `strategy` requires.
    ///
    /// Costs are positionally aligned with the predecessor's strategies vector. When the
    /// predecessor feeds several operands, their transition costs are summed.
    fn update_resharding_cost(
        &self,
        strategy: &mut ShardingStrategy,
    ) -> Result<(), AutoParallelError> {
        let ctx = self.context();

        for predecessor in ctx.node.predecessors() {
            let previous = ctx.graph.node(predecessor).ok_or_else(|| {
                ctx.configuration_error(format!("predecessor {predecessor} is not part of the graph"))
            })?;
            let previous_strategies =
                ctx.strategies
                    .get(&predecessor)
                    .ok_or_else(|| AutoParallelError::Ordering {
                        node: ctx.node.label(),
                        predecessor: previous.label(),
                    })?;

            let operands = strategy
                .arguments_from(predecessor)
                .map(|(data, spec)| {
                    let meta = operand_meta(ctx, data)?;
                    Ok((meta, spec))
                })
                .collect::<Result<Vec<_>, AutoParallelError>>()?;
            if operands.is_empty() {
                return Err(ctx.configuration_error(format!(
                    "strategy '{}' has no operand produced by predecessor {}",
                    strategy.name,
                    previous.label()
                )));
            }

            let mut costs = Vec::with_capacity(previous_strategies.len());
            for previous_strategy in previous_strategies.iter() {
                let (_, previous_spec) = previous_strategy.output().ok_or_else(|| {
                    ctx.configuration_error(format!(
                        "strategy '{}' of predecessor {} exposes no output",
                        previous_strategy.name,
                        previous.label()
                    ))
                })?;

                let mut cost = TrainCycleItem::zero();
                for (meta, spec) in operands.iter() {
                    let transition = ctx.oracle.transition(meta, previous_spec, spec);
                    if !transition.cost.is_finite_non_negative() {
                        return Err(ctx.configuration_error(format!(
                            "layout oracle returned an invalid cost {:?} for {} -> {}",
                            transition.cost,
                            previous_spec.sharding_sequence(meta.rank()),
                            spec.sharding_sequence(meta.rank())
                        )));
                    }
                    cost += transition.cost;
                }
                costs.push(cost);
            }

            strategy.resharding_costs.insert(predecessor, costs);
        }

        Ok(())
    }

    /// Generates, filters, annotates and commits the strategies of the node.
    fn register_strategy(
        &self,
        compute_resharding_cost: bool,
    ) -> Result<Registration, AutoParallelError> {
        let ctx = self.context();
        let label = ctx.node.label();

        if compute_resharding_cost {
            check_predecessors(ctx)?;
        }

        let mut candidates = Vec::new();
        for generator in self.get_strategy_generator()? {
            let generated = generator.generate();
            log::debug!(
                "Generator {} produced {} strategies for node {label}",
                generator.name(),
                generated.len()
            );

            for strategy in generated {
                candidates.extend(self.post_process(strategy)?);
            }
        }

        let mut committed = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for mut strategy in candidates {
            if let Err(error) = self.validate(&strategy) {
                log::warn!("Rejecting strategy '{}': {error}", strategy.name);
                rejected.push(error);
                continue;
            }

            if compute_resharding_cost {
                self.update_resharding_cost(&mut strategy)?;
            }
            committed.push(strategy);
        }

        let mut strategies = StrategiesVector::new(ctx.node.id);
        strategies.extend(committed);

        let registration = Registration {
            strategies,
            rejected,
        };
        if registration.is_dead_end() {
            log::warn!(
                "Node {label} has no viable strategy: all {} candidates were rejected",
                registration.rejected.len()
            );
        } else {
            log::debug!(
                "Committed {} strategies for node {label}",
                registration.strategies.len()
            );
        }

        Ok(registration)
    }
}

/// Fails with an ordering error if a predecessor of the node has not published its strategies.
fn check_predecessors(ctx: &HandlerContext<'_>) -> Result<(), AutoParallelError> {
    for predecessor in ctx.node.predecessors() {
        if ctx.strategies.contains_key(&predecessor) {
            continue;
        }
        let previous = ctx.graph.node(predecessor).ok_or_else(|| {
            ctx.configuration_error(format!("predecessor {predecessor} is not part of the graph"))
        })?;
        return Err(AutoParallelError::Ordering {
            node: ctx.node.label(),
            predecessor: previous.label(),
        });
    }

    Ok(())
}

fn operand_meta<'a>(
    ctx: &HandlerContext<'_>,
    data: &'a OperationData,
) -> Result<&'a TensorMeta, AutoParallelError> {
    data.meta.as_ref().ok_or_else(|| {
        ctx.configuration_error(format!("operand '{}' has no tensor metadata", data.name))
    })
}
