use alloc::sync::Arc;

use rayon::prelude::*;

use crate::config::PlannerConfig;
use crate::error::AutoParallelError;
use crate::graph::{ComputationGraph, NodeId, NodeLabel};
use crate::handler::{HandlerContext, HandlerRegistry, Registration};
use crate::oracle::{CachedOracle, CollectiveCostOracle, LayoutTransitionOracle};
use crate::sharding::DeviceMesh;
use crate::strategy::{StrategiesVector, StrategyMap};

/// Strategies discovered for every node of a graph.
#[derive(Debug, Default)]
pub struct ShardingPlan {
    strategies: StrategyMap,
    diagnostics: Vec<AutoParallelError>,
    dead_ends: Vec<NodeId>,
}

impl ShardingPlan {
    /// Strategies committed for `node`.
    pub fn strategies(&self, node: NodeId) -> Option<&StrategiesVector> {
        self.strategies.get(&node).map(|strategies| strategies.as_ref())
    }

    /// Strategies of every node, by node id.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &StrategiesVector)> {
        self.strategies
            .iter()
            .map(|(node, strategies)| (*node, strategies.as_ref()))
    }

    /// The published strategy map.
    pub fn strategy_map(&self) -> &StrategyMap {
        &self.strategies
    }

    /// Why each rejected candidate was rejected, in node order.
    pub fn diagnostics(&self) -> &[AutoParallelError] {
        &self.diagnostics
    }

    /// Nodes whose candidates were all rejected.
    pub fn dead_ends(&self) -> &[NodeId] {
        &self.dead_ends
    }
}

/// Runs a node handler on every node of a graph, in topological order.
///
/// Nodes are processed level by level. The strategies of a level are published only once the
/// whole level is done, so every handler reads its predecessors' final vectors and never a
/// vector still being built.
pub struct StrategyPlanner {
    mesh: Arc<DeviceMesh>,
    oracle: Arc<dyn LayoutTransitionOracle>,
    registry: HandlerRegistry,
    config: PlannerConfig,
}

impl StrategyPlanner {
    /// Planner over `mesh` with the default handlers and a cached collective cost oracle.
    pub fn new(mesh: Arc<DeviceMesh>) -> Self {
        let oracle = Arc::new(CachedOracle::new(CollectiveCostOracle::new(mesh.clone())));
        Self {
            mesh,
            oracle,
            registry: HandlerRegistry::default(),
            config: PlannerConfig::default(),
        }
    }

    /// Replaces the layout transition oracle.
    pub fn with_oracle(mut self, oracle: Arc<dyn LayoutTransitionOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Replaces the handler registry.
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the planner options.
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Discovers and annotates the strategies of every node of `graph`.
    ///
    /// The first fatal error, in node order, aborts the plan.
    pub fn plan(&self, graph: &ComputationGraph) -> Result<ShardingPlan, AutoParallelError> {
        let mut plan = ShardingPlan::default();

        for level in graph.topological_levels() {
            let registrations: Vec<_> = if self.config.parallel && level.len() > 1 {
                level
                    .par_iter()
                    .map(|node| self.register(graph, &plan.strategies, *node))
                    .collect()
            } else {
                level
                    .iter()
                    .map(|node| self.register(graph, &plan.strategies, *node))
                    .collect()
            };

            for (node, registration) in level.iter().zip(registrations) {
                let registration = registration?;
                if registration.is_dead_end() {
                    if self.config.fail_on_dead_end {
                        return Err(AutoParallelError::configuration(
                            label(graph, *node),
                            format!(
                                "all {} candidate strategies were rejected",
                                registration.rejected.len()
                            ),
                        ));
                    }
                    plan.dead_ends.push(*node);
                }
                plan.diagnostics.extend(registration.rejected);
                plan.strategies
                    .insert(*node, Arc::new(registration.strategies));
            }
        }

        log::info!(
            "Planned {} nodes: {} strategies committed, {} rejected, {} dead ends",
            plan.strategies.len(),
            plan.strategies.values().map(|strategies| strategies.len()).sum::<usize>(),
            plan.diagnostics.len(),
            plan.dead_ends.len()
        );

        Ok(plan)
    }

    fn register(
        &self,
        graph: &ComputationGraph,
        strategies: &StrategyMap,
        node: NodeId,
    ) -> Result<Registration, AutoParallelError> {
        let node = graph.node(node).ok_or_else(|| {
            AutoParallelError::configuration(
                label(graph, node),
                format!("node {node} is not part of the graph"),
            )
        })?;
        let ctx = HandlerContext {
            graph,
            node,
            mesh: &self.mesh,
            oracle: self.oracle.as_ref(),
            strategies,
        };

        self.registry
            .handler(ctx)?
            .register_strategy(self.config.compute_resharding_cost)
    }
}

fn label(graph: &ComputationGraph, node: NodeId) -> NodeLabel {
    graph
        .node(node)
        .map(|node| node.label())
        .unwrap_or_else(|| NodeLabel::new(node, String::new()))
}
