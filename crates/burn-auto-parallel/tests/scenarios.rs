use std::sync::Arc;

use burn_auto_parallel::generator::StrategyGenerator;
use burn_auto_parallel::graph::{ComputationGraph, Module, NodeId, NodeOp};
use burn_auto_parallel::handler::{HandlerContext, HandlerRegistry, NodeHandler, Registration};
use burn_auto_parallel::oracle::{CollectiveCostOracle, LayoutTransition, LayoutTransitionOracle};
use burn_auto_parallel::sharding::{DeviceMesh, LayoutViolation, ShardingSpec};
use burn_auto_parallel::strategy::{
    OperationData, OperationDataMapping, ShardingStrategy, StrategyMap, TrainCycleItem,
};
use burn_auto_parallel::{AutoParallelError, DType, PlannerConfig, StrategyPlanner, TensorMeta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;

/// Assigns each layout, in turn, to every operand of the node.
struct FixedGenerator {
    operands: Vec<OperationData>,
    layouts: Vec<ShardingSpec>,
}

impl StrategyGenerator for FixedGenerator {
    fn name(&self) -> &str {
        "fixed"
    }

    fn generate(&self) -> Vec<ShardingStrategy> {
        self.layouts
            .iter()
            .enumerate()
            .map(|(index, layout)| {
                let specs = self
                    .operands
                    .iter()
                    .map(|data| (data.clone(), layout.clone()))
                    .collect();
                ShardingStrategy::new(format!("fixed {index}"), specs)
            })
            .collect()
    }
}

struct FixedHandler<'a> {
    ctx: HandlerContext<'a>,
    generators: Vec<Vec<ShardingSpec>>,
    fan_out: usize,
}

impl<'a> FixedHandler<'a> {
    fn new(ctx: HandlerContext<'a>, layouts: Vec<ShardingSpec>) -> Self {
        Self {
            ctx,
            generators: vec![layouts],
            fan_out: 1,
        }
    }
}

impl NodeHandler for FixedHandler<'_> {
    fn context(&self) -> &HandlerContext<'_> {
        &self.ctx
    }

    fn get_operation_data_mapping(&self) -> Result<OperationDataMapping, AutoParallelError> {
        let mut mapping = OperationDataMapping::new();
        for index in 0..self.ctx.node.args.len() {
            mapping.insert(format!("input_{index}"), self.ctx.argument(index)?);
        }
        mapping.insert("output".to_string(), self.ctx.output()?);
        Ok(mapping)
    }

    fn get_strategy_generator(
        &self,
    ) -> Result<Vec<Box<dyn StrategyGenerator + '_>>, AutoParallelError> {
        let operands: Vec<_> = self.get_operation_data_mapping()?.into_values().collect();
        Ok(self
            .generators
            .iter()
            .map(|layouts| {
                let generator: Box<dyn StrategyGenerator + '_> = Box::new(FixedGenerator {
                    operands: operands.clone(),
                    layouts: layouts.clone(),
                });
                generator
            })
            .collect())
    }

    fn post_process(
        &self,
        strategy: ShardingStrategy,
    ) -> Result<Vec<ShardingStrategy>, AutoParallelError> {
        if self.fan_out == 1 {
            return Ok(vec![strategy]);
        }

        Ok((0..self.fan_out)
            .map(|part| {
                let mut strategy = strategy.clone();
                strategy.name = format!("{} / {part}", strategy.name);
                strategy
            })
            .collect())
    }
}

struct Fixture {
    graph: ComputationGraph,
    mesh: Arc<DeviceMesh>,
    oracle: CollectiveCostOracle,
    strategies: StrategyMap,
}

impl Fixture {
    fn new(graph: ComputationGraph, mesh_shape: &[usize]) -> Self {
        let mesh = Arc::new(DeviceMesh::logical(mesh_shape).unwrap());
        Self {
            graph,
            oracle: CollectiveCostOracle::new(mesh.clone()),
            mesh,
            strategies: StrategyMap::new(),
        }
    }

    fn ctx(&self, node: NodeId) -> HandlerContext<'_> {
        HandlerContext {
            graph: &self.graph,
            node: self.graph.node(node).unwrap(),
            mesh: &self.mesh,
            oracle: &self.oracle,
            strategies: &self.strategies,
        }
    }

    fn register(&self, node: NodeId, layouts: Vec<ShardingSpec>) -> Registration {
        FixedHandler::new(self.ctx(node), layouts)
            .register_strategy(true)
            .unwrap()
    }

    fn publish(&mut self, registration: Registration) {
        let node = registration.strategies.node();
        self.strategies
            .insert(node, Arc::new(registration.strategies));
    }

    fn publish_default(&mut self, node: NodeId) {
        let registration = HandlerRegistry::default()
            .handler(self.ctx(node))
            .unwrap()
            .register_strategy(true)
            .unwrap();
        self.publish(registration);
    }
}

fn meta<S: Into<Vec<usize>>>(shape: S) -> Option<TensorMeta> {
    Some(TensorMeta::new(shape, DType::F32))
}

fn row() -> ShardingSpec {
    ShardingSpec::replicated().with_shard(0, [0])
}

fn column() -> ShardingSpec {
    ShardingSpec::replicated().with_shard(1, [1])
}

#[test]
fn binary_node_commits_every_valid_layout() {
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([8, 8]));
    let y = graph.add_node("y", NodeOp::Placeholder, vec![], meta([8, 8]));
    let add = graph.add_node("add", NodeOp::CallFunction("add".into()), vec![x, y], meta([8, 8]));
    let mut fixture = Fixture::new(graph, &[2, 2]);
    fixture.publish_default(x);
    fixture.publish_default(y);

    let registration = fixture.register(add, vec![row(), column(), ShardingSpec::replicated()]);

    assert_eq!(registration.strategies.len(), 3);
    assert!(registration.rejected.is_empty());
    for strategy in registration.strategies.iter() {
        for (data, spec) in strategy.sharding_specs.iter() {
            let meta = data.meta.as_ref().unwrap();
            assert_eq!(spec.check_validity(meta, &fixture.mesh), Ok(()));
        }
    }
}

#[test]
fn indivisible_dimension_rejects_only_that_layout() {
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([3, 8]));
    let fixture = Fixture::new(graph, &[2, 2]);

    let registration = fixture.register(x, vec![row(), column()]);

    assert_eq!(registration.strategies.len(), 1);
    assert_eq!(registration.strategies[0].sharding_specs[0].1, column());
    assert_eq!(registration.rejected.len(), 1);
    match &registration.rejected[0] {
        AutoParallelError::InvalidLayout {
            node,
            operand,
            layout,
            shape,
            violation,
        } => {
            assert_eq!(node.id, x);
            assert_eq!(operand, "x");
            assert_eq!(layout, &row());
            assert_eq!(shape, &vec![3, 8]);
            assert_eq!(
                violation,
                &LayoutViolation::NotDivisible {
                    dim: 0,
                    size: 3,
                    shards: 2
                }
            );
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn resharding_costs_follow_predecessor_order() {
    let mut graph = ComputationGraph::new();
    let a = graph.add_node("a", NodeOp::Placeholder, vec![], meta([8, 8]));
    let b = graph.add_node("b", NodeOp::CallFunction("relu".into()), vec![a], meta([8, 8]));
    let mut fixture = Fixture::new(graph, &[2, 2]);
    let x0 = row();
    let x1 = ShardingSpec::replicated();
    let y = column();
    let registration = fixture.register(a, vec![x0.clone(), x1.clone()]);
    fixture.publish(registration);

    let registration = fixture.register(b, vec![y.clone()]);

    let tensor = TensorMeta::new([8, 8], DType::F32);
    let expected = vec![
        fixture.oracle.transition(&tensor, &x0, &y).cost,
        fixture.oracle.transition(&tensor, &x1, &y).cost,
    ];
    assert_eq!(registration.strategies.len(), 1);
    assert_eq!(registration.strategies[0].resharding_costs[&a], expected);
    assert_ne!(expected[0], expected[1]);
}

fn row_or_column<'a>(
    ctx: HandlerContext<'a>,
) -> Result<Box<dyn NodeHandler + 'a>, AutoParallelError> {
    Ok(Box::new(FixedHandler::new(ctx, vec![row(), column()])))
}

fn odd_graph() -> (ComputationGraph, NodeId) {
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([3, 5]));
    let split = graph.add_node(
        "split",
        NodeOp::CallFunction("split".into()),
        vec![x],
        meta([3, 5]),
    );
    graph.add_node("output", NodeOp::Output, vec![split], None);
    (graph, split)
}

#[test]
fn all_candidates_rejected_is_a_dead_end() {
    let (graph, split) = odd_graph();
    let planner = StrategyPlanner::new(Arc::new(DeviceMesh::logical([2, 2]).unwrap()))
        .with_registry(HandlerRegistry::default().with_function("split", row_or_column));

    let plan = planner.plan(&graph).unwrap();

    assert_eq!(plan.dead_ends(), &[split]);
    assert!(plan.strategies(split).unwrap().is_empty());
    assert_eq!(plan.diagnostics().len(), 2);
    assert!(
        plan.diagnostics()
            .iter()
            .all(|error| matches!(error, AutoParallelError::InvalidLayout { .. }))
    );
}

#[test]
fn dead_end_fails_the_plan_when_configured() {
    let (graph, split) = odd_graph();
    let planner = StrategyPlanner::new(Arc::new(DeviceMesh::logical([2, 2]).unwrap()))
        .with_registry(HandlerRegistry::default().with_function("split", row_or_column))
        .with_config(PlannerConfig::default().with_fail_on_dead_end(true));

    let error = planner.plan(&graph).unwrap_err();

    assert!(matches!(error, AutoParallelError::Configuration { .. }));
    assert_eq!(error.node().id, split);
}

#[test]
fn identical_layouts_are_free() {
    let mesh = Arc::new(DeviceMesh::logical([2, 2]).unwrap());
    let oracle = CollectiveCostOracle::new(mesh.clone());
    let tensor = TensorMeta::new([8, 4, 6], DType::F16);
    let layouts = [
        ShardingSpec::replicated(),
        row(),
        column(),
        ShardingSpec::replicated().with_shard(0, [0, 1]),
        ShardingSpec::replicated().with_shard(1, [1]).with_shard(0, [0]),
    ];

    for layout in layouts.iter() {
        let transition = oracle.transition(&tensor, layout, layout);

        assert_eq!(transition.cost.total, 0.0);
        assert!(transition.actions.is_empty());
    }
}

#[test]
fn resharding_vectors_align_with_predecessors() {
    let fc = Module::new("linear")
        .with_parameter("weight", TensorMeta::new([8, 16], DType::F32))
        .with_parameter("bias", TensorMeta::new([8], DType::F32));
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([4, 16]));
    let linear = graph.add_node("fc", NodeOp::CallModule("fc".into()), vec![x], meta([4, 8]));
    let relu = graph.add_node(
        "relu",
        NodeOp::CallFunction("relu".into()),
        vec![linear],
        meta([4, 8]),
    );
    let add = graph.add_node(
        "add",
        NodeOp::CallFunction("add".into()),
        vec![relu, linear],
        meta([4, 8]),
    );
    graph.add_node("output", NodeOp::Output, vec![add], None);
    let graph = graph.with_owning_module(Module::new("root").with_child("fc", fc));
    let planner = StrategyPlanner::new(Arc::new(DeviceMesh::logical([2, 2]).unwrap()));

    let plan = planner.plan(&graph).unwrap();

    assert_eq!(plan.iter().count(), graph.len());
    assert!(plan.dead_ends().is_empty());
    for node in graph.nodes() {
        let strategies = plan.strategies(node.id).unwrap();
        assert!(!strategies.is_empty());
        for strategy in strategies.iter() {
            assert_eq!(strategy.resharding_costs.len(), node.predecessors().len());
            for predecessor in node.predecessors() {
                let costs = &strategy.resharding_costs[&predecessor];
                assert_eq!(costs.len(), plan.strategies(predecessor).unwrap().len());
                assert!(costs.iter().all(|cost| cost.is_finite_non_negative()));
            }
        }
    }
}

#[test]
fn parallel_and_sequential_plans_agree() {
    let mut graph = ComputationGraph::new();
    let a = graph.add_node("a", NodeOp::Placeholder, vec![], meta([8, 8]));
    let b = graph.add_node("b", NodeOp::Placeholder, vec![], meta([8, 8]));
    let relu = graph.add_node("relu", NodeOp::CallFunction("relu".into()), vec![a], meta([8, 8]));
    let neg = graph.add_node("neg", NodeOp::CallFunction("neg".into()), vec![b], meta([8, 8]));
    let mul = graph.add_node(
        "mul",
        NodeOp::CallFunction("mul".into()),
        vec![relu, neg],
        meta([8, 8]),
    );
    graph.add_node("output", NodeOp::Output, vec![mul], None);
    let mesh = Arc::new(DeviceMesh::logical([2, 2]).unwrap());

    let parallel = StrategyPlanner::new(mesh.clone()).plan(&graph).unwrap();
    let sequential = StrategyPlanner::new(mesh)
        .with_config(PlannerConfig::default().with_parallel(false))
        .plan(&graph)
        .unwrap();

    for node in graph.nodes() {
        assert_eq!(parallel.strategies(node.id), sequential.strategies(node.id));
    }
}

#[test]
fn published_strategies_are_not_mutated_by_successors() {
    let mut graph = ComputationGraph::new();
    let a = graph.add_node("a", NodeOp::Placeholder, vec![], meta([8, 8]));
    let relu = graph.add_node("relu", NodeOp::CallFunction("relu".into()), vec![a], meta([8, 8]));
    let gelu = graph.add_node("gelu", NodeOp::CallFunction("gelu".into()), vec![a], meta([8, 8]));
    let mut fixture = Fixture::new(graph, &[2, 2]);
    let registration = fixture.register(a, vec![row(), column(), ShardingSpec::replicated()]);
    let snapshot = registration.strategies.clone();
    fixture.publish(registration);

    fixture.publish_default(relu);
    fixture.publish_default(gelu);

    assert_eq!(*fixture.strategies[&a], snapshot);
    assert_eq!(Arc::strong_count(&fixture.strategies[&a]), 1);
}

#[test]
fn missing_predecessor_is_an_ordering_error() {
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([8, 8]));
    let relu = graph.add_node("relu", NodeOp::CallFunction("relu".into()), vec![x], meta([8, 8]));
    let fixture = Fixture::new(graph, &[2, 2]);

    for _ in 0..2 {
        let error = FixedHandler::new(fixture.ctx(relu), vec![row()])
            .register_strategy(true)
            .unwrap_err();

        match error {
            AutoParallelError::Ordering { node, predecessor } => {
                assert_eq!(node.id, relu);
                assert_eq!(predecessor.id, x);
                assert_eq!(predecessor.name, "x");
            }
            other => panic!("unexpected error {other}"),
        }
    }
}

#[test]
fn post_process_fan_out_keeps_generation_order() {
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([8, 8]));
    let fixture = Fixture::new(graph, &[2, 2]);
    let handler = FixedHandler {
        ctx: fixture.ctx(x),
        generators: vec![vec![row(), column()], vec![ShardingSpec::replicated()]],
        fan_out: 2,
    };

    let registration = handler.register_strategy(true).unwrap();

    let names: Vec<_> = registration
        .strategies
        .iter()
        .map(|strategy| strategy.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "fixed 0 / 0",
            "fixed 0 / 1",
            "fixed 1 / 0",
            "fixed 1 / 1",
            "fixed 0 / 0",
            "fixed 0 / 1",
        ]
    );
}

#[test]
fn committed_layouts_always_fit_their_tensor() {
    let mut rng = StdRng::seed_from_u64(42);
    let mesh_shapes: [&[usize]; 4] = [&[2], &[4], &[2, 2], &[2, 4]];

    for _ in 0..200 {
        let mesh_shape = mesh_shapes[rng.random_range(0..mesh_shapes.len())];
        let rank = rng.random_range(1..=3);
        let shape: Vec<usize> = (0..rank).map(|_| rng.random_range(1..=12)).collect();
        let layouts: Vec<ShardingSpec> = (0..4)
            .map(|_| {
                let mut partition: Vec<(usize, Vec<usize>)> = Vec::new();
                for axis in 0..mesh_shape.len() + 1 {
                    if rng.random_bool(0.5) {
                        // May reference a missing dim or axis, or reuse an axis.
                        let dim = rng.random_range(0..=rank);
                        partition.push((dim, vec![axis]));
                        if rng.random_bool(0.2) {
                            partition.push(((dim + 1) % (rank + 1), vec![axis]));
                        }
                    }
                }
                let mut layout = ShardingSpec::replicated();
                for (dim, axes) in partition {
                    let mut merged = layout.axes(dim).to_vec();
                    merged.extend(axes);
                    layout = layout.with_shard(dim, merged);
                }
                layout
            })
            .collect();

        let mut graph = ComputationGraph::new();
        let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta(shape.clone()));
        let fixture = Fixture::new(graph, mesh_shape);
        let registration = fixture.register(x, layouts.clone());

        assert_eq!(
            registration.strategies.len() + registration.rejected.len(),
            layouts.len()
        );
        for strategy in registration.strategies.iter() {
            let (_, layout) = strategy.output().unwrap();
            let mut used = Vec::new();
            for (dim, axes) in layout.partitions() {
                assert!(dim < rank);
                let shards: usize = axes.iter().map(|axis| mesh_shape[*axis]).product();
                assert!(shape[dim] >= shards && shape[dim] % shards == 0);
                for axis in axes {
                    assert!(!used.contains(axis));
                    used.push(*axis);
                }
            }
        }
    }
}

#[test]
fn missing_predecessor_is_reported_even_when_every_candidate_is_invalid() {
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([3]));
    let relu = graph.add_node("relu", NodeOp::CallFunction("relu".into()), vec![x], meta([3]));
    let fixture = Fixture::new(graph, &[2]);

    let result = FixedHandler::new(fixture.ctx(relu), vec![row()]).register_strategy(true);

    match result {
        Err(AutoParallelError::Ordering { node, predecessor }) => {
            assert_eq!(node.id, relu);
            assert_eq!(predecessor.id, x);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

/// Returns the same cost for every transition.
struct ConstantOracle(TrainCycleItem);

impl LayoutTransitionOracle for ConstantOracle {
    fn transition(
        &self,
        _meta: &TensorMeta,
        _source: &ShardingSpec,
        _target: &ShardingSpec,
    ) -> LayoutTransition {
        LayoutTransition {
            cost: self.0,
            actions: Vec::new(),
        }
    }
}

#[rstest]
#[case::nan(TrainCycleItem::new(f64::NAN, 0.0, f64::NAN))]
#[case::negative(TrainCycleItem::new(-1.0, 0.0, -1.0))]
#[case::infinite(TrainCycleItem::new(0.0, f64::INFINITY, f64::INFINITY))]
fn invalid_oracle_cost_is_a_configuration_error(#[case] cost: TrainCycleItem) {
    let mut graph = ComputationGraph::new();
    let x = graph.add_node("x", NodeOp::Placeholder, vec![], meta([4]));
    let relu = graph.add_node("relu", NodeOp::CallFunction("relu".into()), vec![x], meta([4]));
    let planner = StrategyPlanner::new(Arc::new(DeviceMesh::logical([2]).unwrap()))
        .with_oracle(Arc::new(ConstantOracle(cost)));

    let error = planner.plan(&graph).unwrap_err();

    assert!(matches!(error, AutoParallelError::Configuration { .. }));
    assert_eq!(error.node().id, relu);
    assert!(error.to_string().contains("invalid cost"));
}
