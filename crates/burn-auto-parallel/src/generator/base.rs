use crate::sharding::{DeviceMesh, ShardingSpec};
use crate::strategy::{OperationData, ShardingStrategy};

/// Enumerates the strategies an operator's algebra permits on a device mesh.
///
/// Every returned strategy must already be consistent for the operator (e.g. the contracted
/// dimensions of a matmul are sharded alike). Whether a layout fits the actual tensor shapes is
/// not the generator's concern: node handlers validate and filter the candidates.
pub trait StrategyGenerator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Produces the candidate strategies, in a deterministic order.
    fn generate(&self) -> Vec<ShardingStrategy>;
}

/// Shape of the data, empty when it is not a tensor.
pub(crate) fn shape_of(data: &OperationData) -> &[usize] {
    data.meta
        .as_ref()
        .map(|meta| meta.shape.as_slice())
        .unwrap_or_default()
}

/// Bytes held by one device for `data` laid out with `spec`.
pub(crate) fn local_bytes(data: &OperationData, spec: &ShardingSpec, mesh: &DeviceMesh) -> f64 {
    match data.meta.as_ref() {
        Some(meta) => meta.size_bytes() as f64 / spec.total_shards(mesh) as f64,
        None => 0.0,
    }
}

/// Compact sharding sequence, `[S0, R]` becomes `S0R`.
pub(crate) fn compact(spec: &ShardingSpec, rank: usize) -> String {
    spec.sharding_sequence(rank)
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ',' | ' '))
        .collect()
}
