use alloc::collections::BTreeMap;
use core::fmt;

use hashbrown::HashSet;

use super::DeviceMesh;
use crate::tensor::TensorMeta;

/// Specifies how a single dimension is distributed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DimDistribution {
    /// Dimension is sharded across the given mesh axes, outermost first.
    Sharded(Vec<usize>),
    /// Dimension is replicated (not sharded).
    Replicated,
}

/// Describes how a tensor is distributed across the devices of a [mesh](DeviceMesh).
///
/// Each sharded tensor dimension maps to an ordered list of mesh axes; dimensions absent
/// from the map are replicated. A layout is pure data: it does not know the shape of the tensor
/// it will be applied to, which is why [check_validity](ShardingSpec::check_validity) takes
/// the tensor metadata explicitly.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShardingSpec {
    /// Mesh axes assigned to each sharded tensor dimension.
    dim_partition: BTreeMap<usize, Vec<usize>>,
}

/// Reason why a [sharding spec](ShardingSpec) cannot be realized for a tensor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LayoutViolation {
    /// The layout shards a dimension the tensor does not have.
    #[error("dimension {dim} is out of range for a tensor of rank {rank}")]
    DimOutOfRange {
        /// Sharded dimension.
        dim: usize,
        /// Rank of the tensor.
        rank: usize,
    },
    /// The layout uses an axis the device mesh does not have.
    #[error("mesh axis {axis} does not exist in a mesh of shape {mesh_shape:?}")]
    AxisNotInMesh {
        /// Offending axis.
        axis: usize,
        /// Shape of the device mesh.
        mesh_shape: Vec<usize>,
    },
    /// The same mesh axis shards more than one dimension (or the same dimension twice).
    #[error("mesh axis {axis} is assigned more than once")]
    AxisReused {
        /// Offending axis.
        axis: usize,
    },
    /// A sharded dimension cannot be split evenly across its devices.
    #[error("dimension {dim} of size {size} cannot be split evenly into {shards} shards")]
    NotDivisible {
        /// Sharded dimension.
        dim: usize,
        /// Size of the dimension.
        size: usize,
        /// Number of shards requested for the dimension.
        shards: usize,
    },
}

impl ShardingSpec {
    /// A layout replicating every dimension.
    pub fn replicated() -> Self {
        Self::default()
    }

    /// Creates a layout from `(tensor dim, mesh axes)` pairs. Empty axis lists are dropped.
    pub fn new<I: IntoIterator<Item = (usize, Vec<usize>)>>(dim_partition: I) -> Self {
        Self {
            dim_partition: dim_partition
                .into_iter()
                .filter(|(_, axes)| !axes.is_empty())
                .collect(),
        }
    }

    /// Shards `dim` over `axes`, replacing any previous assignment of that dimension.
    pub fn with_shard<A: Into<Vec<usize>>>(mut self, dim: usize, axes: A) -> Self {
        let axes = axes.into();
        if axes.is_empty() {
            self.dim_partition.remove(&dim);
        } else {
            self.dim_partition.insert(dim, axes);
        }
        self
    }

    /// Whether every dimension is replicated.
    pub fn is_replicated(&self) -> bool {
        self.dim_partition.is_empty()
    }

    /// Distribution of a single dimension.
    pub fn dim_distribution(&self, dim: usize) -> DimDistribution {
        match self.dim_partition.get(&dim) {
            Some(axes) => DimDistribution::Sharded(axes.clone()),
            None => DimDistribution::Replicated,
        }
    }

    /// Mesh axes sharding `dim`, empty when replicated.
    pub fn axes(&self, dim: usize) -> &[usize] {
        self.dim_partition
            .get(&dim)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Iterates over the sharded dimensions and their mesh axes.
    pub fn partitions(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.dim_partition
            .iter()
            .map(|(dim, axes)| (*dim, axes.as_slice()))
    }

    /// The tensor dimension sharded by `axis`, if any.
    pub fn dim_of_axis(&self, axis: usize) -> Option<usize> {
        self.partitions()
            .find_map(|(dim, axes)| axes.contains(&axis).then_some(dim))
    }

    /// Swaps the distributions of two dimensions.
    pub fn transposed(&self, dim0: usize, dim1: usize) -> Self {
        Self::new(self.partitions().map(|(dim, axes)| {
            let dim = match dim {
                d if d == dim0 => dim1,
                d if d == dim1 => dim0,
                d => d,
            };
            (dim, axes.to_vec())
        }))
    }

    /// Number of shards `dim` is split into on the given mesh.
    pub fn num_shards(&self, dim: usize, mesh: &DeviceMesh) -> usize {
        mesh.num_shards(self.axes(dim))
    }

    /// Total number of distinct shards of the tensor on the given mesh.
    pub fn total_shards(&self, mesh: &DeviceMesh) -> usize {
        self.dim_partition
            .values()
            .map(|axes| mesh.num_shards(axes))
            .product()
    }

    /// Shape of the shard held by a single device.
    pub fn local_shape(&self, meta: &TensorMeta, mesh: &DeviceMesh) -> Vec<usize> {
        meta.shape
            .iter()
            .enumerate()
            .map(|(dim, size)| size / self.num_shards(dim, mesh).max(1))
            .collect()
    }

    /// Renders the layout as a sharding sequence such as `[S0, R, S01]`.
    pub fn sharding_sequence(&self, rank: usize) -> String {
        let dims = (0..rank.max(self.max_dim().map_or(0, |dim| dim + 1)))
            .map(|dim| match self.dim_distribution(dim) {
                DimDistribution::Replicated => "R".to_string(),
                DimDistribution::Sharded(axes) => {
                    let axes: String = axes.iter().map(|axis| axis.to_string()).collect();
                    format!("S{axes}")
                }
            })
            .collect::<Vec<_>>();
        format!("[{}]", dims.join(", "))
    }

    /// Checks that the layout can be realized for a tensor described by `meta` on `mesh`.
    ///
    /// A layout is valid when every sharded dimension exists in the tensor, every mesh axis it
    /// uses exists in the mesh and is used once, and every sharded dimension splits evenly
    /// into non-empty shards.
    pub fn check_validity(
        &self,
        meta: &TensorMeta,
        mesh: &DeviceMesh,
    ) -> Result<(), LayoutViolation> {
        let mut seen_axes = HashSet::new();

        for (dim, axes) in self.partitions() {
            if dim >= meta.rank() {
                return Err(LayoutViolation::DimOutOfRange {
                    dim,
                    rank: meta.rank(),
                });
            }

            for &axis in axes {
                if mesh.axis_size(axis).is_none() {
                    return Err(LayoutViolation::AxisNotInMesh {
                        axis,
                        mesh_shape: mesh.shape().to_vec(),
                    });
                }
                if !seen_axes.insert(axis) {
                    return Err(LayoutViolation::AxisReused { axis });
                }
            }

            let size = meta.shape[dim];
            let shards = mesh.num_shards(axes);
            if size < shards || size % shards != 0 {
                return Err(LayoutViolation::NotDivisible { dim, size, shards });
            }
        }

        Ok(())
    }

    fn max_dim(&self) -> Option<usize> {
        self.dim_partition.keys().next_back().copied()
    }
}

impl fmt::Display for ShardingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sharding_sequence(0))
    }
}
