use hashbrown::{HashMap, HashSet};

/// Represents a logical mesh dimension, identified by a unique name.
///
/// Mesh dimensions are used to define the logical structure of a device mesh.
/// They help organize and partition parallel computation workloads, such as data,
/// tensor, or pipeline parallelism, across the mesh. Each dimension is named
/// to provide unambiguous mapping during sharding operations.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MeshDim {
    /// A name that uniquely identifies the mesh dimension.
    name: String,
}

impl MeshDim {
    /// Constructs a new [`MeshDim`] with the given name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        MeshDim { name: name.into() }
    }

    /// The name of the mesh dimension.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Latency and inverse bandwidth of the links along one mesh axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkCost {
    /// Fixed latency paid by every collective along the axis.
    pub alpha: f64,
    /// Cost per byte transferred along the axis.
    pub beta: f64,
}

impl Default for LinkCost {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

/// Represents a logical arrangement of devices used for parallel computation.
///
/// A `DeviceMesh` defines a structured, N-dimensional topology over a set of logical devices,
/// where each dimension can be given a unique name (e.g., `"data"`, `"model"`, `"pipeline"`).
/// This logical mesh provides a basis for specifying tensor sharding and data distribution
/// strategies across devices. Mesh dimensions do not need to correspond to physical layout
/// and are primarily used to organize parallelism (e.g., data, tensor, or pipeline parallelism).
///
/// For example, a 2D mesh with shape `[2, 4]` and dimensions `["dp", "tp"]` represents
/// a logical grid of devices for 2-way data parallelism and 4-way tensor parallelism.
///
/// Each axis also carries an alpha-beta [link cost](LinkCost) used to estimate the price
/// of collective communication along it. The mesh is immutable once built and is shared
/// read-only by the whole planning pass.
#[derive(Clone, Debug)]
pub struct DeviceMesh {
    /// Logical device ids in an n-dimensional arrangement
    devices: Vec<usize>,
    /// Shape of the logical mesh
    shape: Vec<usize>,
    /// Maps dimension names to their indices in the mesh
    dims: HashMap<MeshDim, usize>,
    /// Link cost of each mesh axis
    links: Vec<LinkCost>,
}

/// Represents errors that can occur when constructing a `DeviceMesh`.
///
/// These errors are typically related to invalid dimension mappings or mismatches
/// between the device count and the mesh shape.
#[derive(Debug, thiserror::Error)]
pub enum DeviceMeshError {
    /// An invalid dimension was specified.
    #[error("Invalid mesh dimension: {0}")]
    InvalidDimension(String),
    /// The mesh configuration is invalid.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
}

impl DeviceMesh {
    /// Builds a mesh over devices `0..n` with axes named `x0`, `x1`, ...
    pub fn logical<S: Into<Vec<usize>>>(shape: S) -> Result<Self, DeviceMeshError> {
        let shape = shape.into();
        let num_devices = shape.iter().product::<usize>();
        let mut builder = DeviceMeshBuilder::new((0..num_devices).collect(), shape.clone());
        for idx in 0..shape.len() {
            builder = builder.with_dim(idx, MeshDim::new(format!("x{idx}")));
        }
        builder.build()
    }

    /// Shape of the logical mesh.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of mesh axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Logical device ids, laid out in row-major order over the mesh shape.
    pub fn devices(&self) -> &[usize] {
        &self.devices
    }

    /// Total number of devices.
    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    /// Number of devices along the given axis, if the axis exists.
    pub fn axis_size(&self, axis: usize) -> Option<usize> {
        self.shape.get(axis).copied()
    }

    /// Index of the axis bound to the given dimension name.
    pub fn axis_of(&self, dim: &MeshDim) -> Option<usize> {
        self.dims.get(dim).copied()
    }

    /// Name of the dimension bound to the given axis.
    pub fn dim_of(&self, axis: usize) -> Option<&MeshDim> {
        self.dims
            .iter()
            .find_map(|(dim, idx)| (*idx == axis).then_some(dim))
    }

    /// Link cost of the given axis.
    pub fn link(&self, axis: usize) -> Option<LinkCost> {
        self.links.get(axis).copied()
    }

    /// Product of the sizes of the given axes, i.e. the number of shards they produce.
    ///
    /// Unknown axes count as size 1.
    pub fn num_shards(&self, axes: &[usize]) -> usize {
        axes.iter()
            .map(|axis| self.axis_size(*axis).unwrap_or(1))
            .product()
    }

    /// Estimated cost of an all-gather of `num_bytes` (the gathered size) along `axis`.
    pub fn all_gather_cost(&self, num_bytes: f64, axis: usize) -> f64 {
        self.collective_cost(axis, |n| (n - 1.0) / n * num_bytes, 0.1)
    }

    /// Estimated cost of an all-reduce of `num_bytes` along `axis`.
    pub fn all_reduce_cost(&self, num_bytes: f64, axis: usize) -> f64 {
        self.collective_cost(axis, |n| 2.0 * (n - 1.0) / n * num_bytes, 0.01)
    }

    /// Estimated cost of a reduce-scatter of `num_bytes` along `axis`.
    pub fn reduce_scatter_cost(&self, num_bytes: f64, axis: usize) -> f64 {
        self.collective_cost(axis, |n| (n - 1.0) / n * num_bytes, 0.001)
    }

    /// Estimated cost of an all-to-all of `num_bytes` along `axis`.
    ///
    /// All-to-all suffers from link contention, modelled by a penalty of `n / 2`.
    pub fn all_to_all_cost(&self, num_bytes: f64, axis: usize) -> f64 {
        self.collective_cost(axis, |n| (n - 1.0) / n / n * num_bytes * (n / 2.0), 0.001)
    }

    /// Cost of splitting a local tensor along `axis`, which needs no communication.
    pub fn shard_cost(&self, axis: usize) -> f64 {
        match self.axis_size(axis) {
            Some(size) if size > 1 => 100.0,
            _ => 0.0,
        }
    }

    fn collective_cost<F: Fn(f64) -> f64>(&self, axis: usize, volume: F, epsilon: f64) -> f64 {
        let size = self.axis_size(axis).unwrap_or(1);
        if size <= 1 {
            return 0.0;
        }
        let link = self.link(axis).unwrap_or_default();
        link.alpha + link.beta * volume(size as f64) + epsilon
    }
}

/// A builder for constructing a [`DeviceMesh`].
///
/// This builder allows you to define a logical mesh structure with a shape and
/// specific dimension mappings. Once all dimensions are mapped, the builder can
/// be used to construct the [`DeviceMesh`] instance.
#[derive(Clone, Debug)]
pub struct DeviceMeshBuilder {
    /// Logical devices in an n-dimensional arrangement.
    devices: Vec<usize>,
    /// Shape of the logical mesh.
    shape: Vec<usize>,
    /// Maps dimension names to their indices in the mesh.
    dims: HashMap<MeshDim, usize>,
    /// Link costs overridden per axis index.
    links: HashMap<usize, LinkCost>,
}

impl DeviceMeshBuilder {
    /// Creates a new [`DeviceMeshBuilder`] with the given devices and shape.
    ///
    /// # Arguments
    /// * `devices` - A vector of logical device ids to be arranged in the mesh.
    /// * `shape` - A vector representing the shape (dimensions) of the mesh.
    pub fn new<S: Into<Vec<usize>>>(devices: Vec<usize>, shape: S) -> Self {
        Self {
            devices,
            shape: shape.into(),
            dims: HashMap::new(),
            links: HashMap::new(),
        }
    }

    /// Adds a dimension to the logical mesh, associating it with a specific index.
    ///
    /// Each dimension represents a logical axis of parallelism and should correspond to
    /// a unique index in the shape of the mesh. The index is checked when the mesh is built.
    ///
    /// # Example
    ///
    /// ```rust
    /// use burn_auto_parallel::sharding::{DeviceMeshBuilder, MeshDim};
    ///
    /// let mesh = DeviceMeshBuilder::new(vec![0, 1, 2, 3], [2, 2])
    ///     .with_dim(0, MeshDim::new("data_parallel"))
    ///     .with_dim(1, MeshDim::new("tensor_parallel"))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn with_dim(mut self, idx: usize, dim: MeshDim) -> Self {
        self.dims.insert(dim, idx);
        self
    }

    /// Overrides the alpha-beta link cost of the axis at `idx`.
    pub fn with_link_cost(mut self, idx: usize, alpha: f64, beta: f64) -> Self {
        self.links.insert(idx, LinkCost { alpha, beta });
        self
    }

    /// Builds a [`DeviceMesh`] from the current configuration.
    ///
    /// This method performs validation to ensure that all dimensions are correctly
    /// mapped and that the number of devices matches the expected shape. If the
    /// validation fails, an error is returned.
    pub fn build(self) -> Result<DeviceMesh, DeviceMeshError> {
        let ndim = self.shape.len();
        let mut seen_indices = HashSet::new();

        for &idx in self.dims.values() {
            if idx >= ndim {
                return Err(DeviceMeshError::InvalidDimension(format!(
                    "Index {} exceeds mesh shape {:?}",
                    idx, self.shape
                )));
            }
            if !seen_indices.insert(idx) {
                return Err(DeviceMeshError::InvalidDimension(format!(
                    "Dimension {} already mapped",
                    idx
                )));
            }
        }

        if seen_indices.len() != ndim {
            return Err(DeviceMeshError::InvalidMesh(format!(
                "Not all mesh dimensions are mapped. Got {}, expected {}",
                seen_indices.len(),
                ndim
            )));
        }

        if self.shape.contains(&0) {
            return Err(DeviceMeshError::InvalidMesh(format!(
                "Mesh shape {:?} has an empty axis",
                self.shape
            )));
        }

        let expected_devices = self.shape.iter().product::<usize>();
        if self.devices.len() != expected_devices {
            return Err(DeviceMeshError::InvalidMesh(format!(
                "Device count ({}) doesn't match mesh shape {:?}",
                self.devices.len(),
                self.shape,
            )));
        }

        let mut links = vec![LinkCost::default(); ndim];
        for (&idx, &link) in self.links.iter() {
            let Some(slot) = links.get_mut(idx) else {
                return Err(DeviceMeshError::InvalidDimension(format!(
                    "Link cost index {} exceeds mesh shape {:?}",
                    idx, self.shape
                )));
            };
            if !(link.alpha.is_finite() && link.beta.is_finite())
                || link.alpha < 0.0
                || link.beta < 0.0
            {
                return Err(DeviceMeshError::InvalidMesh(format!(
                    "Link cost of axis {} must be finite and non-negative, got {:?}",
                    idx, link
                )));
            }
            *slot = link;
        }

        Ok(DeviceMesh {
            devices: self.devices,
            shape: self.shape,
            dims: self.dims,
            links,
        })
    }
}
