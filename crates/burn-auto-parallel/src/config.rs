use core::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::sharding::{DeviceMesh, DeviceMeshBuilder, DeviceMeshError, LinkCost, MeshDim};

/// Configuration IO error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The content is not a valid configuration.
    #[error("Config error => Invalid format: {0}")]
    InvalidFormat(String),
    /// The configuration file could not be read or written.
    #[error("Config error => File not found: {0}")]
    FileNotFound(String),
}

/// Configuration stored as JSON.
pub trait Config: fmt::Debug + Serialize + serde::de::DeserializeOwned {
    /// Serializes the configuration to pretty-printed JSON.
    fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|err| ConfigError::InvalidFormat(format!("{err}")))
    }

    /// Parses a configuration from JSON.
    fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|err| ConfigError::InvalidFormat(format!("{err}")))
    }

    /// Saves the configuration to a file.
    fn save<P: AsRef<Path>>(&self, file: P) -> Result<(), ConfigError> {
        std::fs::write(file.as_ref(), self.to_json()?)
            .map_err(|_| ConfigError::FileNotFound(file.as_ref().to_string_lossy().to_string()))
    }

    /// Loads the configuration from a file.
    fn load<P: AsRef<Path>>(file: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file.as_ref())
            .map_err(|_| ConfigError::FileNotFound(file.as_ref().to_string_lossy().to_string()))?;
        Self::from_json(&content)
    }
}

fn display_json<C: Config>(config: &C, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let json = config.to_json().map_err(|_| fmt::Error)?;
    f.write_str(&json)
}

/// Options of the [strategy planner](crate::StrategyPlanner).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Annotate every committed strategy with its resharding costs.
    pub compute_resharding_cost: bool,
    /// Process the nodes of one topological level concurrently.
    pub parallel: bool,
    /// Turn a node whose candidates were all rejected into a configuration error.
    pub fail_on_dead_end: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            compute_resharding_cost: true,
            parallel: true,
            fail_on_dead_end: false,
        }
    }
}

impl PlannerConfig {
    /// Sets whether resharding costs are computed.
    pub fn with_compute_resharding_cost(mut self, compute_resharding_cost: bool) -> Self {
        self.compute_resharding_cost = compute_resharding_cost;
        self
    }

    /// Sets whether independent nodes are processed concurrently.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets whether a dead-end node aborts the plan.
    pub fn with_fail_on_dead_end(mut self, fail_on_dead_end: bool) -> Self {
        self.fail_on_dead_end = fail_on_dead_end;
        self
    }
}

impl Config for PlannerConfig {}

impl fmt::Display for PlannerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_json(self, f)
    }
}

/// Serializable description of a [device mesh](DeviceMesh) over devices `0..n`.
///
/// Axis names default to `x0`, `x1`, ... and link costs to [`LinkCost::default`]. When given,
/// `names`, `alpha` and `beta` must have one entry per axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Number of devices along each axis.
    pub shape: Vec<usize>,
    /// Name of each axis.
    #[serde(default)]
    pub names: Vec<String>,
    /// Latency of each axis.
    #[serde(default)]
    pub alpha: Vec<f64>,
    /// Inverse bandwidth of each axis.
    #[serde(default)]
    pub beta: Vec<f64>,
}

impl MeshConfig {
    /// Mesh of the given shape with default names and link costs.
    pub fn new<S: Into<Vec<usize>>>(shape: S) -> Self {
        Self {
            shape: shape.into(),
            names: Vec::new(),
            alpha: Vec::new(),
            beta: Vec::new(),
        }
    }

    /// Sets the axis names.
    pub fn with_names<S: Into<String>, I: IntoIterator<Item = S>>(mut self, names: I) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the latency and inverse bandwidth of every axis.
    pub fn with_link_costs(mut self, alpha: Vec<f64>, beta: Vec<f64>) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self
    }

    /// Builds the described mesh.
    pub fn build(&self) -> Result<DeviceMesh, DeviceMeshError> {
        let ndim = self.shape.len();
        for (field, len) in [
            ("names", self.names.len()),
            ("alpha", self.alpha.len()),
            ("beta", self.beta.len()),
        ] {
            if len != 0 && len != ndim {
                return Err(DeviceMeshError::InvalidMesh(format!(
                    "Expected {ndim} entries in '{field}' for mesh shape {:?}, got {len}",
                    self.shape
                )));
            }
        }

        let num_devices = self.shape.iter().product::<usize>();
        let mut builder = DeviceMeshBuilder::new((0..num_devices).collect(), self.shape.clone());
        let default_link = LinkCost::default();
        for idx in 0..ndim {
            let name = self
                .names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("x{idx}"));
            let alpha = self.alpha.get(idx).copied().unwrap_or(default_link.alpha);
            let beta = self.beta.get(idx).copied().unwrap_or(default_link.beta);
            builder = builder
                .with_dim(idx, MeshDim::new(name))
                .with_link_cost(idx, alpha, beta);
        }

        builder.build()
    }
}

impl Config for MeshConfig {}

impl fmt::Display for MeshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_json(self, f)
    }
}
