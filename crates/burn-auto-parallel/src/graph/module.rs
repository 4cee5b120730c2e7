use hashbrown::HashMap;

use crate::tensor::TensorMeta;

/// A stateful operator instance owning parameters and buffers, e.g. a linear layer.
///
/// Modules form a tree: the graph's owning module is the root and `call_module` nodes refer to
/// descendants by dotted path (`"encoder.layers.0.fc"`).
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Kind of operator this module implements, e.g. `"linear"`.
    pub kind: String,
    parameters: HashMap<String, TensorMeta>,
    buffers: HashMap<String, TensorMeta>,
    children: HashMap<String, Module>,
}

impl Module {
    /// Creates an empty module of the given kind.
    pub fn new<S: Into<String>>(kind: S) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Registers a parameter directly owned by this module.
    pub fn with_parameter<S: Into<String>>(mut self, name: S, meta: TensorMeta) -> Self {
        self.parameters.insert(name.into(), meta);
        self
    }

    /// Registers a buffer directly owned by this module.
    pub fn with_buffer<S: Into<String>>(mut self, name: S, meta: TensorMeta) -> Self {
        self.buffers.insert(name.into(), meta);
        self
    }

    /// Registers a child module.
    pub fn with_child<S: Into<String>>(mut self, name: S, child: Module) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    /// Parameters owned by this module, not including those of its children.
    pub fn named_parameters(&self) -> &HashMap<String, TensorMeta> {
        &self.parameters
    }

    /// Buffers owned by this module, not including those of its children.
    pub fn named_buffers(&self) -> &HashMap<String, TensorMeta> {
        &self.buffers
    }

    /// Resolves a descendant by dotted path. The empty path is the module itself.
    pub fn get_submodule(&self, path: &str) -> Option<&Module> {
        if path.is_empty() {
            return Some(self);
        }

        path.split('.')
            .try_fold(self, |module, name| module.children.get(name))
    }
}
