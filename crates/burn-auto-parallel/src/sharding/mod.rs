//! Device meshes and the partition layouts of tensors over them.

mod mesh;
mod spec;

pub use mesh::*;
pub use spec::*;
