//! Node handlers: per-node drivers of strategy generation, validation and cost annotation.

mod base;
mod elementwise;
mod linear;
mod module;
mod placeholder;
mod registry;

pub use base::*;
pub use elementwise::*;
pub use linear::*;
pub use module::*;
pub use placeholder::*;
pub use registry::*;
