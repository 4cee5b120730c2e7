//! Minimal model of the computation graph built by a tracing front end.

mod base;
mod module;
mod traversal;

pub use base::*;
pub use module::*;
