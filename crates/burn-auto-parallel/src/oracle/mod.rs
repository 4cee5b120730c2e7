//! Estimation of the cost of changing the layout of a tensor between two nodes.

mod base;
mod cache;
mod collective;

pub use base::*;
pub use cache::*;
pub use collective::*;
