//! Candidate strategies, the data they shard and the costs attached to them.

mod base;
mod cost;
mod operation;

pub use base::*;
pub use cost::*;
pub use operation::*;
