#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Burn automatic parallelism.
//!
//! Discovers, for every node of a computation graph, the candidate ways of sharding its
//! operands over a [device mesh](sharding::DeviceMesh), and prices each of them: compute,
//! communication and memory, plus the cost of resharding the output of every predecessor into
//! the layout the candidate expects. A downstream solver picks one strategy per node.

extern crate alloc;

mod config;
mod error;
mod planner;
mod tensor;

pub mod generator;
pub mod graph;
pub mod handler;
pub mod oracle;
pub mod sharding;
pub mod strategy;

pub use config::*;
pub use error::*;
pub use planner::*;
pub use tensor::*;
