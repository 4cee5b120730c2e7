//! Strategy generators, one per operator family.

mod base;
mod elementwise;
mod linear;
mod placeholder;

pub use base::*;
pub use elementwise::*;
pub use linear::*;
pub use placeholder::*;
