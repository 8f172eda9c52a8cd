// Core ledger data structures

mod block;
mod hash;

pub use block::*;
pub use hash::*;
