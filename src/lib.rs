// Fork-aware proof-of-work ledger core

pub mod core;
pub mod consensus;
pub mod chain;
pub mod config;
pub mod cli;

// Re-exports for convenience
pub use crate::core::{Block, Txn, txn};
pub use crate::consensus::{CancelToken, MinedBlock, Miner, MiningOutcome, MiningResult, MiningTask, is_hash_valid};
pub use crate::chain::{BlockChain, ChainError, TreeNode};
pub use crate::config::LedgerConfig;
pub use crate::cli::{Cli, CliHandler};
