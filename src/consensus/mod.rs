// Proof-of-work block generation

pub mod pow;

pub use pow::{
    CancelToken, MinedBlock, Miner, MiningOutcome, MiningResult, MiningTask, is_hash_valid,
};
