// Chain query errors

/// Chain error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Hash is neither the genesis hash nor an integrated block
    UnknownHash(String),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChainError::UnknownHash(hash) => write!(f, "Unknown block hash: {}", hash),
        }
    }
}

impl std::error::Error for ChainError {}
