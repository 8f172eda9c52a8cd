// Ledger configuration

use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;

/// Settings shared by the chain and the miner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Root identifier every first-generation block points at
    pub genesis_hash: String,
    /// Leading hex zeros a mined hash must carry
    pub num_zeroes: usize,
    /// Proposer id stamped on blocks this process mines
    pub origin_id: u32,
    /// Descendants required before a block counts as validated
    pub confirmations: usize,
    /// Fixed seed for fork-choice tie-breaks (entropy when absent)
    pub seed: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            genesis_hash: "deadb33f".to_string(),
            num_zeroes: 4,
            origin_id: 0,
            confirmations: 6,
            seed: None,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?;
        log::debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, data)
            .map_err(|e| format!("Failed to write config {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("forkledger-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let config = LedgerConfig {
            genesis_hash: "cafe".to_string(),
            num_zeroes: 2,
            origin_id: 7,
            confirmations: 3,
            seed: Some(42),
        };
        config.save(&path).unwrap();
        let loaded = LedgerConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let path = temp_path("partial");
        fs::write(&path, r#"{"num_zeroes": 1}"#).unwrap();
        let loaded = LedgerConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.num_zeroes, 1);
        assert_eq!(loaded.genesis_hash, "deadb33f");
        assert_eq!(loaded.confirmations, 6);
        assert_eq!(loaded.seed, None);
    }

    #[test]
    fn test_load_missing_file() {
        let err = LedgerConfig::load(temp_path("does-not-exist")).unwrap_err();
        assert!(err.contains("Failed to read config"));
    }
}
