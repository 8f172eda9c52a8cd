// CLI commands

use clap::{Parser, Subcommand};
use crate::{Block, BlockChain, LedgerConfig, MinedBlock, Miner, txn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "forkledger")]
#[command(about = "Fork-aware proof-of-work ledger", long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mine one block and print it as JSON
    Mine {
        /// Parent hash (defaults to genesis)
        #[arg(short, long)]
        parent: Option<String>,
        /// Key/value write as key=value (repeatable)
        #[arg(short = 's', long = "set", value_parser = parse_key_value)]
        writes: Vec<(String, String)>,
        /// Required leading hex zeros
        #[arg(short, long)]
        difficulty: Option<usize>,
        /// Proposer id
        #[arg(short, long)]
        origin: Option<u32>,
        /// Requesting client id
        #[arg(long)]
        client: Option<String>,
        /// Give up after this many seconds
        #[arg(short, long)]
        timeout_secs: Option<u64>,
    },

    /// Integrate blocks from a JSON array file and report chain state
    Replay {
        /// File holding a JSON array of blocks
        file: PathBuf,
        /// Keys to look up after integration
        #[arg(short, long = "key")]
        keys: Vec<String>,
        /// Drop blocks whose hash misses the configured difficulty
        #[arg(long)]
        verify: bool,
    },

    /// Mine a sequence of blocks on the current tip
    Simulate {
        /// Number of blocks to mine
        #[arg(short = 'n', long, default_value = "5")]
        blocks: usize,
        /// Cancel a search that runs longer than this
        #[arg(short, long, default_value = "10")]
        timeout_secs: u64,
        /// Required leading hex zeros
        #[arg(short, long)]
        difficulty: Option<usize>,
        /// Mine a no-op block in place of every Nth write
        #[arg(long)]
        no_op_every: Option<usize>,
    },

    /// Write the effective configuration to a JSON file
    InitConfig {
        /// Destination file
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Parse a `key=value` write
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid write '{}': expected key=value", s))?;
    if key.is_empty() {
        return Err(format!("Invalid write '{}': empty key", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Mine `block`, cancelling the search if it outlives `timeout`
async fn mine_with_timeout(
    miner: &Arc<Miner>,
    block: Block,
    timeout: Option<Duration>,
) -> Option<MinedBlock> {
    let wait = miner.spawn_generation(block).wait();
    let Some(timeout) = timeout else {
        return wait.await;
    };

    tokio::pin!(wait);
    tokio::select! {
        mined = &mut wait => mined,
        _ = tokio::time::sleep(timeout) => {
            log::info!("Search exceeded {:?}, cancelling", timeout);
            miner.cancel_block_generation();
            // A search that finished in the meantime still reports success
            wait.await
        }
    }
}

/// CLI handler
pub struct CliHandler {
    config: LedgerConfig,
}

impl CliHandler {
    /// Create a new CLI handler, loading the config file if one is given
    pub fn new(config_path: Option<&Path>) -> Result<Self, String> {
        let config = match config_path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                LedgerConfig::load(path)?
            }
            None => LedgerConfig::default(),
        };
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self { config }
    }

    /// Handle CLI command
    pub fn handle(&mut self, cli: Cli) -> Result<(), String> {
        match cli.command {
            Commands::Mine { parent, writes, difficulty, origin, client, timeout_secs } => {
                let mut config = self.config.clone();
                if let Some(d) = difficulty {
                    config.num_zeroes = d;
                }
                if let Some(o) = origin {
                    config.origin_id = o;
                }
                let parent = parent.unwrap_or_else(|| config.genesis_hash.clone());
                let mut block = Block::new(parent, txn(writes), config.origin_id, 0);
                if let Some(client) = client {
                    block = block.with_client_id(client);
                }
                let timeout = timeout_secs.map(Duration::from_secs);
                self.block_on(self.mine(&config, block, timeout))
            }
            Commands::Replay { file, keys, verify } => self.replay(&file, &keys, verify),
            Commands::Simulate { blocks, timeout_secs, difficulty, no_op_every } => {
                let mut config = self.config.clone();
                if let Some(d) = difficulty {
                    config.num_zeroes = d;
                }
                let timeout = Duration::from_secs(timeout_secs);
                self.block_on(async {
                    let chain = Self::simulate(&config, blocks, timeout, no_op_every).await?;
                    Self::print_chain(&chain, &config);
                    Ok::<(), String>(())
                })
            }
            Commands::InitConfig { path, force } => self.init_config(&path, force),
        }
    }

    /// Write the loaded (or default) configuration to `path`
    fn init_config(&self, path: &Path, force: bool) -> Result<(), String> {
        if path.exists() && !force {
            return Err(format!("{} already exists (use --force to overwrite)", path.display()));
        }
        self.config.save(path)?;
        println!("Config written to {}", path.display());
        Ok(())
    }

    fn block_on<F: std::future::Future<Output = Result<(), String>>>(&self, fut: F) -> Result<(), String> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| format!("Failed to start runtime: {}", e))?;
        runtime.block_on(fut)
    }

    /// Mine a single block and print it
    async fn mine(&self, config: &LedgerConfig, block: Block, timeout: Option<Duration>) -> Result<(), String> {
        let miner = Arc::new(Miner::from_config(config));
        let mined = mine_with_timeout(&miner, block, timeout)
            .await
            .ok_or("Block generation cancelled")?;

        let json = serde_json::to_string_pretty(&mined.block)
            .map_err(|e| format!("Failed to serialize block: {}", e))?;
        println!("{}", json);
        eprintln!("Hash: {}", mined.result.hash);
        eprintln!("Attempts: {} in {:?} ({:.2} H/s)",
            mined.result.attempts, mined.result.duration, mined.result.hash_rate());
        Ok(())
    }

    /// Integrate a file of blocks and print the resulting chain state
    fn replay(&self, file: &Path, keys: &[String], verify: bool) -> Result<(), String> {
        let data = std::fs::read_to_string(file)
            .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
        let blocks: Vec<Block> = serde_json::from_str(&data)
            .map_err(|e| format!("Failed to parse blocks in {}: {}", file.display(), e))?;

        let (mut chain, rejected) = self.replay_blocks(blocks, verify);
        if rejected > 0 {
            println!("Rejected {} block(s) with insufficient proof of work", rejected);
        }
        Self::print_chain(&chain, &self.config);

        for key in keys {
            match chain.get(key) {
                Some(value) => println!("  {} = {}", key, value),
                None => println!("  {} is unset", key),
            }
        }
        Ok(())
    }

    /// Integrate blocks in order; returns the chain and the number rejected
    fn replay_blocks(&self, blocks: Vec<Block>, verify: bool) -> (BlockChain, usize) {
        let mut chain = BlockChain::from_config(&self.config);
        let miner = Miner::from_config(&self.config);
        let mut rejected = 0;

        for block in blocks {
            if verify && !miner.verify(&block) {
                log::warn!("Rejecting block {}: hash misses difficulty {}", block.hash(), miner.num_zeroes());
                rejected += 1;
                continue;
            }
            chain.integrate_block(block);
        }
        (chain, rejected)
    }

    /// Mine `count` blocks, each on the tip least in conflict with its write
    ///
    /// With `no_op_every = Some(n)`, every nth block carries no writes.
    async fn simulate(
        config: &LedgerConfig,
        count: usize,
        timeout: Duration,
        no_op_every: Option<usize>,
    ) -> Result<BlockChain, String> {
        let mut chain = BlockChain::from_config(config);
        let miner = Arc::new(Miner::from_config(config));

        for i in 0..count {
            let is_no_op = no_op_every.is_some_and(|n| n > 0 && (i + 1) % n == 0);
            let block = if is_no_op {
                miner.no_op_block(chain.chain_tip(&[]))
            } else {
                let key = format!("k{}", i % 4);
                let parent = chain.chain_tip(&[key.as_str()]);
                Block::new(parent, txn([(key, i.to_string())]), miner.origin_id(), 0)
            };

            match mine_with_timeout(&miner, block, Some(timeout)).await {
                Some(mined) => {
                    chain.integrate_block(mined.block);
                    log::info!("Block {} integrated, chain length {}",
                        mined.result.hash, chain.max_chain_length());
                }
                None => println!("Block {} cancelled after {:?}", i, timeout),
            }
        }
        Ok(chain)
    }

    /// Print chain summary
    fn print_chain(chain: &BlockChain, config: &LedgerConfig) {
        println!("Chain Info:");
        println!("  Genesis: {}", chain.genesis_hash());
        println!("  Blocks: {}", chain.len());
        println!("  Max chain length: {}", chain.max_chain_length());
        println!("  Purgatory: {}", chain.purgatory_len());

        let tips = chain.tips();
        println!("  Tips ({}):", tips.len());
        for tip in &tips {
            let validated = chain.is_validated(tip, config.confirmations).unwrap_or(false);
            println!("    {} (validated: {})", tip, validated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("a=1"), Ok(("a".to_string(), "1".to_string())));
        assert_eq!(parse_key_value("a=b=c"), Ok(("a".to_string(), "b=c".to_string())));
        assert_eq!(parse_key_value("a="), Ok(("a".to_string(), String::new())));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn test_cli_parses_mine() {
        let cli = Cli::try_parse_from([
            "forkledger", "mine", "--set", "a=1", "-s", "b=2", "--difficulty", "2",
        ]).unwrap();
        match cli.command {
            Commands::Mine { writes, difficulty, parent, .. } => {
                assert_eq!(writes.len(), 2);
                assert_eq!(difficulty, Some(2));
                assert_eq!(parent, None);
            }
            _ => panic!("expected mine command"),
        }
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli = Cli::try_parse_from(["forkledger", "replay", "blocks.json", "--config", "cfg.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cfg.json")));
    }

    #[test]
    fn test_replay_blocks_out_of_order() {
        let handler = CliHandler::with_config(LedgerConfig::default());
        let root = Block::no_op("deadb33f", 1);
        let child = Block::new(root.hash(), txn([("a", "1")]), 1, 0);
        let child_hash = child.hash();

        let (mut chain, rejected) = handler.replay_blocks(vec![child, root], false);

        assert_eq!(rejected, 0);
        assert_eq!(chain.tips(), vec![child_hash]);
        assert_eq!(chain.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_replay_blocks_verify_rejects_unmined() {
        let handler = CliHandler::with_config(LedgerConfig {
            num_zeroes: 8,
            ..LedgerConfig::default()
        });
        let (chain, rejected) = handler.replay_blocks(vec![Block::no_op("deadb33f", 1)], true);

        assert_eq!(rejected, 1);
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_simulate_builds_chain() {
        let config = LedgerConfig {
            num_zeroes: 1,
            seed: Some(3),
            ..LedgerConfig::default()
        };
        let chain = CliHandler::simulate(&config, 3, Duration::from_secs(30), None).await.unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.max_chain_length(), 3);
        assert_eq!(chain.purgatory_len(), 0);
    }

    #[tokio::test]
    async fn test_simulate_interleaves_no_op_blocks() {
        let config = LedgerConfig {
            num_zeroes: 1,
            origin_id: 4,
            seed: Some(3),
            ..LedgerConfig::default()
        };
        let mut chain = CliHandler::simulate(&config, 4, Duration::from_secs(30), Some(2)).await.unwrap();

        assert_eq!(chain.len(), 4);
        assert_eq!(chain.max_chain_length(), 4);

        let mut no_ops = 0;
        let mut hash = chain.tips()[0].clone();
        while hash != config.genesis_hash {
            let block = chain.block(&hash).unwrap().clone();
            assert_eq!(block.origin_id, 4);
            if block.is_no_op() {
                no_ops += 1;
            }
            hash = block.parent_hash;
        }
        assert_eq!(no_ops, 2);
        // k0 from block 0, k2 from block 2; blocks 1 and 3 were no-ops
        assert_eq!(chain.get("k0").as_deref(), Some("0"));
        assert_eq!(chain.get("k1"), None);
        assert_eq!(chain.get("k2").as_deref(), Some("2"));
    }

    #[test]
    fn test_init_config_writes_loadable_file() {
        let path = std::env::temp_dir().join(format!("forkledger-init-{}.json", std::process::id()));
        std::fs::remove_file(&path).ok();
        let config = LedgerConfig {
            num_zeroes: 3,
            seed: Some(11),
            ..LedgerConfig::default()
        };
        let handler = CliHandler::with_config(config.clone());

        handler.init_config(&path, false).unwrap();
        let refused = handler.init_config(&path, false);
        let forced = handler.init_config(&path, true);
        let loaded = LedgerConfig::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(refused.unwrap_err().contains("already exists"));
        assert!(forced.is_ok());
        assert_eq!(loaded.unwrap(), config);
    }

    #[test]
    fn test_cli_parses_init_config() {
        let cli = Cli::try_parse_from(["forkledger", "init-config", "ledger.json", "--force"]).unwrap();
        match cli.command {
            Commands::InitConfig { path, force } => {
                assert_eq!(path, PathBuf::from("ledger.json"));
                assert!(force);
            }
            _ => panic!("expected init-config command"),
        }
    }

    #[tokio::test]
    async fn test_mine_with_timeout_cancels() {
        let miner = Arc::new(Miner::new(64, 1));
        let mined = mine_with_timeout(&miner, Block::no_op("deadb33f", 1), Some(Duration::from_millis(50))).await;
        assert!(mined.is_none());
    }
}
