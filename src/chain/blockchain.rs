// Block tree with fork choice and purgatory

use crate::chain::{ChainError, TreeNode};
use crate::config::LedgerConfig;
use crate::core::Block;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

/// Tree of integrated blocks rooted at a genesis hash
///
/// Not safe for concurrent mutation; callers serialize access.
pub struct BlockChain {
    /// Root identifier (not itself a node)
    genesis_hash: String,
    /// Blocks whose parent is genesis
    genesis_children: Vec<String>,
    /// Every integrated block, keyed by hash. Never pruned.
    nodes: HashMap<String, TreeNode>,
    /// Leaves at the current maximum depth
    tips: HashSet<String>,
    /// Blocks waiting for their parent, in arrival order
    purgatory: Vec<Block>,
    /// Tie-break source for fork choice
    rng: StdRng,
}

impl BlockChain {
    /// Create an empty chain; fork-choice tie-breaks draw from entropy
    pub fn new(genesis_hash: impl Into<String>) -> Self {
        Self::with_rng(genesis_hash.into(), StdRng::from_entropy())
    }

    /// Create an empty chain with reproducible tie-breaks
    pub fn with_seed(genesis_hash: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(genesis_hash.into(), StdRng::seed_from_u64(seed))
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        match config.seed {
            Some(seed) => Self::with_seed(config.genesis_hash.clone(), seed),
            None => Self::new(config.genesis_hash.clone()),
        }
    }

    fn with_rng(genesis_hash: String, rng: StdRng) -> Self {
        Self {
            genesis_hash,
            genesis_children: Vec::new(),
            nodes: HashMap::new(),
            tips: HashSet::new(),
            purgatory: Vec::new(),
            rng,
        }
    }

    pub fn genesis_hash(&self) -> &str {
        &self.genesis_hash
    }

    /// Pick the tip a new block carrying `current_keys` should build on
    ///
    /// Each tip is scored by how many of `current_keys` its own block writes
    /// (ancestors are not consulted). Among the tips with the fewest conflicts
    /// one is chosen uniformly at random. An empty chain yields genesis.
    pub fn chain_tip(&mut self, current_keys: &[&str]) -> String {
        if self.tips.is_empty() {
            return self.genesis_hash.clone();
        }

        let mut fewest = usize::MAX;
        let mut candidates: Vec<&String> = Vec::new();
        for hash in &self.tips {
            let block = &expect_node(&self.nodes, hash).block;
            let conflicts = count_key_conflicts(current_keys, block);
            match conflicts.cmp(&fewest) {
                Ordering::Less => {
                    fewest = conflicts;
                    candidates.clear();
                    candidates.push(hash);
                }
                Ordering::Equal => candidates.push(hash),
                Ordering::Greater => {}
            }
        }

        // Sort first so a seeded rng gives the same answer regardless of set order
        candidates.sort_unstable();
        candidates
            .choose(&mut self.rng)
            .map(|hash| hash.to_string())
            .expect("non-empty tip set yields a candidate")
    }

    /// Hashes of the blocks built on `parent_hash`
    ///
    /// An empty string asks for the genesis hash itself.
    pub fn children(&self, parent_hash: &str) -> Result<Vec<String>, ChainError> {
        if parent_hash.is_empty() {
            return Ok(vec![self.genesis_hash.clone()]);
        }
        if parent_hash == self.genesis_hash {
            return Ok(self.genesis_children.clone());
        }
        self.nodes
            .get(parent_hash)
            .map(|node| node.children.clone())
            .ok_or_else(|| ChainError::UnknownHash(parent_hash.to_string()))
    }

    /// Latest value written for `key` on the current chain
    ///
    /// Walks from the tip back to genesis, so this is linear in chain depth.
    /// The block closest to the tip wins.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let tip = self.chain_tip(&[]);
        let mut hash = tip.as_str();
        while hash != self.genesis_hash {
            let node = expect_node(&self.nodes, hash);
            if let Some(value) = node.block.txn.get(key) {
                return Some(value.clone());
            }
            hash = node.block.parent_hash.as_str();
        }
        None
    }

    /// Depth of a block (first-generation blocks are 1, genesis is 0)
    pub fn tx_depth(&self, hash: &str) -> Result<usize, ChainError> {
        if hash == self.genesis_hash {
            return Ok(0);
        }
        self.nodes
            .get(hash)
            .map(|node| node.depth)
            .ok_or_else(|| ChainError::UnknownHash(hash.to_string()))
    }

    /// Attach a block to the tree, or park it until its parent arrives
    ///
    /// Integrating a block also replays every parked block waiting on it,
    /// and every block waiting on those, however long the cascade.
    pub fn integrate_block(&mut self, block: Block) {
        if let Some(hash) = self.attach(block) {
            self.replay_purgatory(hash);
        }
    }

    /// Link a block under its parent; returns its hash, or `None` if parked
    fn attach(&mut self, block: Block) -> Option<String> {
        let from_genesis = block.parent_hash == self.genesis_hash;
        let parent_depth = if from_genesis {
            0
        } else {
            match self.nodes.get(&block.parent_hash) {
                Some(parent) => parent.depth,
                None => {
                    log::info!("Parent {} unknown, block sent to purgatory", block.parent_hash);
                    self.purgatory.push(block);
                    return None;
                }
            }
        };

        let hash = block.hash();
        let parent_hash = block.parent_hash.clone();
        let depth = parent_depth + 1;
        log::debug!("Integrating block {} at depth {}", hash, depth);

        match self.nodes.get_mut(&hash) {
            // Same content seen before: replace the block, keep its subtree
            Some(existing) => {
                existing.depth = depth;
                existing.block = block;
            }
            None => {
                self.nodes.insert(hash.clone(), TreeNode::new(depth, block));
            }
        }

        if from_genesis {
            self.genesis_children.push(hash.clone());
        } else {
            self.nodes
                .get_mut(&parent_hash)
                .expect("parent checked above")
                .children
                .push(hash.clone());
        }

        self.update_tips(&parent_hash, &hash);
        Some(hash)
    }

    /// True once `hash` has at least `confirmations` blocks built on top of it
    pub fn is_validated(&self, hash: &str, confirmations: usize) -> Result<bool, ChainError> {
        if self.is_in_purgatory(hash) {
            return Ok(false);
        }
        Ok(self.progeny_count(hash)? >= confirmations)
    }

    /// True if `hash` lies on some chain of maximal length
    pub fn is_on_longest_chain(&self, hash: &str) -> Result<bool, ChainError> {
        if self.is_in_purgatory(hash) {
            return Ok(false);
        }
        let depth = self.tx_depth(hash)?;
        Ok(depth + self.progeny_count(hash)? == self.max_chain_length())
    }

    /// Depth of the current tips (0 for an empty chain)
    pub fn max_chain_length(&self) -> usize {
        self.tips
            .iter()
            .map(|hash| expect_node(&self.nodes, hash).depth)
            .max()
            .unwrap_or(0)
    }

    /// Length of the longest descendant path below `hash`
    ///
    /// A leaf has progeny count 0. Only the longest branch counts, not the
    /// total number of descendants.
    pub fn progeny_count(&self, hash: &str) -> Result<usize, ChainError> {
        let (base_depth, children) = if hash == self.genesis_hash {
            (0, &self.genesis_children)
        } else {
            let node = self
                .nodes
                .get(hash)
                .ok_or_else(|| ChainError::UnknownHash(hash.to_string()))?;
            (node.depth, &node.children)
        };

        // Depth grows by one per generation, so the longest path is the
        // deepest descendant's depth relative to this node
        let mut deepest = base_depth;
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = children.iter().map(String::as_str).collect();
        while let Some(child) = stack.pop() {
            if !visited.insert(child) {
                continue;
            }
            let node = expect_node(&self.nodes, child);
            deepest = deepest.max(node.depth);
            stack.extend(node.children.iter().map(String::as_str));
        }
        Ok(deepest - base_depth)
    }

    /// Current tips, sorted by hash
    pub fn tips(&self) -> Vec<String> {
        let mut tips: Vec<String> = self.tips.iter().cloned().collect();
        tips.sort();
        tips
    }

    pub fn is_in_purgatory(&self, hash: &str) -> bool {
        self.purgatory.iter().any(|block| block.hash() == hash)
    }

    pub fn purgatory_len(&self) -> usize {
        self.purgatory.len()
    }

    /// Whether `hash` is an integrated block
    pub fn contains(&self, hash: &str) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn block(&self, hash: &str) -> Option<&Block> {
        self.nodes.get(hash).map(|node| &node.block)
    }

    pub fn node(&self, hash: &str) -> Option<&TreeNode> {
        self.nodes.get(hash)
    }

    /// Number of integrated blocks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replace the parent with the new block and keep only max-depth tips
    fn update_tips(&mut self, parent_hash: &str, hash: &str) {
        self.tips.remove(parent_hash);
        self.tips.insert(hash.to_string());

        let max_depth = self.max_chain_length();
        let nodes = &self.nodes;
        self.tips.retain(|tip| expect_node(nodes, tip).depth == max_depth);
    }

    /// Drain purgatory breadth-first from a freshly attached block
    fn replay_purgatory(&mut self, hash: String) {
        let mut pending = VecDeque::from([hash]);
        while let Some(hash) = pending.pop_front() {
            if self.purgatory.is_empty() {
                break;
            }
            let (ready, waiting): (Vec<Block>, Vec<Block>) = std::mem::take(&mut self.purgatory)
                .into_iter()
                .partition(|block| block.parent_hash == hash);
            self.purgatory = waiting;

            if !ready.is_empty() {
                log::debug!("Replaying {} block(s) from purgatory onto {}", ready.len(), hash);
            }
            pending.extend(ready.into_iter().filter_map(|block| self.attach(block)));
        }
    }
}

/// Number of `current_keys` written by `block` itself
fn count_key_conflicts(current_keys: &[&str], block: &Block) -> usize {
    current_keys
        .iter()
        .filter(|key| block.txn.contains_key(**key))
        .count()
}

fn expect_node<'a>(nodes: &'a HashMap<String, TreeNode>, hash: &str) -> &'a TreeNode {
    match nodes.get(hash) {
        Some(node) => node,
        None => panic!("chain invariant broken: {} referenced but not in node arena", hash),
    }
}
