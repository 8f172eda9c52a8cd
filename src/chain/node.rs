// Tree node for an integrated block

use crate::core::Block;

/// One integrated block and the hashes of the blocks built on it
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Distance from genesis (first-generation blocks have depth 1)
    pub depth: usize,
    /// The block itself
    pub block: Block,
    /// Child hashes in arrival order; forks show up as several entries,
    /// and a block integrated twice is listed twice
    pub children: Vec<String>,
}

impl TreeNode {
    pub fn new(depth: usize, block: Block) -> Self {
        Self {
            depth,
            block,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
