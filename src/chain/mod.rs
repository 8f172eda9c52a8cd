// Block tree, fork choice and orphan handling

mod blockchain;
mod error;
mod node;

pub use blockchain::BlockChain;
pub use error::ChainError;
pub use node::TreeNode;
