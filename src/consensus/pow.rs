// Proof of Work implementation

use crate::config::LedgerConfig;
use crate::core::{Block, sha256_hex};
use std::fmt::Write;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Check that the first `num_zeroes` hex characters of `hash` are all '0'
///
/// A difficulty longer than the hash itself is never satisfied.
pub fn is_hash_valid(hash: &str, num_zeroes: usize) -> bool {
    hash.len() >= num_zeroes && hash.bytes().take(num_zeroes).all(|b| b == b'0')
}

/// Cancellation flag for a single search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (idempotent)
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Mining result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningResult {
    /// The nonce that was found
    pub nonce: u32,
    /// The resulting block hash
    pub hash: String,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64()
    }
}

/// How a search ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    Found(MiningResult),
    Cancelled,
}

/// A block whose nonce satisfies the miner's difficulty
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub result: MiningResult,
}

/// Handle to a search running on the blocking pool
///
/// Exactly one of `success` and `cancelled` resolves; the other sender is
/// dropped, so both can be polled in a `tokio::select!`.
pub struct MiningTask {
    pub success: oneshot::Receiver<MinedBlock>,
    pub cancelled: oneshot::Receiver<()>,
    token: CancelToken,
}

impl MiningTask {
    /// Cancel this particular search
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the search to finish; `None` if it was cancelled
    pub async fn wait(self) -> Option<MinedBlock> {
        let MiningTask { success, cancelled, .. } = self;
        tokio::select! {
            Ok(mined) = success => Some(mined),
            Ok(()) = cancelled => None,
            else => None,
        }
    }
}

/// Proof of Work miner
pub struct Miner {
    /// Required count of leading hex zeros
    num_zeroes: usize,
    /// Proposer id for blocks built by this miner
    origin_id: u32,
    /// Token of the search in progress, if any
    current: Mutex<Option<CancelToken>>,
}

impl Miner {
    /// Create a new miner with fixed difficulty
    pub fn new(num_zeroes: usize, origin_id: u32) -> Self {
        Self {
            num_zeroes,
            origin_id,
            current: Mutex::new(None),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.num_zeroes, config.origin_id)
    }

    pub fn num_zeroes(&self) -> usize {
        self.num_zeroes
    }

    pub fn origin_id(&self) -> u32 {
        self.origin_id
    }

    /// Build an unmined no-op block on `parent_hash` stamped with this miner's origin
    pub fn no_op_block(&self, parent_hash: impl Into<String>) -> Block {
        Block::no_op(parent_hash, self.origin_id)
    }

    /// Verify that a block's hash satisfies this miner's difficulty
    pub fn verify(&self, block: &Block) -> bool {
        is_hash_valid(&block.hash(), self.num_zeroes)
    }

    /// Install a fresh token as the current search and return it
    ///
    /// A miner runs one search at a time: a search still in progress is
    /// cancelled and superseded. Any cancel issued after this returns reaches
    /// the new search.
    pub fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        if let Some(previous) = self.lock_current().replace(token.clone()) {
            log::warn!("New block generation started, cancelling the search in progress");
            previous.cancel();
        }
        token
    }

    /// Cancel the search in progress; no effect when idle
    pub fn cancel_block_generation(&self) {
        if let Some(token) = self.lock_current().as_ref() {
            token.cancel();
        }
    }

    /// Brute-force the nonce of `block` until its hash meets the difficulty
    ///
    /// The token is checked before every hash, so no hashing happens once a
    /// cancel has been observed. The nonce wraps around after `u32::MAX`; the
    /// search only stops on success or cancellation.
    pub fn search(&self, block: &mut Block, token: &CancelToken) -> MiningOutcome {
        let start_time = Instant::now();
        let data = block.header_string();
        let mut input = String::with_capacity(data.len() + 10);
        let mut attempts = 0u64;
        let mut nonce = 0u32;

        loop {
            if token.is_cancelled() {
                log::info!("Block generation cancelled after {} attempts", attempts);
                return MiningOutcome::Cancelled;
            }

            input.clear();
            input.push_str(&data);
            let _ = write!(input, "{}", nonce);
            let hash = sha256_hex(&input);
            attempts += 1;

            if is_hash_valid(&hash, self.num_zeroes) {
                block.nonce = nonce;
                let duration = start_time.elapsed();
                log::info!("Mined block {} (nonce {}, {} attempts in {:?})",
                    hash, nonce, attempts, duration);
                return MiningOutcome::Found(MiningResult {
                    nonce,
                    hash,
                    attempts,
                    duration,
                });
            }

            // Progress indicator every 100k attempts
            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }

            if nonce == u32::MAX {
                log::warn!("Nonce space exhausted at difficulty {}, wrapping around", self.num_zeroes);
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Mine `block` on the calling thread and report through the signal pair
    ///
    /// Exactly one of `on_success` and `on_cancelled` fires. The block's nonce
    /// is updated in place on success.
    pub fn generate_valid_block(
        &self,
        block: &mut Block,
        on_success: oneshot::Sender<()>,
        on_cancelled: oneshot::Sender<()>,
    ) -> MiningOutcome {
        let token = self.begin();
        let outcome = self.search(block, &token);
        self.finish(&token);

        match &outcome {
            MiningOutcome::Found(_) => {
                let _ = on_success.send(());
            }
            MiningOutcome::Cancelled => {
                let _ = on_cancelled.send(());
            }
        }
        outcome
    }

    /// Mine `block` on tokio's blocking pool
    ///
    /// The cancellation token is installed before the task is spawned, so a
    /// `cancel_block_generation` issued after this returns is never lost.
    /// Must be called from within a tokio runtime.
    pub fn spawn_generation(self: &Arc<Self>, mut block: Block) -> MiningTask {
        let token = self.begin();
        let (success_tx, success) = oneshot::channel();
        let (cancelled_tx, cancelled) = oneshot::channel();

        let miner = Arc::clone(self);
        let search_token = token.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = miner.search(&mut block, &search_token);
            miner.finish(&search_token);

            match outcome {
                MiningOutcome::Found(result) => {
                    let _ = success_tx.send(MinedBlock { block, result });
                }
                MiningOutcome::Cancelled => {
                    let _ = cancelled_tx.send(());
                }
            }
        });

        MiningTask {
            success,
            cancelled,
            token,
        }
    }

    /// Clear the current token if it still belongs to the finished search
    fn finish(&self, token: &CancelToken) {
        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|t| t.same_as(token)) {
            *current = None;
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<CancelToken>> {
        // The guarded value is a plain token, so a poisoned lock is still usable
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
