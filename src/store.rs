//! Block store contract and the in-memory reference store

use crate::constants::MEDIAN_TIME_SPAN;
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::lite_block::LiteBlock;
use crate::object::BitcoinObject;
use crate::params::NetworkParams;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Persistence the chain manager needs. Each call is atomic on its own; keeping
/// invariants across calls is the caller's job.
pub trait BlockStore: Send + Sync {
    fn get(&self, hash: &Sha256Hash) -> Result<Option<LiteBlock>>;

    fn put(&self, block: &LiteBlock) -> Result<()>;

    fn get_chain_head(&self) -> Result<LiteBlock>;

    fn set_chain_head(&self, block: &LiteBlock) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Parent of `block`, if stored.
    fn get_prev(&self, block: &LiteBlock) -> Result<Option<LiteBlock>> {
        self.get(&block.prev_block_hash())
    }
}

/// Ancestor of `block` at `height`, walking parent links. `None` when the
/// height is out of range or the walk runs out of stored blocks.
pub fn get_ancestor<S: BlockStore + ?Sized>(
    store: &S,
    block: &LiteBlock,
    height: i32,
) -> Result<Option<LiteBlock>> {
    if height < 0 || height > block.height() {
        return Ok(None);
    }
    let mut cursor = block.clone();
    while cursor.height() > height {
        match store.get_prev(&cursor)? {
            Some(prev) => cursor = prev,
            None => return Ok(None),
        }
    }
    Ok(Some(cursor))
}

/// GetMedianTimePast: median of the timestamps of `block` and up to ten of its
/// ancestors.
pub fn median_time_past<S: BlockStore + ?Sized>(store: &S, block: &LiteBlock) -> Result<u32> {
    let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
    times.push(block.time());
    let mut cursor = block.clone();
    while times.len() < MEDIAN_TIME_SPAN {
        match store.get_prev(&cursor)? {
            Some(prev) => {
                times.push(prev.time());
                cursor = prev;
            }
            None => break,
        }
    }
    times.sort_unstable();
    Ok(times[times.len() / 2])
}

/// Blocks kept as their 120-byte records; every `get` hands back a freshly
/// parsed, immutable LiteBlock.
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<Sha256Hash, Bytes>>,
    head: RwLock<Sha256Hash>,
    closed: AtomicBool,
}

impl MemoryBlockStore {
    /// Store holding `genesis` as its only block and chain head.
    pub fn new(genesis: &LiteBlock) -> Self {
        let hash = genesis.hash();
        let mut blocks = HashMap::new();
        blocks.insert(hash, genesis.serialize());
        MemoryBlockStore {
            blocks: RwLock::new(blocks),
            head: RwLock::new(hash),
            closed: AtomicBool::new(false),
        }
    }

    pub fn for_network(params: &NetworkParams) -> Result<Self> {
        Ok(Self::new(&params.genesis_lite_block()?))
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConsensusError::BlockStore("store closed".to_string()));
        }
        Ok(())
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, hash: &Sha256Hash) -> Result<Option<LiteBlock>> {
        self.check_open()?;
        let record = self.blocks.read().get(hash).cloned();
        match record {
            Some(bytes) => Ok(Some(LiteBlock::parse(bytes).map_err(|e| {
                ConsensusError::BlockStore(format!("Corrupt record for {}: {}", hash, e))
            })?)),
            None => Ok(None),
        }
    }

    fn put(&self, block: &LiteBlock) -> Result<()> {
        self.check_open()?;
        block
            .chain_info()
            .check_chain_work_fits()
            .map_err(|e| ConsensusError::BlockStore(e.to_string()))?;
        let hash = block.hash();
        self.blocks.write().insert(hash, block.serialize());
        tracing::debug!(height = block.height(), hash = %hash, "Block stored");
        Ok(())
    }

    fn get_chain_head(&self) -> Result<LiteBlock> {
        self.check_open()?;
        let hash = *self.head.read();
        self.get(&hash)?.ok_or_else(|| {
            ConsensusError::BlockStore(format!("Chain head {} missing from store", hash))
        })
    }

    fn set_chain_head(&self, block: &LiteBlock) -> Result<()> {
        self.check_open()?;
        let hash = block.hash();
        if !self.blocks.read().contains_key(&hash) {
            return Err(ConsensusError::BlockStore(format!(
                "Cannot set unstored block {} as chain head",
                hash
            )));
        }
        *self.head.write() = hash;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
