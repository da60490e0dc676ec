//! Chain manager: header acceptance, best-chain selection by cumulative work,
//! reorganization, rollback and orphan tracking
//!
//! All chain-mutating operations run under one lock, so acceptance and
//! reorganization are serialized per chain. Listeners registered with the
//! [`SameThreadExecutor`] run inside that lock and must not call back into the
//! chain.

use crate::block::FullBlock;
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::difficulty::RulesPool;
use crate::header::Header;
use crate::lite_block::{BlockMeta, LiteBlock};
use crate::object::{BitcoinObject, Hashable};
use crate::params::{ChainConfig, NetworkParams};
use crate::store::{self, BlockStore};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Notified with every new best-chain tip.
pub trait NewBestBlockListener: Send + Sync {
    fn notify_new_best_block(&self, block: &LiteBlock);
}

impl<F> NewBestBlockListener for F
where
    F: Fn(&LiteBlock) + Send + Sync,
{
    fn notify_new_best_block(&self, block: &LiteBlock) {
        self(block)
    }
}

/// Notified when the best chain switches branches or is rolled back. Both
/// block lists run tip-first down to (excluding) the split point.
pub trait ReorganizeListener: Send + Sync {
    fn reorganize(&self, split_point: &LiteBlock, old_blocks: &[LiteBlock], new_blocks: &[LiteBlock]);
}

impl<F> ReorganizeListener for F
where
    F: Fn(&LiteBlock, &[LiteBlock], &[LiteBlock]) + Send + Sync,
{
    fn reorganize(&self, split_point: &LiteBlock, old_blocks: &[LiteBlock], new_blocks: &[LiteBlock]) {
        self(split_point, old_blocks, new_blocks)
    }
}

pub type Job = Box<dyn FnOnce() + Send>;

/// Where listener callbacks run.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs each callback immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameThreadExecutor;

impl Executor for SameThreadExecutor {
    fn execute(&self, job: Job) {
        job()
    }
}

struct Registration<L: ?Sized> {
    executor: Arc<dyn Executor>,
    listener: Arc<L>,
}

/// Result of offering a block to the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The block is the new best tip. `reorganized` is set when the previous
    /// tip is not its parent.
    Connected { block: LiteBlock, reorganized: bool },
    /// Stored on a branch with less work than the best chain.
    SideBranch(LiteBlock),
    /// Parent unknown; parked until [`BlockChain::drain_orphans`] can connect it.
    Orphan { missing_parent: Sha256Hash },
    /// Already stored, and not better than the current tip.
    AlreadyKnown(LiteBlock),
}

impl AcceptOutcome {
    pub fn is_new_tip(&self) -> bool {
        matches!(self, AcceptOutcome::Connected { .. })
    }
}

#[derive(Debug, Clone)]
struct OrphanBlock {
    header: Header,
    meta: BlockMeta,
}

/// Path between two tips through their split point.
struct ReorgPath {
    split_point: LiteBlock,
    old_blocks: Vec<LiteBlock>,
    new_blocks: Vec<LiteBlock>,
}

struct ChainState {
    head: LiteBlock,
    orphans: HashMap<Sha256Hash, OrphanBlock>,
    waiting: HashMap<Sha256Hash, Vec<Sha256Hash>>,
    orphan_order: VecDeque<Sha256Hash>,
    best_block_listeners: Vec<Registration<dyn NewBestBlockListener>>,
    reorganize_listeners: Vec<Registration<dyn ReorganizeListener>>,
}

impl ChainState {
    fn remove_orphan(&mut self, hash: &Sha256Hash) -> Option<OrphanBlock> {
        let orphan = self.orphans.remove(hash)?;
        let parent = orphan.header.prev_block_hash();
        if let Some(children) = self.waiting.get_mut(&parent) {
            children.retain(|child| child != hash);
            if children.is_empty() {
                self.waiting.remove(&parent);
            }
        }
        self.orphan_order.retain(|queued| queued != hash);
        Some(orphan)
    }
}

/// Header chain over a block store.
pub struct BlockChain<S: BlockStore> {
    params: NetworkParams,
    config: ChainConfig,
    store: S,
    state: Mutex<ChainState>,
}

impl<S: BlockStore> BlockChain<S> {
    pub fn new(store: S, params: NetworkParams) -> Result<Self> {
        Self::with_config(store, params, ChainConfig::default())
    }

    pub fn with_config(store: S, params: NetworkParams, config: ChainConfig) -> Result<Self> {
        let head = store.get_chain_head()?;
        info!(height = head.height(), hash = %head.hash(), network = %params.id, "Chain opened");
        Ok(BlockChain {
            params,
            config,
            store,
            state: Mutex::new(ChainState {
                head,
                orphans: HashMap::new(),
                waiting: HashMap::new(),
                orphan_order: VecDeque::new(),
                best_block_listeners: Vec::new(),
                reorganize_listeners: Vec::new(),
            }),
        })
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn chain_head(&self) -> LiteBlock {
        self.state.lock().head.clone()
    }

    pub fn best_height(&self) -> i32 {
        self.state.lock().head.height()
    }

    pub fn add_new_best_block_listener(&self, listener: Arc<dyn NewBestBlockListener>) {
        self.add_new_best_block_listener_with(Arc::new(SameThreadExecutor), listener);
    }

    pub fn add_new_best_block_listener_with(
        &self,
        executor: Arc<dyn Executor>,
        listener: Arc<dyn NewBestBlockListener>,
    ) {
        self.state.lock().best_block_listeners.push(Registration { executor, listener });
    }

    pub fn add_reorganize_listener(&self, listener: Arc<dyn ReorganizeListener>) {
        self.add_reorganize_listener_with(Arc::new(SameThreadExecutor), listener);
    }

    pub fn add_reorganize_listener_with(
        &self,
        executor: Arc<dyn Executor>,
        listener: Arc<dyn ReorganizeListener>,
    ) {
        self.state.lock().reorganize_listeners.push(Registration { executor, listener });
    }

    /// Accept a header whose block body is unknown.
    pub fn accept_header(&self, header: Header) -> Result<AcceptOutcome> {
        self.accept(header, BlockMeta::unknown())
    }

    /// Verify a full block, then accept its header with the body summary.
    pub fn accept_block(&self, block: &FullBlock) -> Result<AcceptOutcome> {
        if let Err(e) = block.verify(&self.params) {
            warn!(hash = %block.hash(), error = %e, "Block rejected");
            return Err(e);
        }
        let meta = BlockMeta::new(block.transactions().len() as i32, block.length() as i64);
        self.accept(block.header().clone(), meta)
    }

    pub fn accept(&self, header: Header, meta: BlockMeta) -> Result<AcceptOutcome> {
        let mut state = self.state.lock();
        self.accept_locked(&mut state, header, meta)
    }

    /// Accept: Header × BlockMeta → AcceptOutcome
    ///
    /// 1. Check the header's own proof of work
    /// 2. Known block: reconnect it if it beats the tip, else report it
    /// 3. Unknown parent: park as an orphan
    /// 4. Run the difficulty rules selected by the parent's height
    /// 5. Build the child's chain position
    /// 6. More work than the tip: store, move the head, notify listeners
    /// 7. Otherwise: store as a side branch
    fn accept_locked(&self, state: &mut ChainState, header: Header, meta: BlockMeta) -> Result<AcceptOutcome> {
        let hash = header.hash();

        // 1. Proof of work
        if self.config.check_proof_of_work {
            if let Err(e) = header.check_proof_of_work(&self.params) {
                warn!(hash = %hash, error = %e, "Header rejected");
                return Err(e);
            }
        }

        // 2. Already stored
        if let Some(existing) = self.store.get(&hash)? {
            if existing.chain_work() > state.head.chain_work() {
                let reorganized = self.switch_tip(state, existing.clone(), false)?;
                return Ok(AcceptOutcome::Connected { block: existing, reorganized });
            }
            debug!(hash = %hash, height = existing.height(), "Block already known");
            return Ok(AcceptOutcome::AlreadyKnown(existing));
        }

        // 3. Orphan
        let prev_hash = header.prev_block_hash();
        let Some(prev) = self.store.get(&prev_hash)? else {
            self.park_orphan(state, hash, header, meta);
            return Ok(AcceptOutcome::Orphan { missing_parent: prev_hash });
        };

        // 4. Difficulty
        let rules = RulesPool::for_height(prev.height(), &self.params);
        if let Err(e) = rules.check(&prev, &header, &self.store, &self.params) {
            warn!(hash = %hash, height = prev.height() + 1, bits = header.bits(), error = %e, "Header rejected");
            return Err(e);
        }

        // 5. Chain position
        let mut child = prev.build_next_in_chain(header, meta);
        debug!(hash = %hash, height = child.height(), "Header accepted");

        // 6. New best tip
        if child.chain_work() > state.head.chain_work() {
            let reorganized = self.switch_tip(state, child.clone(), true)?;
            return Ok(AcceptOutcome::Connected { block: child, reorganized });
        }

        // 7. Side branch
        child.chain_info_mut()?.set_best_chain_head(Some(state.head.hash()));
        self.store.put(&child)?;
        debug!(hash = %hash, height = child.height(), "Block stored on side branch");
        Ok(AcceptOutcome::SideBranch(child))
    }

    /// Make `new_tip` the head. The path is worked out before anything is
    /// written; `store_tip` writes the new tip itself first.
    fn switch_tip(&self, state: &mut ChainState, new_tip: LiteBlock, store_tip: bool) -> Result<bool> {
        let path = self.find_split(&state.head, &new_tip)?;
        if store_tip {
            self.store.put(&new_tip)?;
        }
        self.store.set_chain_head(&new_tip)?;
        state.head = new_tip.clone();

        let reorganized = !path.old_blocks.is_empty();
        if reorganized {
            info!(
                split_height = path.split_point.height(),
                disconnected = path.old_blocks.len(),
                connected = path.new_blocks.len(),
                "Chain reorganized"
            );
            self.notify_reorganize(state, &path.split_point, path.old_blocks, path.new_blocks);
        }
        info!(height = new_tip.height(), hash = %new_tip.hash(), "New best block");
        self.notify_new_best_block(state, &new_tip);
        Ok(reorganized)
    }

    /// FindSplit: walk both tips back until they meet.
    ///
    /// 1. Step back whichever side is higher (the old side on a tie)
    /// 2. Stop when both point at the same block
    /// 3. A missing parent on either side is a store error
    fn find_split(&self, old_tip: &LiteBlock, new_tip: &LiteBlock) -> Result<ReorgPath> {
        let mut old_cursor = old_tip.clone();
        let mut new_cursor = new_tip.clone();
        let mut old_blocks = Vec::new();
        let mut new_blocks = Vec::new();

        while old_cursor.hash() != new_cursor.hash() {
            if old_cursor.height() >= new_cursor.height() {
                let prev = self.require_prev(&old_cursor)?;
                old_blocks.push(std::mem::replace(&mut old_cursor, prev));
            } else {
                let prev = self.require_prev(&new_cursor)?;
                new_blocks.push(std::mem::replace(&mut new_cursor, prev));
            }
        }
        Ok(ReorgPath { split_point: old_cursor, old_blocks, new_blocks })
    }

    fn require_prev(&self, block: &LiteBlock) -> Result<LiteBlock> {
        self.store.get_prev(block)?.ok_or_else(|| {
            ConsensusError::BlockStore(format!(
                "Broken ancestry: parent {} of block {} at height {} not stored",
                block.prev_block_hash(),
                block.hash(),
                block.height()
            ))
        })
    }

    fn notify_new_best_block(&self, state: &ChainState, block: &LiteBlock) {
        for registration in &state.best_block_listeners {
            let listener = Arc::clone(&registration.listener);
            let block = block.clone();
            registration
                .executor
                .execute(Box::new(move || listener.notify_new_best_block(&block)));
        }
    }

    fn notify_reorganize(
        &self,
        state: &ChainState,
        split_point: &LiteBlock,
        old_blocks: Vec<LiteBlock>,
        new_blocks: Vec<LiteBlock>,
    ) {
        let old_blocks = Arc::new(old_blocks);
        let new_blocks = Arc::new(new_blocks);
        for registration in &state.reorganize_listeners {
            let listener = Arc::clone(&registration.listener);
            let split_point = split_point.clone();
            let old_blocks = Arc::clone(&old_blocks);
            let new_blocks = Arc::clone(&new_blocks);
            registration.executor.execute(Box::new(move || {
                listener.reorganize(&split_point, &old_blocks, &new_blocks)
            }));
        }
    }

    /// Rollback: move the head back to the ancestor at `height`.
    ///
    /// 1. height must lie in [0, current height]
    /// 2. Walk the head back through the store; a missing parent is a store error
    /// 3. Set the ancestor as head and notify reorganize listeners
    pub fn rollback(&self, height: i32) -> Result<LiteBlock> {
        let mut state = self.state.lock();

        // 1. Range
        let head = state.head.clone();
        if height < 0 || height > head.height() {
            return Err(ConsensusError::IllegalState(format!(
                "Cannot roll back to height {} from height {}",
                height,
                head.height()
            )));
        }

        // 2. Walk back
        let mut cursor = head;
        let mut old_blocks = Vec::new();
        while cursor.height() > height {
            let prev = self.require_prev(&cursor)?;
            old_blocks.push(std::mem::replace(&mut cursor, prev));
        }

        // 3. Move the head
        self.store.set_chain_head(&cursor)?;
        state.head = cursor.clone();
        if !old_blocks.is_empty() {
            info!(height, disconnected = old_blocks.len(), hash = %cursor.hash(), "Chain rolled back");
            self.notify_reorganize(&state, &cursor, old_blocks, Vec::new());
        }
        Ok(cursor)
    }

    /// Median timestamp of `block` and up to ten ancestors.
    pub fn median_time_past(&self, block: &LiteBlock) -> Result<u32> {
        store::median_time_past(&self.store, block)
    }

    fn park_orphan(&self, state: &mut ChainState, hash: Sha256Hash, header: Header, meta: BlockMeta) {
        if state.orphans.contains_key(&hash) {
            return;
        }
        if self.config.max_orphan_blocks == 0 {
            warn!(hash = %hash, "Orphan dropped, orphan pool disabled");
            return;
        }
        while state.orphans.len() >= self.config.max_orphan_blocks {
            let Some(oldest) = state.orphan_order.front().copied() else {
                break;
            };
            state.remove_orphan(&oldest);
            warn!(hash = %oldest, "Orphan evicted");
        }

        let parent = header.prev_block_hash();
        state.waiting.entry(parent).or_default().push(hash);
        state.orphan_order.push_back(hash);
        state.orphans.insert(hash, OrphanBlock { header, meta });
        debug!(hash = %hash, parent = %parent, orphans = state.orphans.len(), "Orphan parked");
    }

    pub fn is_orphan(&self, hash: &Sha256Hash) -> bool {
        self.state.lock().orphans.contains_key(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.state.lock().orphans.len()
    }

    /// Earliest ancestor of `hash` that is itself an orphan; `None` if `hash`
    /// is not an orphan.
    pub fn orphan_root(&self, hash: &Sha256Hash) -> Option<Sha256Hash> {
        let state = self.state.lock();
        let mut cursor = state.orphans.get(hash).map(|_| *hash)?;
        while let Some(orphan) = state.orphans.get(&cursor) {
            let parent = orphan.header.prev_block_hash();
            if !state.orphans.contains_key(&parent) {
                break;
            }
            cursor = parent;
        }
        Some(cursor)
    }

    /// Connect every orphan whose parent is now stored, repeating until no more
    /// can be connected. Returns the hashes stored, in connection order.
    /// Orphans that fail the rules are dropped; a store failure aborts the
    /// drain and leaves the orphan being connected in the pool.
    pub fn drain_orphans(&self) -> Result<Vec<Sha256Hash>> {
        let mut state = self.state.lock();
        let mut connected = Vec::new();

        loop {
            let mut ready = Vec::new();
            for parent in state.waiting.keys() {
                if self.store.get(parent)?.is_some() {
                    ready.push(*parent);
                }
            }
            if ready.is_empty() {
                break;
            }

            for parent in ready {
                let children = state.waiting.get(&parent).cloned().unwrap_or_default();
                for child in children {
                    let Some(orphan) = state.remove_orphan(&child) else {
                        continue;
                    };
                    match self.accept_locked(&mut state, orphan.header.clone(), orphan.meta.clone()) {
                        Ok(AcceptOutcome::Connected { .. }) | Ok(AcceptOutcome::SideBranch(_)) => {
                            connected.push(child);
                        }
                        Ok(_) => {}
                        Err(ConsensusError::BlockStore(e)) => {
                            // Keep it parked so a later drain can retry
                            self.park_orphan(&mut state, child, orphan.header, orphan.meta);
                            return Err(ConsensusError::BlockStore(e));
                        }
                        Err(e) => {
                            warn!(hash = %child, error = %e, "Orphan dropped");
                        }
                    }
                }
            }
        }

        if !connected.is_empty() {
            debug!(connected = connected.len(), remaining = state.orphans.len(), "Orphans drained");
        }
        Ok(connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlockStore;
    use primitive_types::U256;

    fn regtest_chain() -> BlockChain<MemoryBlockStore> {
        let params = NetworkParams::regtest();
        let store = MemoryBlockStore::for_network(&params).unwrap();
        BlockChain::new(store, params).unwrap()
    }

    fn mined(prev: &Sha256Hash, time: u32, params: &NetworkParams) -> Header {
        let mut header = Header::new(1, *prev, Sha256Hash::ZERO, time, params.pow_limit_bits, 0);
        while header.check_proof_of_work(params).is_err() {
            let nonce = header.nonce() + 1;
            header.set_nonce(nonce).unwrap();
        }
        header
    }

    fn extend(chain: &BlockChain<MemoryBlockStore>, prev: &Sha256Hash, count: usize, salt: u32) -> Vec<Header> {
        let params = chain.params().clone();
        let mut prev = *prev;
        let mut headers = Vec::new();
        for i in 0..count {
            let header = mined(&prev, 1_700_000_000 + salt + i as u32 * 600, &params);
            prev = header.hash();
            headers.push(header);
        }
        headers
    }

    #[test]
    fn test_opens_at_genesis() {
        let chain = regtest_chain();
        assert_eq!(chain.best_height(), 0);
        assert_eq!(
            chain.chain_head().hash().to_hex(),
            "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
        );
    }

    #[test]
    fn test_extends_tip() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let headers = extend(&chain, &genesis.hash(), 3, 0);
        for header in headers {
            assert!(chain.accept_header(header).unwrap().is_new_tip());
        }
        let head = chain.chain_head();
        assert_eq!(head.height(), 3);
        assert_eq!(head.chain_work(), U256::from(8));
        assert_eq!(genesis.chain_work(), U256::from(2));
    }

    #[test]
    fn test_rejects_bad_proof_of_work() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let mut header = mined(&genesis.hash(), 1_700_000_000, chain.params());
        while header.check_proof_of_work(chain.params()).is_ok() {
            let nonce = header.nonce() + 1;
            header.set_nonce(nonce).unwrap();
        }
        assert!(matches!(chain.accept_header(header), Err(ConsensusError::Verification(_))));
        assert_eq!(chain.best_height(), 0);
    }

    #[test]
    fn test_rejects_changed_difficulty_on_regtest() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let mut header = Header::new(1, genesis.hash(), Sha256Hash::ZERO, 1_700_000_000, 0x207ffff0, 0);
        while header.check_proof_of_work(chain.params()).is_err() {
            let nonce = header.nonce() + 1;
            header.set_nonce(nonce).unwrap();
        }
        let err = chain.accept_header(header).unwrap_err();
        assert!(matches!(err, ConsensusError::Verification(msg) if msg.contains("NoRetargeting")));
        assert_eq!(chain.store().len(), 1);
    }

    #[test]
    fn test_already_known() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let header = extend(&chain, &genesis.hash(), 1, 0).remove(0);
        chain.accept_header(header.clone()).unwrap();
        assert!(matches!(chain.accept_header(header), Ok(AcceptOutcome::AlreadyKnown(_))));
    }

    #[test]
    fn test_side_branch_annotated_with_best_tip() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let main = extend(&chain, &genesis.hash(), 2, 0);
        for header in main.clone() {
            chain.accept_header(header).unwrap();
        }
        let fork = extend(&chain, &genesis.hash(), 1, 7);
        match chain.accept_header(fork[0].clone()).unwrap() {
            AcceptOutcome::SideBranch(block) => {
                assert_eq!(block.height(), 1);
                assert_eq!(block.chain_info().best_chain_head(), Some(main[1].hash()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(chain.chain_head().hash(), main[1].hash());
    }

    #[test]
    fn test_reorganize_notifies_in_order() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let events = Arc::new(Mutex::new(Vec::<String>::new()));

        let log = Arc::clone(&events);
        chain.add_reorganize_listener(Arc::new(move |split: &LiteBlock, old: &[LiteBlock], new: &[LiteBlock]| {
            log.lock().push(format!("reorg {} {} {}", split.height(), old.len(), new.len()));
        }));
        let log = Arc::clone(&events);
        chain.add_new_best_block_listener(Arc::new(move |block: &LiteBlock| {
            log.lock().push(format!("best {}", block.height()));
        }));

        let main = extend(&chain, &genesis.hash(), 2, 0);
        for header in main {
            chain.accept_header(header).unwrap();
        }
        let fork = extend(&chain, &genesis.hash(), 3, 7);
        let outcomes: Vec<_> = fork.iter().map(|h| chain.accept_header(h.clone()).unwrap()).collect();
        assert!(matches!(outcomes[1], AcceptOutcome::SideBranch(_)));
        assert!(matches!(outcomes[2], AcceptOutcome::Connected { reorganized: true, .. }));

        assert_eq!(
            *events.lock(),
            vec!["best 1", "best 2", "reorg 0 2 3", "best 3"]
        );
        assert_eq!(chain.chain_head().hash(), fork[2].hash());
    }

    #[test]
    fn test_deferred_executor_receives_jobs() {
        struct Queue(Mutex<Vec<Job>>);
        impl Executor for Queue {
            fn execute(&self, job: Job) {
                self.0.lock().push(job);
            }
        }

        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let queue = Arc::new(Queue(Mutex::new(Vec::new())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        chain.add_new_best_block_listener_with(
            queue.clone(),
            Arc::new(move |block: &LiteBlock| log.lock().push(block.height())),
        );

        for header in extend(&chain, &genesis.hash(), 2, 0) {
            chain.accept_header(header).unwrap();
        }
        assert!(seen.lock().is_empty());
        let jobs: Vec<Job> = std::mem::take(&mut *queue.0.lock());
        for job in jobs {
            job();
        }
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_rollback_and_replay() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let headers = extend(&chain, &genesis.hash(), 5, 0);
        for header in headers.clone() {
            chain.accept_header(header).unwrap();
        }
        let before = chain.chain_head().hash();

        let rolled = chain.rollback(2).unwrap();
        assert_eq!(rolled.height(), 2);
        assert_eq!(chain.store().get_chain_head().unwrap().hash(), headers[1].hash());

        for header in headers.into_iter().skip(2) {
            assert!(chain.accept_header(header).unwrap().is_new_tip());
        }
        assert_eq!(chain.chain_head().hash(), before);
    }

    #[test]
    fn test_rollback_out_of_range() {
        let chain = regtest_chain();
        assert!(matches!(chain.rollback(-1), Err(ConsensusError::IllegalState(_))));
        assert!(matches!(chain.rollback(1), Err(ConsensusError::IllegalState(_))));
        assert_eq!(chain.rollback(0).unwrap().height(), 0);
    }

    #[test]
    fn test_orphans_drain_in_order() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let headers = extend(&chain, &genesis.hash(), 4, 0);

        for header in headers[1..].iter().rev() {
            let outcome = chain.accept_header(header.clone()).unwrap();
            assert!(matches!(outcome, AcceptOutcome::Orphan { .. }));
        }
        assert_eq!(chain.orphan_count(), 3);
        assert!(chain.is_orphan(&headers[3].hash()));
        assert_eq!(chain.orphan_root(&headers[3].hash()), Some(headers[1].hash()));
        assert!(chain.drain_orphans().unwrap().is_empty());

        chain.accept_header(headers[0].clone()).unwrap();
        let drained = chain.drain_orphans().unwrap();
        assert_eq!(drained, vec![headers[1].hash(), headers[2].hash(), headers[3].hash()]);
        assert_eq!(chain.orphan_count(), 0);
        assert_eq!(chain.best_height(), 4);
    }

    #[test]
    fn test_orphan_eviction() {
        let params = NetworkParams::regtest();
        let store = MemoryBlockStore::for_network(&params).unwrap();
        let config = ChainConfig { max_orphan_blocks: 2, ..ChainConfig::default() };
        let chain = BlockChain::with_config(store, params, config).unwrap();

        let unknown = Sha256Hash::twice_of(b"unknown parent");
        let orphans = extend(&chain, &unknown, 3, 0);
        for header in &orphans {
            chain.accept_header(header.clone()).unwrap();
        }
        assert_eq!(chain.orphan_count(), 2);
        assert!(!chain.is_orphan(&orphans[0].hash()));
        assert!(chain.is_orphan(&orphans[2].hash()));
        assert_eq!(chain.orphan_root(&orphans[2].hash()), Some(orphans[1].hash()));
    }

    #[test]
    fn test_closed_store_aborts_acceptance() {
        let chain = regtest_chain();
        let genesis = chain.chain_head();
        let header = extend(&chain, &genesis.hash(), 1, 0).remove(0);
        chain.store().close().unwrap();
        assert!(matches!(chain.accept_header(header), Err(ConsensusError::BlockStore(_))));
        assert_eq!(chain.best_height(), 0);
    }

    /// Memory store whose writes can be switched off.
    struct FailingPutStore {
        inner: MemoryBlockStore,
        fail_puts: std::sync::atomic::AtomicBool,
    }

    impl FailingPutStore {
        fn set_failing(&self, failing: bool) {
            self.fail_puts.store(failing, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl BlockStore for FailingPutStore {
        fn get(&self, hash: &Sha256Hash) -> Result<Option<LiteBlock>> {
            self.inner.get(hash)
        }

        fn put(&self, block: &LiteBlock) -> Result<()> {
            if self.fail_puts.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ConsensusError::BlockStore("disk full".to_string()));
            }
            self.inner.put(block)
        }

        fn get_chain_head(&self) -> Result<LiteBlock> {
            self.inner.get_chain_head()
        }

        fn set_chain_head(&self, block: &LiteBlock) -> Result<()> {
            self.inner.set_chain_head(block)
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_store_failure_keeps_orphan_for_retry() {
        let params = NetworkParams::regtest();
        let store = FailingPutStore {
            inner: MemoryBlockStore::for_network(&params).unwrap(),
            fail_puts: std::sync::atomic::AtomicBool::new(false),
        };
        let chain = BlockChain::new(store, params.clone()).unwrap();
        let genesis = chain.chain_head();
        let parent = mined(&genesis.hash(), 1_700_000_000, &params);
        let child = mined(&parent.hash(), 1_700_000_600, &params);

        assert!(matches!(chain.accept_header(child.clone()).unwrap(), AcceptOutcome::Orphan { .. }));
        chain.accept_header(parent).unwrap();

        chain.store().set_failing(true);
        assert!(matches!(chain.drain_orphans(), Err(ConsensusError::BlockStore(_))));
        assert!(chain.is_orphan(&child.hash()));
        assert_eq!(chain.orphan_count(), 1);
        assert_eq!(chain.best_height(), 1);

        chain.store().set_failing(false);
        assert_eq!(chain.drain_orphans().unwrap(), vec![child.hash()]);
        assert_eq!(chain.orphan_count(), 0);
        assert_eq!(chain.best_height(), 2);
    }
}
