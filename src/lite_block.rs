//! LiteBlock: a header with its block summary and chain position, the unit the
//! block store persists.

use crate::constants::{BLOCK_META_SIZE, CHAIN_INFO_SIZE, CHAIN_WORK_BYTES, LITE_BLOCK_SIZE};
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::header::Header;
use crate::object::{BitcoinObject, Hashable, ObjectState};
use crate::wire::{ByteReader, ByteWriter};
use primitive_types::U256;

/// Summary of a block body: transaction count and serialized size.
/// Both are -1 when only the header is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    state: ObjectState,
    tx_count: i32,
    block_size: i64,
}

impl Default for BlockMeta {
    fn default() -> Self {
        BlockMeta::unknown()
    }
}

impl BlockMeta {
    pub fn new(tx_count: i32, block_size: i64) -> Self {
        BlockMeta { state: ObjectState::default(), tx_count, block_size }
    }

    pub fn unknown() -> Self {
        BlockMeta::new(-1, -1)
    }

    pub fn tx_count(&self) -> i32 {
        self.tx_count
    }

    pub fn block_size(&self) -> i64 {
        self.block_size
    }

    pub fn set_tx_count(&mut self, tx_count: i32) -> Result<()> {
        self.begin_mutation("block meta tx count")?;
        self.tx_count = tx_count;
        Ok(())
    }

    pub fn set_block_size(&mut self, block_size: i64) -> Result<()> {
        self.begin_mutation("block meta size")?;
        self.block_size = block_size;
        Ok(())
    }
}

impl BitcoinObject for BlockMeta {
    const FIXED_LENGTH: Option<usize> = Some(BLOCK_META_SIZE);

    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        Ok(BlockMeta {
            state: ObjectState::default(),
            tx_count: reader.read_i32("block meta tx count")?,
            block_size: reader.read_i64("block meta size")?,
        })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        writer.write_i32(self.tx_count);
        writer.write_i64(self.block_size);
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}

/// Position of a block in the chain.
///
/// Chain work travels as a 12-byte big-endian integer. The best-chain tip seen
/// when a side-branch block was accepted is an annotation only and is never
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    state: ObjectState,
    chain_work: U256,
    height: i32,
    total_chain_txs: i64,
    best_chain_head: Option<Sha256Hash>,
}

impl Default for ChainInfo {
    fn default() -> Self {
        ChainInfo::new(U256::zero(), 0, -1)
    }
}

impl ChainInfo {
    pub fn new(chain_work: U256, height: i32, total_chain_txs: i64) -> Self {
        ChainInfo {
            state: ObjectState::default(),
            chain_work,
            height,
            total_chain_txs,
            best_chain_head: None,
        }
    }

    pub fn chain_work(&self) -> U256 {
        self.chain_work
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Transactions from genesis up to and including this block; -1 if unknown.
    pub fn total_chain_txs(&self) -> i64 {
        self.total_chain_txs
    }

    pub fn best_chain_head(&self) -> Option<Sha256Hash> {
        self.best_chain_head
    }

    /// Fails when the chain work needs more bits than the record holds.
    pub fn check_chain_work_fits(&self) -> Result<()> {
        check_chain_work(self.chain_work)
    }

    pub fn set_chain_work(&mut self, chain_work: U256) -> Result<()> {
        check_chain_work(chain_work)?;
        self.begin_mutation("chain work")?;
        self.chain_work = chain_work;
        Ok(())
    }

    pub fn set_height(&mut self, height: i32) -> Result<()> {
        self.begin_mutation("chain height")?;
        self.height = height;
        Ok(())
    }

    pub fn set_total_chain_txs(&mut self, total: i64) -> Result<()> {
        self.begin_mutation("total chain txs")?;
        self.total_chain_txs = total;
        Ok(())
    }

    pub fn set_best_chain_head(&mut self, head: Option<Sha256Hash>) {
        self.best_chain_head = head;
    }
}

fn check_chain_work(chain_work: U256) -> Result<()> {
    if chain_work.bits() > CHAIN_WORK_BYTES * 8 {
        return Err(ConsensusError::IllegalState(format!(
            "Ran out of space to store chain work: {}",
            chain_work
        )));
    }
    Ok(())
}

impl BitcoinObject for ChainInfo {
    const FIXED_LENGTH: Option<usize> = Some(CHAIN_INFO_SIZE);

    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        let work: [u8; CHAIN_WORK_BYTES] = reader.read_array("chain work")?;
        Ok(ChainInfo {
            state: ObjectState::default(),
            chain_work: U256::from_big_endian(&work),
            height: reader.read_i32("chain height")?,
            total_chain_txs: reader.read_i64("total chain txs")?,
            best_chain_head: None,
        })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        let mut full = [0u8; 32];
        self.chain_work.to_big_endian(&mut full);
        writer.write_bytes(&full[32 - CHAIN_WORK_BYTES..]);
        writer.write_i32(self.height);
        writer.write_i64(self.total_chain_txs);
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}

/// Header + BlockMeta + ChainInfo, 120 bytes on disk. Identified by the header hash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiteBlock {
    state: ObjectState,
    header: Header,
    meta: BlockMeta,
    chain_info: ChainInfo,
}

impl LiteBlock {
    pub fn new(header: Header, meta: BlockMeta, chain_info: ChainInfo) -> Self {
        LiteBlock { state: ObjectState::default(), header, meta, chain_info }
    }

    pub fn hash(&self) -> Sha256Hash {
        self.header.hash()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn chain_info(&self) -> &ChainInfo {
        &self.chain_info
    }

    pub fn height(&self) -> i32 {
        self.chain_info.height
    }

    pub fn chain_work(&self) -> U256 {
        self.chain_info.chain_work
    }

    pub fn prev_block_hash(&self) -> Sha256Hash {
        self.header.prev_block_hash()
    }

    pub fn time(&self) -> u32 {
        self.header.time()
    }

    pub fn bits(&self) -> u32 {
        self.header.bits()
    }

    pub fn header_mut(&mut self) -> Result<&mut Header> {
        self.begin_mutation("lite block header")?;
        Ok(&mut self.header)
    }

    pub fn meta_mut(&mut self) -> Result<&mut BlockMeta> {
        self.begin_mutation("lite block meta")?;
        Ok(&mut self.meta)
    }

    pub fn chain_info_mut(&mut self) -> Result<&mut ChainInfo> {
        self.begin_mutation("lite block chain info")?;
        Ok(&mut self.chain_info)
    }

    /// BuildNextInChain: LiteBlock × Header × BlockMeta → LiteBlock
    ///
    /// 1. height = parent height + 1
    /// 2. chain work = parent chain work + work(header)
    /// 3. total chain txs = parent total + tx count, or -1 if either is unknown
    pub fn build_next_in_chain(&self, header: Header, meta: BlockMeta) -> LiteBlock {
        let chain_work = self.chain_work().saturating_add(header.work());
        let total = if self.chain_info.total_chain_txs < 0 || meta.tx_count < 0 {
            -1
        } else {
            self.chain_info.total_chain_txs + meta.tx_count as i64
        };
        let chain_info = ChainInfo::new(chain_work, self.height() + 1, total);
        LiteBlock::new(header, meta, chain_info)
    }
}

impl BitcoinObject for LiteBlock {
    const FIXED_LENGTH: Option<usize> = Some(LITE_BLOCK_SIZE);

    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        Ok(LiteBlock {
            state: ObjectState::default(),
            header: Header::parse_child(reader)?,
            meta: BlockMeta::parse_child(reader)?,
            chain_info: ChainInfo::parse_child(reader)?,
        })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        self.header.serialize_to(writer);
        self.meta.serialize_to(writer);
        self.chain_info.serialize_to(writer);
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}
