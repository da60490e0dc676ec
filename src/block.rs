//! Full blocks: a header plus its ordered transactions

use crate::constants::{HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::header::Header;
use crate::lite_block::{BlockMeta, ChainInfo, LiteBlock};
use crate::merkle::{merkle_root, BitcoinCombiner, BitcoinMerkleTree, MerkleTree};
use crate::object::{BitcoinObject, Hashable, ObjectState};
use crate::params::NetworkParams;
use crate::transaction::Tx;
use crate::wire::{var_int_size, ByteReader, ByteWriter};

/// Header + transactions. The header's merkle root follows the transaction
/// list through every mutation made via the block.
#[derive(Debug, Clone, Default)]
pub struct FullBlock {
    state: ObjectState,
    header: Header,
    txs: Vec<Tx>,
    merkle: Option<BitcoinMerkleTree>,
}

impl PartialEq for FullBlock {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.txs == other.txs
    }
}

impl Eq for FullBlock {}

impl FullBlock {
    /// Assemble a block. A zero merkle root in `header` is filled in from the
    /// transactions; any other root is kept as given, and [`FullBlock::verify`]
    /// rejects it if it does not match.
    pub fn new(header: Header, txs: Vec<Tx>) -> Self {
        let mut block = FullBlock { state: ObjectState::default(), header, txs, merkle: None };
        if block.header.merkle_root() == Sha256Hash::ZERO {
            block.sync_merkle_root();
        }
        block
    }

    pub fn hash(&self) -> Sha256Hash {
        self.header.hash()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn transactions(&self) -> &[Tx] {
        &self.txs
    }

    pub fn header_mut(&mut self) -> Result<&mut Header> {
        self.begin_mutation("block header")?;
        Ok(&mut self.header)
    }

    pub fn add_transaction(&mut self, tx: Tx) -> Result<()> {
        self.begin_mutation("block transactions")?;
        let txid = tx.hash();
        self.tree().add_node(txid);
        self.txs.push(tx);
        self.sync_merkle_root();
        Ok(())
    }

    /// Replace (or insert into an empty block) the coinbase. Only the left
    /// spine of the merkle tree is recomputed.
    pub fn set_coinbase(&mut self, tx: Tx) -> Result<()> {
        if self.txs.is_empty() {
            return self.add_transaction(tx);
        }
        self.begin_mutation("block coinbase")?;
        let txid = tx.hash();
        self.txs[0] = tx;
        self.tree().set_first_node(txid)?;
        self.sync_merkle_root();
        Ok(())
    }

    /// Edit transaction `index` in place, keeping the merkle root in sync even
    /// if `edit` fails part way.
    pub fn modify_transaction<R>(
        &mut self,
        index: usize,
        edit: impl FnOnce(&mut Tx) -> Result<R>,
    ) -> Result<R> {
        self.begin_mutation("block transactions")?;
        let count = self.txs.len();
        let tx = self.txs.get_mut(index).ok_or_else(|| {
            ConsensusError::IllegalState(format!("Transaction {} out of range ({} txs)", index, count))
        })?;
        let result = edit(tx);
        let txid = tx.hash();
        self.tree().set_node(index, txid)?;
        self.sync_merkle_root();
        result
    }

    /// Merkle root of the current transactions, rebuilt from scratch.
    pub fn compute_merkle_root(&self) -> Sha256Hash {
        let txids: Vec<Sha256Hash> = self.txs.iter().map(|tx| tx.hash()).collect();
        merkle_root(&txids).unwrap_or(Sha256Hash::ZERO)
    }

    /// Authentication path proving transaction `index` is committed to by the header.
    pub fn merkle_branch(&mut self, index: usize) -> Result<Vec<Sha256Hash>> {
        self.tree().branch(index)
    }

    fn tree(&mut self) -> &mut BitcoinMerkleTree {
        let txs = &self.txs;
        self.merkle
            .get_or_insert_with(|| MerkleTree::with_leaves(BitcoinCombiner, txs.iter().map(|tx| tx.hash())))
    }

    fn sync_merkle_root(&mut self) {
        let root = self.tree().root().unwrap_or(Sha256Hash::ZERO);
        self.header.replace_merkle_root(root);
    }

    /// CheckBlock: ℬ × Params → {valid, invalid}
    ///
    /// A block is valid if and only if:
    /// 1. its header meets its own proof of work target
    /// 2. it has at least one transaction
    /// 3. the header's merkle root commits to exactly these transactions
    /// 4. the first transaction, and only the first, is a coinbase
    /// 5. every transaction passes the structural checks
    /// 6. its serialized size is at most MAX_BLOCK_SIZE
    pub fn verify(&self, params: &NetworkParams) -> Result<()> {
        // 1. Proof of work
        self.header.check_proof_of_work(params)?;

        // 2. Non-empty
        if self.txs.is_empty() {
            return Err(ConsensusError::Verification(format!(
                "Block {} has no transactions",
                self.hash()
            )));
        }

        // 3. Merkle root
        let computed = self.compute_merkle_root();
        if computed != self.header.merkle_root() {
            return Err(ConsensusError::Verification(format!(
                "Merkle root mismatch: header has {}, transactions give {}",
                self.header.merkle_root(),
                computed
            )));
        }

        // 4. Coinbase placement
        if !self.txs[0].is_coinbase() {
            return Err(ConsensusError::Verification(
                "First transaction is not a coinbase".to_string(),
            ));
        }
        if let Some(position) = self.txs.iter().skip(1).position(|tx| tx.is_coinbase()) {
            return Err(ConsensusError::Verification(format!(
                "Unexpected coinbase at index {}",
                position + 1
            )));
        }

        // 5. Transactions
        for tx in &self.txs {
            tx.verify()?;
        }

        // 6. Size
        let size = self.length();
        if size > MAX_BLOCK_SIZE {
            return Err(ConsensusError::Verification(format!(
                "Block too large: {} bytes",
                size
            )));
        }
        Ok(())
    }

    /// Header and body summary; chain position is left for the chain to fill in.
    pub fn to_lite_block(&self) -> LiteBlock {
        let meta = BlockMeta::new(self.txs.len() as i32, self.length() as i64);
        LiteBlock::new(self.header.clone(), meta, ChainInfo::default())
    }
}

impl BitcoinObject for FullBlock {
    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        let header = Header::parse_child(reader)?;
        let count = reader.read_length("block tx count")?;
        let mut txs = Vec::with_capacity(count.min(reader.remaining() / 60));
        for _ in 0..count {
            txs.push(Tx::parse_child(reader)?);
        }
        Ok(FullBlock { state: ObjectState::default(), header, txs, merkle: None })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        self.header.serialize_to(writer);
        writer.write_var_int(self.txs.len() as u64);
        for tx in &self.txs {
            tx.serialize_to(writer);
        }
    }

    fn estimated_length(&self) -> usize {
        HEADER_SIZE
            + var_int_size(self.txs.len() as u64)
            + self.txs.iter().map(|tx| tx.estimated_length()).sum::<usize>()
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}
