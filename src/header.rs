//! Block header: the fixed 80-byte structure every block is identified by

use crate::constants::HEADER_SIZE;
use crate::error::Result;
use crate::hash::Sha256Hash;
use crate::object::{BitcoinObject, HashCache, Hashable, ObjectState};
use crate::params::NetworkParams;
use crate::pow;
use crate::wire::{ByteReader, ByteWriter};
use primitive_types::U256;

/// Block header.
///
/// Wire layout: version(4) · prev hash(32) · merkle root(32) · time(4) · bits(4) · nonce(4).
/// A header built outside a block has an all-zero merkle root until it is
/// given one; a [`crate::block::FullBlock`] fills a zero root in from its
/// transactions and keeps it in sync across edits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    state: ObjectState,
    hash: HashCache,
    version: u32,
    prev_block_hash: Sha256Hash,
    merkle_root: Sha256Hash,
    time: u32,
    bits: u32,
    nonce: u32,
}

impl Header {
    pub fn new(
        version: u32,
        prev_block_hash: Sha256Hash,
        merkle_root: Sha256Hash,
        time: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Header {
            state: ObjectState::default(),
            hash: HashCache::default(),
            version,
            prev_block_hash,
            merkle_root,
            time,
            bits,
            nonce,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn prev_block_hash(&self) -> Sha256Hash {
        self.prev_block_hash
    }

    pub fn merkle_root(&self) -> Sha256Hash {
        self.merkle_root
    }

    /// Seconds since the epoch, as claimed by the miner.
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Compact difficulty target.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn set_version(&mut self, version: u32) -> Result<()> {
        self.begin_mutation("header version")?;
        self.version = version;
        Ok(())
    }

    pub fn set_prev_block_hash(&mut self, hash: Sha256Hash) -> Result<()> {
        self.begin_mutation("header prev block hash")?;
        self.prev_block_hash = hash;
        Ok(())
    }

    pub fn set_merkle_root(&mut self, root: Sha256Hash) -> Result<()> {
        self.begin_mutation("header merkle root")?;
        self.merkle_root = root;
        Ok(())
    }

    pub fn set_time(&mut self, time: u32) -> Result<()> {
        self.begin_mutation("header time")?;
        self.time = time;
        Ok(())
    }

    pub fn set_bits(&mut self, bits: u32) -> Result<()> {
        self.begin_mutation("header bits")?;
        self.bits = bits;
        Ok(())
    }

    pub fn set_nonce(&mut self, nonce: u32) -> Result<()> {
        self.begin_mutation("header nonce")?;
        self.nonce = nonce;
        Ok(())
    }

    /// The merkle root is derived state of the owning block; the block keeps it
    /// in sync whatever the header's own mutability.
    pub(crate) fn replace_merkle_root(&mut self, root: Sha256Hash) {
        if self.merkle_root != root {
            self.invalidate();
            self.merkle_root = root;
        }
    }

    /// Decoded target; zero when the compact form is negative or overflows.
    pub fn target(&self) -> U256 {
        pow::target_from_bits(self.bits).unwrap_or_else(|_| U256::zero())
    }

    /// Expected number of hashes needed to find this header.
    pub fn work(&self) -> U256 {
        pow::work_from_bits(self.bits)
    }

    pub fn check_proof_of_work(&self, params: &NetworkParams) -> Result<()> {
        pow::check_proof_of_work(&self.hash(), self.bits, params)
    }
}

impl BitcoinObject for Header {
    const FIXED_LENGTH: Option<usize> = Some(HEADER_SIZE);

    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        Ok(Header {
            state: ObjectState::default(),
            hash: HashCache::default(),
            version: reader.read_u32("header version")?,
            prev_block_hash: reader.read_hash("header prev block hash")?,
            merkle_root: reader.read_hash("header merkle root")?,
            time: reader.read_u32("header time")?,
            bits: reader.read_u32("header bits")?,
            nonce: reader.read_u32("header nonce")?,
        })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.version);
        writer.write_hash(&self.prev_block_hash);
        writer.write_hash(&self.merkle_root);
        writer.write_u32(self.time);
        writer.write_u32(self.bits);
        writer.write_u32(self.nonce);
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }

    fn invalidate(&mut self) {
        self.state.invalidate();
        self.hash.clear();
    }
}

impl Hashable for Header {
    fn hash_cache(&self) -> &HashCache {
        &self.hash
    }
}
