//! Network parameters and chain manager configuration

use crate::constants::{COIN, DEFAULT_MAX_ORPHAN_BLOCKS};
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::header::Header;
use crate::block::FullBlock;
use crate::lite_block::{BlockMeta, ChainInfo, LiteBlock};
use crate::object::BitcoinObject;
use crate::pow::decode_compact;
use crate::transaction::{Tx, TxInput, TxOutput};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Coinbase script of the genesis transaction: difficulty push, then the
/// Times headline of 3 January 2009.
const GENESIS_COINBASE_SCRIPT: &str = "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73";

/// Pay-to-pubkey output script of the genesis transaction.
const GENESIS_OUTPUT_SCRIPT: &str = "4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac";

/// Header fields of a network's genesis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisParams {
    pub version: u32,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Every network constant the difficulty rules and the chain manager read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub id: String,
    /// Easiest allowed target, compact form.
    pub pow_limit_bits: u32,
    /// Seconds between blocks.
    pub target_spacing: i64,
    /// Seconds per legacy retarget window.
    pub target_timespan: i64,
    pub daa_activation_height: i32,
    /// Testnet relaxation: a block more than two spacings late may use the pow limit.
    pub allow_min_difficulty_blocks: bool,
    /// Regtest: the target never changes.
    pub no_retargeting: bool,
    pub genesis: GenesisParams,
}

impl NetworkParams {
    pub fn mainnet() -> Self {
        NetworkParams {
            id: "main".to_string(),
            pow_limit_bits: 0x1d00ffff,
            target_spacing: 10 * 60,
            target_timespan: 14 * 24 * 60 * 60,
            daa_activation_height: 504_031,
            allow_min_difficulty_blocks: false,
            no_retargeting: false,
            genesis: GenesisParams { version: 1, time: 1_231_006_505, bits: 0x1d00ffff, nonce: 2_083_236_893 },
        }
    }

    pub fn testnet() -> Self {
        NetworkParams {
            id: "test".to_string(),
            pow_limit_bits: 0x1d00ffff,
            target_spacing: 10 * 60,
            target_timespan: 14 * 24 * 60 * 60,
            daa_activation_height: 1_188_697,
            allow_min_difficulty_blocks: true,
            no_retargeting: false,
            genesis: GenesisParams { version: 1, time: 1_296_688_602, bits: 0x1d00ffff, nonce: 414_098_458 },
        }
    }

    pub fn regtest() -> Self {
        NetworkParams {
            id: "regtest".to_string(),
            pow_limit_bits: 0x207fffff,
            target_spacing: 10 * 60,
            target_timespan: 14 * 24 * 60 * 60,
            daa_activation_height: 0,
            allow_min_difficulty_blocks: true,
            no_retargeting: true,
            genesis: GenesisParams { version: 1, time: 1_296_688_602, bits: 0x207fffff, nonce: 2 },
        }
    }

    /// Load a custom network, rejecting parameters the rules cannot work with.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: NetworkParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_spacing <= 0 || self.target_timespan < self.target_spacing {
            return Err(ConsensusError::Protocol(format!(
                "Network {}: spacing {}s and timespan {}s are inconsistent",
                self.id, self.target_spacing, self.target_timespan
            )));
        }
        if !decode_compact(self.pow_limit_bits).is_valid() {
            return Err(ConsensusError::Protocol(format!(
                "Network {}: pow limit {:#010x} is not a valid target",
                self.id, self.pow_limit_bits
            )));
        }
        Ok(())
    }

    /// Easiest allowed target.
    pub fn pow_limit(&self) -> U256 {
        decode_compact(self.pow_limit_bits).target
    }

    /// Blocks per legacy retarget window (2016 with the default timings).
    pub fn difficulty_adjustment_interval(&self) -> i64 {
        self.target_timespan / self.target_spacing
    }

    pub fn genesis_header(&self) -> Header {
        // The merkle root is filled in by the owning block
        Header::new(
            self.genesis.version,
            Sha256Hash::ZERO,
            Sha256Hash::ZERO,
            self.genesis.time,
            self.genesis.bits,
            self.genesis.nonce,
        )
    }

    pub fn genesis_block(&self) -> Result<FullBlock> {
        Ok(FullBlock::new(self.genesis_header(), vec![genesis_coinbase()?]))
    }

    /// Genesis as the chain stores it: height 0, its own work, one transaction.
    pub fn genesis_lite_block(&self) -> Result<LiteBlock> {
        let block = self.genesis_block()?;
        let header = block.header().clone();
        let meta = BlockMeta::new(1, block.length() as i64);
        let work = header.work();
        Ok(LiteBlock::new(header, meta, ChainInfo::new(work, 0, 1)))
    }
}

/// The coinbase shared by every network's genesis block.
pub fn genesis_coinbase() -> Result<Tx> {
    let decode = |text: &str| {
        hex::decode(text).map_err(|e| ConsensusError::Protocol(format!("Invalid genesis script: {}", e)))
    };
    let input = TxInput::coinbase(decode(GENESIS_COINBASE_SCRIPT)?);
    let output = TxOutput::new(50 * COIN, decode(GENESIS_OUTPUT_SCRIPT)?);
    Ok(Tx::from_parts(1, vec![input], vec![output], 0))
}

/// Chain manager tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Orphans kept before the oldest is evicted.
    pub max_orphan_blocks: usize,
    /// Check each header against its own target before accepting it.
    pub check_proof_of_work: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig { max_orphan_blocks: DEFAULT_MAX_ORPHAN_BLOCKS, check_proof_of_work: true }
    }
}

impl ChainConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
