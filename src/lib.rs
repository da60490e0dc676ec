//! # Consensus-Core
//!
//! Bitcoin consensus objects and header-chain selection.
//!
//! ## Layers
//!
//! - Object model: lazily serialized wire objects with cached hashes and
//!   explicit mutability ([`object`])
//! - Protocol structures: headers, transactions, full and lite blocks
//! - Incremental Merkle engine with dirty-region tracking ([`merkle`])
//! - Difficulty rules: new DAA, legacy retargeting, EDA, testnet relaxations
//!   ([`difficulty`])
//! - Chain manager: best chain by cumulative work, orphans, reorganization and
//!   rollback over a pluggable [`BlockStore`]
//!
//! ## Usage
//!
//! ```rust
//! use consensus_core::{BlockChain, Header, MemoryBlockStore, NetworkParams, Sha256Hash};
//!
//! let params = NetworkParams::regtest();
//! let store = MemoryBlockStore::for_network(&params)?;
//! let chain = BlockChain::new(store, params.clone())?;
//!
//! let genesis = chain.chain_head();
//! let mut header = Header::new(
//!     1,
//!     genesis.hash(),
//!     Sha256Hash::ZERO,
//!     genesis.time() + 600,
//!     params.pow_limit_bits,
//!     0,
//! );
//! while header.check_proof_of_work(&params).is_err() {
//!     let nonce = header.nonce() + 1;
//!     header.set_nonce(nonce)?;
//! }
//!
//! assert!(chain.accept_header(header)?.is_new_tip());
//! assert_eq!(chain.best_height(), 1);
//! # Ok::<(), consensus_core::ConsensusError>(())
//! ```

pub mod block;
pub mod chain;
pub mod constants;
pub mod difficulty;
pub mod error;
pub mod hash;
pub mod header;
pub mod lite_block;
pub mod merkle;
pub mod object;
pub mod params;
pub mod pow;
pub mod store;
pub mod transaction;
pub mod wire;

// Re-export commonly used types
pub use block::FullBlock;
pub use chain::{
    AcceptOutcome, BlockChain, Executor, NewBestBlockListener, ReorganizeListener, SameThreadExecutor,
};
pub use constants::*;
pub use difficulty::{RuleVariant, RulesPool};
pub use error::{ConsensusError, Result};
pub use hash::Sha256Hash;
pub use header::Header;
pub use lite_block::{BlockMeta, ChainInfo, LiteBlock};
pub use merkle::{BitcoinMerkleTree, MerkleTree, NodeCombiner};
pub use object::{BitcoinObject, Hashable};
pub use params::{ChainConfig, NetworkParams};
pub use store::{BlockStore, MemoryBlockStore};
pub use transaction::{Tx, TxInput, TxOutPoint, TxOutput};
