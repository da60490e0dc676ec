//! Wire sizes, sentinels and consensus limits

/// Length marker for an object whose serialized size is not yet known
pub const UNKNOWN_LENGTH: usize = usize::MAX;

/// Hard cap on any claimed variable-length field or collection: 1 GiB
pub const MAX_VAR_LENGTH: u64 = 1 << 30;

/// Serialized header: version(4) prev(32) merkle(32) time(4) bits(4) nonce(4)
pub const HEADER_SIZE: usize = 80;

/// Serialized outpoint: hash(32) index(4)
pub const OUTPOINT_SIZE: usize = 36;

/// Serialized block metadata: tx count(4) block size(8)
pub const BLOCK_META_SIZE: usize = 12;

/// Serialized chain info: chain work(12) height(4) total chain txs(8)
pub const CHAIN_INFO_SIZE: usize = 24;

/// Bytes of the big-endian chain work accumulator on the wire
pub const CHAIN_WORK_BYTES: usize = 12;

/// On-disk LiteBlock record
pub const LITE_BLOCK_SIZE: usize = HEADER_SIZE + BLOCK_META_SIZE + CHAIN_INFO_SIZE;

/// Sequence number marking a final input
pub const NO_SEQUENCE: u32 = 0xffff_ffff;

/// Outpoint index used by coinbase inputs
pub const UNCONNECTED: u32 = 0xffff_ffff;

/// Satoshis per coin
pub const COIN: i64 = 100_000_000;

/// Maximum money supply: 21,000,000 coins in satoshis
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Maximum serialized transaction size
pub const MAX_TX_SIZE: usize = 1_000_000;

/// Maximum serialized block size
pub const MAX_BLOCK_SIZE: usize = 32_000_000;

/// Coinbase script length bounds (inclusive)
pub const MIN_COINBASE_SCRIPT_LEN: usize = 2;
pub const MAX_COINBASE_SCRIPT_LEN: usize = 100;

/// Number of blocks in the median-time-past window
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Window of the cumulative-work difficulty algorithm
pub const DAA_WINDOW: i32 = 144;

/// Emergency adjustment trigger: 6 blocks taking 12 hours or more
pub const EDA_BLOCKS: i32 = 6;
pub const EDA_TRIGGER_SECONDS: i64 = 12 * 3600;

/// Default number of orphans kept before the oldest is evicted
pub const DEFAULT_MAX_ORPHAN_BLOCKS: usize = 750;
