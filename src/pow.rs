//! Proof of work: compact target codec, block work, hash-versus-target check

use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::params::NetworkParams;
use primitive_types::U256;

const COMPACT_SIGN_BIT: u32 = 0x0080_0000;
const COMPACT_MANTISSA: u32 = 0x007f_ffff;

/// A compact target decoded to a full 256-bit value, with the two flags the
/// encoding can carry besides the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compact {
    pub target: U256,
    pub negative: bool,
    pub overflow: bool,
}

impl Compact {
    /// Usable as a difficulty target: positive, in range and non-zero.
    pub fn is_valid(&self) -> bool {
        !self.negative && !self.overflow && !self.target.is_zero()
    }
}

/// DecodeCompact: ℕ32 → (U256, negative, overflow)
///
/// Layout: size byte · sign bit · 23-bit mantissa.
/// 1. If size ≤ 3: target = mantissa >> 8 × (3 - size)
/// 2. Otherwise: target = mantissa << 8 × (size - 3)
/// 3. negative = mantissa ≠ 0 ∧ sign bit set
/// 4. overflow = mantissa ≠ 0 ∧ the shifted mantissa does not fit 256 bits
pub fn decode_compact(bits: u32) -> Compact {
    let size = bits >> 24;
    let mut word = bits & COMPACT_MANTISSA;
    if size <= 3 {
        word >>= 8 * (3 - size);
    }

    let negative = word != 0 && (bits & COMPACT_SIGN_BIT) != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

    let target = if size <= 3 {
        U256::from(word)
    } else if overflow {
        U256::zero()
    } else {
        U256::from(word) << (8 * (size - 3) as usize)
    };

    Compact { target, negative, overflow }
}

/// EncodeCompact: U256 → ℕ32
///
/// 1. size = number of significant bytes
/// 2. mantissa = the top three of them
/// 3. If the mantissa's top bit is set, shift it down a byte and grow size, so
///    the result never reads back as negative
pub fn encode_compact(value: U256) -> u32 {
    let mut size = (value.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (value.low_u64() << (8 * (3 - size))) as u32
    } else {
        (value >> (8 * (size - 3))).low_u64() as u32
    };

    if compact & COMPACT_SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | ((size as u32) << 24)
}

/// Target of a compact value, rejecting negative and overflowing encodings.
pub fn target_from_bits(bits: u32) -> Result<U256> {
    let compact = decode_compact(bits);
    if compact.negative {
        return Err(ConsensusError::Verification(format!(
            "Difficulty bits {:#010x} encode a negative target",
            bits
        )));
    }
    if compact.overflow {
        return Err(ConsensusError::Verification(format!(
            "Difficulty bits {:#010x} overflow 256 bits",
            bits
        )));
    }
    Ok(compact.target)
}

/// BlockWork: ℕ32 → U256
///
/// Expected number of hashes to meet the target: 2^256 / (target + 1).
/// Computed as (¬target / (target + 1)) + 1 since 2^256 does not fit.
/// Zero for negative, overflowing or zero targets.
pub fn work_from_bits(bits: u32) -> U256 {
    let compact = decode_compact(bits);
    if !compact.is_valid() {
        return U256::zero();
    }
    work_from_target(compact.target)
}

fn work_from_target(target: U256) -> U256 {
    (!target / (target + U256::one())) + U256::one()
}

/// Fixed-width hex of a 256-bit value, for diagnostics.
pub fn target_hex(value: &U256) -> String {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    hex::encode(buf)
}

/// CheckProofOfWork: Sha256Hash × ℕ32 × Params → {ok, error}
///
/// 1. Decode bits; negative, overflowing or zero targets are invalid
/// 2. Target must not exceed the network's proof of work limit
/// 3. The hash, read as a big-endian integer, must not exceed the target
pub fn check_proof_of_work(hash: &Sha256Hash, bits: u32, params: &NetworkParams) -> Result<()> {
    // 1. Decode
    let compact = decode_compact(bits);
    if !compact.is_valid() {
        return Err(ConsensusError::Verification(format!(
            "Difficulty bits {:#010x} are not a valid target",
            bits
        )));
    }

    // 2. Range
    let limit = params.pow_limit();
    if compact.target > limit {
        return Err(ConsensusError::Verification(format!(
            "Difficulty target {} is above the proof of work limit {}",
            target_hex(&compact.target),
            target_hex(&limit)
        )));
    }

    // 3. Hash against target
    let value = hash.to_u256();
    if value > compact.target {
        return Err(ConsensusError::Verification(format!(
            "Hash {} is higher than target {}",
            hash,
            target_hex(&compact.target)
        )));
    }
    Ok(())
}
