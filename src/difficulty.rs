//! Difficulty rule engine
//!
//! The rules that apply to a candidate depend only on its parent's height and
//! the network: [`select_rules`] picks them, [`RulesPool`] runs them in order
//! and stops at the first failure. Each rule compares the candidate's target
//! against one computed from the parent's ancestry in the block store. When
//! that ancestry is not stored yet the rule is skipped.

use crate::constants::{DAA_WINDOW, EDA_BLOCKS, EDA_TRIGGER_SECONDS};
use crate::error::{ConsensusError, Result};
use crate::header::Header;
use crate::lite_block::LiteBlock;
use crate::params::NetworkParams;
use crate::pow::{decode_compact, encode_compact, target_hex};
use crate::store::{get_ancestor, median_time_past, BlockStore};
use primitive_types::U256;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVariant {
    /// Target never changes.
    NoRetargeting,
    /// Cumulative-work weighted average over the last 144 blocks.
    NewDaa,
    /// Legacy retarget at the end of each adjustment interval.
    DifficultyTransitionPoint,
    /// Min-difficulty networks: a timely block carries the last target that
    /// was not the pow limit.
    LastNonMinimalDifficulty,
    /// Legacy emergency adjustment between transition points.
    EmergencyDifficultyAdjustment,
}

/// SelectRules: ℕ × Params → [RuleVariant]
///
/// 1. No-retargeting networks: [NoRetargeting]
/// 2. Parent at or past the DAA activation height: [NewDaa]
/// 3. Candidate closes an adjustment interval: [DifficultyTransitionPoint]
/// 4. Otherwise: [LastNonMinimalDifficulty] on min-difficulty networks,
///    followed by [EmergencyDifficultyAdjustment]
pub fn select_rules(prev_height: i32, params: &NetworkParams) -> Vec<RuleVariant> {
    if params.no_retargeting {
        return vec![RuleVariant::NoRetargeting];
    }
    if prev_height >= params.daa_activation_height {
        return vec![RuleVariant::NewDaa];
    }
    if is_transition_point(prev_height, params) {
        return vec![RuleVariant::DifficultyTransitionPoint];
    }
    let mut rules = Vec::with_capacity(2);
    if params.allow_min_difficulty_blocks {
        rules.push(RuleVariant::LastNonMinimalDifficulty);
    }
    rules.push(RuleVariant::EmergencyDifficultyAdjustment);
    rules
}

impl RuleVariant {
    pub fn check<S: BlockStore + ?Sized>(
        &self,
        prev: &LiteBlock,
        candidate: &Header,
        store: &S,
        params: &NetworkParams,
    ) -> Result<()> {
        let expected = match self {
            RuleVariant::NoRetargeting => Some(prev.bits()),
            RuleVariant::NewDaa => next_cash_work_required(prev, candidate.time(), store, params)?,
            RuleVariant::DifficultyTransitionPoint => transition_work_required(prev, store, params)?,
            RuleVariant::LastNonMinimalDifficulty => {
                if is_late(prev, candidate.time(), params) {
                    None
                } else {
                    Some(last_non_minimal_bits(prev, store, params)?)
                }
            }
            RuleVariant::EmergencyDifficultyAdjustment => {
                if params.allow_min_difficulty_blocks && !is_late(prev, candidate.time(), params) {
                    // Decided by LastNonMinimalDifficulty
                    None
                } else {
                    emergency_work_required(prev, store, params)?
                }
            }
        };

        match expected {
            Some(bits) => require_target(*self, bits, prev, candidate),
            None => {
                debug!(rule = ?self, height = prev.height() + 1, "Difficulty rule not enforced");
                Ok(())
            }
        }
    }
}

/// Ordered rule set for the child of a given height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesPool {
    rules: Vec<RuleVariant>,
}

impl RulesPool {
    pub fn new(rules: Vec<RuleVariant>) -> Self {
        RulesPool { rules }
    }

    pub fn for_height(prev_height: i32, params: &NetworkParams) -> Self {
        RulesPool::new(select_rules(prev_height, params))
    }

    pub fn rules(&self) -> &[RuleVariant] {
        &self.rules
    }

    /// Run every rule, stopping at the first failure. On min-difficulty
    /// networks a late candidate carrying exactly the pow limit is accepted
    /// before any rule runs.
    pub fn check<S: BlockStore + ?Sized>(
        &self,
        prev: &LiteBlock,
        candidate: &Header,
        store: &S,
        params: &NetworkParams,
    ) -> Result<()> {
        if params.allow_min_difficulty_blocks
            && is_late(prev, candidate.time(), params)
            && decode_compact(candidate.bits()).target == params.pow_limit()
        {
            return Ok(());
        }
        for rule in &self.rules {
            rule.check(prev, candidate, store, params)?;
        }
        Ok(())
    }
}

/// Compact target the child of `prev`, timestamped `time`, must carry under
/// whichever algorithm is active. `None` when the history needed is not stored.
pub fn next_work_required<S: BlockStore + ?Sized>(
    prev: &LiteBlock,
    time: u32,
    store: &S,
    params: &NetworkParams,
) -> Result<Option<u32>> {
    if params.no_retargeting {
        return Ok(Some(prev.bits()));
    }
    if prev.height() >= params.daa_activation_height {
        return next_cash_work_required(prev, time, store, params);
    }
    next_eda_work_required(prev, time, store, params)
}

/// GetNextCashWorkRequired: LiteBlock × Time × Store → Bits
///
/// 1. Min-difficulty networks: a late block gets the pow limit
/// 2. last = suitable(prev), first = suitable(ancestor 144 blocks back)
/// 3. work = (last.chain_work - first.chain_work) × spacing / timespan,
///    timespan clamped to [72, 288] spacings
/// 4. target = 2^256 / work - 1, capped at the pow limit
pub fn next_cash_work_required<S: BlockStore + ?Sized>(
    prev: &LiteBlock,
    time: u32,
    store: &S,
    params: &NetworkParams,
) -> Result<Option<u32>> {
    // 1. Testnet relaxation
    if params.allow_min_difficulty_blocks && is_late(prev, time, params) {
        return Ok(Some(pow_limit_bits(params)));
    }

    // 2. Anchors
    let Some(last) = suitable_block(store, prev)? else {
        return Ok(None);
    };
    let Some(first_anchor) = get_ancestor(store, prev, prev.height() - DAA_WINDOW)? else {
        return Ok(None);
    };
    let Some(first) = suitable_block(store, &first_anchor)? else {
        return Ok(None);
    };

    // 3. Work per spacing over the window
    let Some(work) = last.chain_work().checked_sub(first.chain_work()) else {
        return Err(ConsensusError::Verification(format!(
            "Chain work decreases between heights {} and {}",
            first.height(),
            last.height()
        )));
    };
    let spacing = params.target_spacing;
    let timespan = (last.time() as i64 - first.time() as i64).clamp(72 * spacing, 288 * spacing);
    let work = work.saturating_mul(U256::from(spacing as u64)) / U256::from(timespan as u64);

    // 4. Target from work
    if work.is_zero() {
        return Ok(Some(pow_limit_bits(params)));
    }
    let target = (!work + U256::one()) / work;
    Ok(Some(encode_compact(target.min(params.pow_limit()))))
}

/// GetNextEDAWorkRequired: LiteBlock × Time × Store → Bits
///
/// 1. Transition point: retarget over the closing interval
/// 2. Min-difficulty networks: pow limit when late, else the last
///    non-minimal target
/// 3. Otherwise: the emergency adjustment
pub fn next_eda_work_required<S: BlockStore + ?Sized>(
    prev: &LiteBlock,
    time: u32,
    store: &S,
    params: &NetworkParams,
) -> Result<Option<u32>> {
    // 1. Transition
    if is_transition_point(prev.height(), params) {
        return transition_work_required(prev, store, params);
    }

    // 2. Testnet
    if params.allow_min_difficulty_blocks {
        if is_late(prev, time, params) {
            return Ok(Some(pow_limit_bits(params)));
        }
        return Ok(Some(last_non_minimal_bits(prev, store, params)?));
    }

    // 3. EDA
    emergency_work_required(prev, store, params)
}

fn is_transition_point(prev_height: i32, params: &NetworkParams) -> bool {
    (prev_height as i64 + 1) % params.difficulty_adjustment_interval() == 0
}

/// More than two spacings after its parent.
fn is_late(prev: &LiteBlock, time: u32, params: &NetworkParams) -> bool {
    time as i64 > prev.time() as i64 + 2 * params.target_spacing
}

fn pow_limit_bits(params: &NetworkParams) -> u32 {
    encode_compact(params.pow_limit())
}

fn is_pow_limit(bits: u32, params: &NetworkParams) -> bool {
    decode_compact(bits).target == params.pow_limit()
}

/// Retarget at the close of an interval: scale the parent's target by the
/// time the interval took, clamped to a factor of four either way.
fn transition_work_required<S: BlockStore + ?Sized>(
    prev: &LiteBlock,
    store: &S,
    params: &NetworkParams,
) -> Result<Option<u32>> {
    let interval = params.difficulty_adjustment_interval() as i32;
    let Some(first) = get_ancestor(store, prev, prev.height() - (interval - 1))? else {
        return Ok(None);
    };

    let timespan = params.target_timespan;
    let actual = (prev.time() as i64 - first.time() as i64).clamp(timespan / 4, timespan * 4);

    let target = decode_compact(prev.bits()).target;
    let scaled = target.saturating_mul(U256::from(actual as u64)) / U256::from(timespan as u64);
    Ok(Some(encode_compact(scaled.min(params.pow_limit()))))
}

/// Walk back past pow-limit blocks, stopping at an interval boundary or at
/// the first block whose parent is not stored.
fn last_non_minimal_bits<S: BlockStore + ?Sized>(
    prev: &LiteBlock,
    store: &S,
    params: &NetworkParams,
) -> Result<u32> {
    let interval = params.difficulty_adjustment_interval();
    let mut cursor = prev.clone();
    while cursor.height() as i64 % interval != 0 && is_pow_limit(cursor.bits(), params) {
        match store.get_prev(&cursor)? {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    Ok(cursor.bits())
}

/// Keep the parent's target unless the last six blocks took twelve hours or
/// more (by median time past), in which case raise it by a quarter.
fn emergency_work_required<S: BlockStore + ?Sized>(
    prev: &LiteBlock,
    store: &S,
    params: &NetworkParams,
) -> Result<Option<u32>> {
    if is_pow_limit(prev.bits(), params) {
        return Ok(Some(prev.bits()));
    }

    let Some(anchor) = get_ancestor(store, prev, prev.height() - EDA_BLOCKS)? else {
        return Ok(None);
    };
    let elapsed = median_time_past(store, prev)? as i64 - median_time_past(store, &anchor)? as i64;
    if elapsed < EDA_TRIGGER_SECONDS {
        return Ok(Some(prev.bits()));
    }

    let target = decode_compact(prev.bits()).target;
    let eased = target.saturating_add(target >> 2);
    debug!(height = prev.height() + 1, elapsed, "Emergency difficulty adjustment");
    Ok(Some(encode_compact(eased.min(params.pow_limit()))))
}

/// Median of `block` and its two parents by timestamp.
fn suitable_block<S: BlockStore + ?Sized>(store: &S, block: &LiteBlock) -> Result<Option<LiteBlock>> {
    let Some(parent) = store.get_prev(block)? else {
        return Ok(None);
    };
    let Some(grandparent) = store.get_prev(&parent)? else {
        return Ok(None);
    };

    let mut blocks = [grandparent, parent, block.clone()];
    if blocks[0].time() > blocks[2].time() {
        blocks.swap(0, 2);
    }
    if blocks[0].time() > blocks[1].time() {
        blocks.swap(0, 1);
    }
    if blocks[1].time() > blocks[2].time() {
        blocks.swap(1, 2);
    }
    let [_, middle, _] = blocks;
    Ok(Some(middle))
}

fn require_target(rule: RuleVariant, expected: u32, prev: &LiteBlock, candidate: &Header) -> Result<()> {
    let expected_target = decode_compact(expected).target;
    let actual_target = decode_compact(candidate.bits()).target;
    if expected_target != actual_target {
        return Err(ConsensusError::Verification(format!(
            "{:?}: unexpected target at height {}: got {} ({:#010x}), expected {} ({:#010x})",
            rule,
            prev.height() + 1,
            target_hex(&actual_target),
            candidate.bits(),
            target_hex(&expected_target),
            expected
        )));
    }
    Ok(())
}
