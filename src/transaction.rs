//! Transactions and their components: outpoints, inputs, outputs

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::object::{BitcoinObject, HashCache, Hashable, ObjectState};
use crate::wire::{var_int_size, ByteReader, ByteWriter};
use bytes::Bytes;
use std::collections::HashSet;

/// Reference to output `index` of transaction `hash`. Fixed 36 bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOutPoint {
    state: ObjectState,
    hash: Sha256Hash,
    index: u32,
}

impl std::hash::Hash for TxOutPoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
        self.index.hash(state);
    }
}

impl TxOutPoint {
    pub fn new(hash: Sha256Hash, index: u32) -> Self {
        TxOutPoint { state: ObjectState::default(), hash, index }
    }

    /// The outpoint carried by coinbase inputs.
    pub fn null() -> Self {
        Self::new(Sha256Hash::ZERO, UNCONNECTED)
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.index == UNCONNECTED
    }

    pub fn hash(&self) -> Sha256Hash {
        self.hash
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn set_hash(&mut self, hash: Sha256Hash) -> Result<()> {
        self.begin_mutation("outpoint hash")?;
        self.hash = hash;
        Ok(())
    }

    pub fn set_index(&mut self, index: u32) -> Result<()> {
        self.begin_mutation("outpoint index")?;
        self.index = index;
        Ok(())
    }
}

impl BitcoinObject for TxOutPoint {
    const FIXED_LENGTH: Option<usize> = Some(OUTPOINT_SIZE);

    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        Ok(TxOutPoint {
            state: ObjectState::default(),
            hash: reader.read_hash("outpoint hash")?,
            index: reader.read_u32("outpoint index")?,
        })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        writer.write_hash(&self.hash);
        writer.write_u32(self.index);
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}

/// Transaction input.
///
/// `value` is the amount of the output being spent when the caller knows it. It
/// is an annotation only: never serialized and not part of equality.
#[derive(Debug, Clone, Default)]
pub struct TxInput {
    state: ObjectState,
    outpoint: TxOutPoint,
    script: Bytes,
    sequence: u32,
    value: Option<i64>,
}

impl PartialEq for TxInput {
    fn eq(&self, other: &Self) -> bool {
        self.outpoint == other.outpoint
            && self.script == other.script
            && self.sequence == other.sequence
    }
}

impl Eq for TxInput {}

impl TxInput {
    pub fn new(outpoint: TxOutPoint, script: impl Into<Bytes>, sequence: u32) -> Self {
        TxInput {
            state: ObjectState::default(),
            outpoint,
            script: script.into(),
            sequence,
            value: None,
        }
    }

    /// Input spending nothing, carrying the coinbase script.
    pub fn coinbase(script: impl Into<Bytes>) -> Self {
        Self::new(TxOutPoint::null(), script, NO_SEQUENCE)
    }

    pub fn outpoint(&self) -> &TxOutPoint {
        &self.outpoint
    }

    pub fn script_bytes(&self) -> &Bytes {
        &self.script
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn is_final(&self) -> bool {
        self.sequence == NO_SEQUENCE
    }

    pub fn value(&self) -> Option<i64> {
        self.value
    }

    pub fn outpoint_mut(&mut self) -> Result<&mut TxOutPoint> {
        self.begin_mutation("input outpoint")?;
        Ok(&mut self.outpoint)
    }

    pub fn set_script(&mut self, script: impl Into<Bytes>) -> Result<()> {
        self.begin_mutation("input script")?;
        self.script = script.into();
        Ok(())
    }

    pub fn set_sequence(&mut self, sequence: u32) -> Result<()> {
        self.begin_mutation("input sequence")?;
        self.sequence = sequence;
        Ok(())
    }

    pub fn set_value(&mut self, value: Option<i64>) {
        self.value = value;
    }
}

impl BitcoinObject for TxInput {
    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        Ok(TxInput {
            state: ObjectState::default(),
            outpoint: TxOutPoint::parse_child(reader)?,
            script: reader.read_var_bytes("input script")?,
            sequence: reader.read_u32("input sequence")?,
            value: None,
        })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        self.outpoint.serialize_to(writer);
        writer.write_var_bytes(&self.script);
        writer.write_u32(self.sequence);
    }

    fn estimated_length(&self) -> usize {
        OUTPOINT_SIZE + var_int_size(self.script.len() as u64) + self.script.len() + 4
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}

/// Transaction output: value in satoshis and the locking script.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOutput {
    state: ObjectState,
    value: i64,
    script: Bytes,
}

impl TxOutput {
    pub fn new(value: i64, script: impl Into<Bytes>) -> Self {
        TxOutput { state: ObjectState::default(), value, script: script.into() }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn script_bytes(&self) -> &Bytes {
        &self.script
    }

    pub fn set_value(&mut self, value: i64) -> Result<()> {
        self.begin_mutation("output value")?;
        self.value = value;
        Ok(())
    }

    pub fn set_script(&mut self, script: impl Into<Bytes>) -> Result<()> {
        self.begin_mutation("output script")?;
        self.script = script.into();
        Ok(())
    }
}

impl BitcoinObject for TxOutput {
    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        Ok(TxOutput {
            state: ObjectState::default(),
            value: reader.read_i64("output value")?,
            script: reader.read_var_bytes("output script")?,
        })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        writer.write_i64(self.value);
        writer.write_var_bytes(&self.script);
    }

    fn estimated_length(&self) -> usize {
        8 + var_int_size(self.script.len() as u64) + self.script.len()
    }

    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}

/// Transaction: version, inputs, outputs, lock time. Identified by its txid,
/// the double SHA-256 of its serialization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tx {
    state: ObjectState,
    hash: HashCache,
    version: u32,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    lock_time: u32,
}

impl Tx {
    pub fn new(version: u32, lock_time: u32) -> Self {
        Tx { version, lock_time, ..Default::default() }
    }

    pub fn from_parts(
        version: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u32,
    ) -> Self {
        Tx { version, inputs, outputs, lock_time, ..Default::default() }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    pub fn set_version(&mut self, version: u32) -> Result<()> {
        self.begin_mutation("tx version")?;
        self.version = version;
        Ok(())
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> Result<()> {
        self.begin_mutation("tx lock time")?;
        self.lock_time = lock_time;
        Ok(())
    }

    pub fn add_input(&mut self, input: TxInput) -> Result<()> {
        self.begin_mutation("tx inputs")?;
        self.inputs.push(input);
        Ok(())
    }

    pub fn add_output(&mut self, output: TxOutput) -> Result<()> {
        self.begin_mutation("tx outputs")?;
        self.outputs.push(output);
        Ok(())
    }

    pub fn input_mut(&mut self, index: usize) -> Result<&mut TxInput> {
        self.begin_mutation("tx inputs")?;
        let count = self.inputs.len();
        self.inputs.get_mut(index).ok_or_else(|| {
            ConsensusError::IllegalState(format!("Input {} out of range ({} inputs)", index, count))
        })
    }

    pub fn output_mut(&mut self, index: usize) -> Result<&mut TxOutput> {
        self.begin_mutation("tx outputs")?;
        let count = self.outputs.len();
        self.outputs.get_mut(index).ok_or_else(|| {
            ConsensusError::IllegalState(format!("Output {} out of range ({} outputs)", index, count))
        })
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].outpoint.is_null()
    }

    /// Sum of the output values, `None` if it overflows.
    pub fn total_output_value(&self) -> Option<i64> {
        self.outputs.iter().try_fold(0i64, |total, o| total.checked_add(o.value))
    }

    /// CheckTransaction: structural rules that need no chain context.
    ///
    /// A transaction is valid if and only if:
    /// 1. it has at least one input and one output
    /// 2. its serialized size is at most MAX_TX_SIZE
    /// 3. every output value, and their sum, lies in [0, MAX_MONEY]
    /// 4. no outpoint is spent twice
    /// 5. a coinbase script is 2..=100 bytes; other inputs never spend the null outpoint
    pub fn verify(&self) -> Result<()> {
        // 1. Non-empty inputs and outputs
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(ConsensusError::Verification(format!(
                "Transaction {} has empty inputs or outputs",
                self.hash()
            )));
        }

        // 2. Size limit
        let size = self.length();
        if size > MAX_TX_SIZE {
            return Err(ConsensusError::Verification(format!(
                "Transaction {} too large: {} bytes",
                self.hash(),
                size
            )));
        }

        // 3. Output values
        let mut total: i64 = 0;
        for (i, output) in self.outputs.iter().enumerate() {
            if output.value < 0 {
                return Err(ConsensusError::Verification(format!(
                    "Negative output value {} at index {}",
                    output.value, i
                )));
            }
            if output.value > MAX_MONEY {
                return Err(ConsensusError::Verification(format!(
                    "Output value {} at index {} exceeds MAX_MONEY",
                    output.value, i
                )));
            }
            total += output.value;
            if total > MAX_MONEY {
                return Err(ConsensusError::Verification(format!(
                    "Total output value {} exceeds MAX_MONEY",
                    total
                )));
            }
        }

        // 4. Duplicated outpoints
        let mut spent = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !spent.insert(&input.outpoint) {
                return Err(ConsensusError::Verification(format!(
                    "Duplicated outpoint {}:{}",
                    input.outpoint.hash, input.outpoint.index
                )));
            }
        }

        // 5. Coinbase script bounds / null outpoints
        if self.is_coinbase() {
            let len = self.inputs[0].script.len();
            if !(MIN_COINBASE_SCRIPT_LEN..=MAX_COINBASE_SCRIPT_LEN).contains(&len) {
                return Err(ConsensusError::Verification(format!(
                    "Coinbase script size {} out of range [{}, {}]",
                    len, MIN_COINBASE_SCRIPT_LEN, MAX_COINBASE_SCRIPT_LEN
                )));
            }
        } else if self.inputs.iter().any(|input| input.outpoint.is_null()) {
            return Err(ConsensusError::Verification(
                "Coinbase-style input in a non-coinbase transaction".to_string(),
            ));
        }

        Ok(())
    }
}

impl BitcoinObject for Tx {
    fn read_fields(reader: &mut ByteReader) -> Result<Self> {
        let version = reader.read_u32("tx version")?;

        let input_count = reader.read_length("tx input count")?;
        let mut inputs = Vec::with_capacity(input_count.min(reader.remaining() / 41));
        for _ in 0..input_count {
            inputs.push(TxInput::parse_child(reader)?);
        }

        let output_count = reader.read_length("tx output count")?;
        let mut outputs = Vec::with_capacity(output_count.min(reader.remaining() / 9));
        for _ in 0..output_count {
            outputs.push(TxOutput::parse_child(reader)?);
        }

        let lock_time = reader.read_u32("tx lock time")?;
        Ok(Tx { version, inputs, outputs, lock_time, ..Default::default() })
    }

    fn serialize_to(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.version);
        writer.write_var_int(self.inputs.len() as u64);
        for input in &self.inputs {
            input.serialize_to(writer);
        }
        writer.write_var_int(self.outputs.len() as u64);
        for output in &self.outputs {
            output.serialize_to(writer);
        }
        writer.write_u32(self.lock_time);
    }

    fn estimated_length(&self) -> usize {
        8 + var_int_size(self.inputs.len() as u64)
            + var_int_size(self.outputs.len() as u64)
            + self.inputs.iter().map(|i| i.estimated_length()).sum::<usize>()
            + self.outputs.iter().map(|o| o.estimated_length()).sum::<usize>()
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

impl Hashable for Tx {
    fn hash_cache(&self) -> &HashCache {
        &self.hash
    }
}
