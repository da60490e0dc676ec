//! Binary object model and hash cache
//!
//! Every wire structure implements [`BitcoinObject`]: it parses itself from a
//! cursor and serializes itself into a sink. A parsed object keeps its own copy
//! of the byte span it was parsed from, so re-serializing it untouched is a
//! cheap clone. Children parsed as part of an owner keep no bytes; the owner's
//! copy already covers them.
//!
//! Lifecycle:
//! - Parsed objects are immutable until [`BitcoinObject::make_mutable`] is called.
//! - Constructed objects start out mutable.
//! - Every setter goes through [`BitcoinObject::begin_mutation`], which fails
//!   with `IllegalState` on an immutable object and drops the cached bytes (and,
//!   for [`Hashable`] objects, the cached hash) before anything changes.
//!
//! Owners hand out children only through `&mut` accessors that run
//! `begin_mutation` on the owner first, so a child can never be changed while an
//! ancestor is immutable, and no ancestor keeps a stale buffer or hash.

use crate::constants::UNKNOWN_LENGTH;
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use crate::wire::{ByteReader, ByteWriter};
use bytes::Bytes;
use std::sync::OnceLock;

/// Serialization cache and mutability flag shared by every wire object.
///
/// Caches never take part in equality: two objects with equal fields are equal
/// whether or not either has been serialized yet.
#[derive(Debug, Clone)]
pub struct ObjectState {
    bytes: OnceLock<Bytes>,
    mutable: bool,
}

impl Default for ObjectState {
    fn default() -> Self {
        ObjectState { bytes: OnceLock::new(), mutable: true }
    }
}

impl PartialEq for ObjectState {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for ObjectState {}

impl ObjectState {
    /// State of an object parsed from exactly `bytes`.
    pub fn parsed(bytes: Bytes) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(bytes);
        ObjectState { bytes: cell, mutable: false }
    }

    /// State of an object parsed inside its owner: immutable, nothing cached.
    pub fn frozen() -> Self {
        ObjectState { bytes: OnceLock::new(), mutable: false }
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn make_mutable(&mut self) {
        self.mutable = true;
        self.bytes.take();
    }

    pub fn check_mutable(&self, what: &str) -> Result<()> {
        if !self.mutable {
            return Err(ConsensusError::IllegalState(format!(
                "Attempt to modify {} of an immutable object; call make_mutable first",
                what
            )));
        }
        Ok(())
    }

    pub fn cached(&self) -> Option<&Bytes> {
        self.bytes.get()
    }

    pub fn cache(&self, bytes: Bytes) {
        let _ = self.bytes.set(bytes);
    }

    pub fn invalidate(&mut self) {
        self.bytes.take();
    }
}

/// Lazily computed double-SHA-256 identity.
#[derive(Debug, Clone, Default)]
pub struct HashCache(OnceLock<Sha256Hash>);

impl PartialEq for HashCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for HashCache {}

impl HashCache {
    pub fn get_or_compute(&self, compute: impl FnOnce() -> Sha256Hash) -> Sha256Hash {
        *self.0.get_or_init(compute)
    }

    pub fn is_cached(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn clear(&mut self) {
        self.0.take();
    }
}

/// Byte-exact parse/serialize contract.
pub trait BitcoinObject: Sized {
    /// Serialized size of fixed-size types.
    const FIXED_LENGTH: Option<usize> = None;

    /// Read the fields starting at the reader's cursor, leaving the cursor exactly
    /// past this object's encoding.
    fn read_fields(reader: &mut ByteReader) -> Result<Self>;

    /// Write the fields into `writer`.
    fn serialize_to(&self, writer: &mut ByteWriter);

    fn state(&self) -> &ObjectState;

    fn state_mut(&mut self) -> &mut ObjectState;

    /// Output buffer pre-size; correctness never depends on it.
    fn estimated_length(&self) -> usize {
        Self::FIXED_LENGTH.unwrap_or(256)
    }

    /// Drop every cached derivation of the current field values.
    fn invalidate(&mut self) {
        self.state_mut().invalidate();
    }

    /// Parse one object at the reader's cursor. The object caches exactly the
    /// bytes it consumed, trimmed out of the reader's buffer.
    fn parse_from(reader: &mut ByteReader) -> Result<Self> {
        let start = reader.cursor();
        let mut object = Self::read_fields(reader)?;
        let end = reader.cursor();
        *object.state_mut() = ObjectState::parsed(reader.slice(start, end));
        Ok(object)
    }

    /// Parse a child from inside its owner's [`BitcoinObject::read_fields`].
    /// Immutable like any parsed object, but caches nothing.
    fn parse_child(reader: &mut ByteReader) -> Result<Self> {
        let mut object = Self::read_fields(reader)?;
        *object.state_mut() = ObjectState::frozen();
        Ok(object)
    }

    /// Parse an object that must span the whole buffer.
    fn parse(bytes: impl Into<Bytes>) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let object = Self::parse_from(&mut reader)?;
        if !reader.is_exhausted() {
            return Err(ConsensusError::Protocol(format!(
                "{} trailing bytes after object of {} bytes",
                reader.remaining(),
                reader.cursor()
            )));
        }
        Ok(object)
    }

    /// Parse an object starting at `offset`; returns it with its length.
    fn parse_at(bytes: impl Into<Bytes>, offset: usize) -> Result<(Self, usize)> {
        let mut reader = ByteReader::at(bytes, offset)?;
        let object = Self::parse_from(&mut reader)?;
        Ok((object, reader.cursor() - offset))
    }

    fn serialize(&self) -> Bytes {
        if let Some(bytes) = self.state().cached() {
            return bytes.clone();
        }
        let mut writer = ByteWriter::with_capacity(self.estimated_length());
        self.serialize_to(&mut writer);
        let bytes = writer.freeze();
        self.state().cache(bytes.clone());
        bytes
    }

    fn length(&self) -> usize {
        if let Some(length) = Self::FIXED_LENGTH {
            return length;
        }
        match self.state().cached() {
            Some(bytes) => bytes.len(),
            None => self.serialize().len(),
        }
    }

    /// Length if already known without serializing, else [`UNKNOWN_LENGTH`].
    fn known_length(&self) -> usize {
        Self::FIXED_LENGTH
            .or_else(|| self.state().cached().map(|b| b.len()))
            .unwrap_or(UNKNOWN_LENGTH)
    }

    fn is_mutable(&self) -> bool {
        self.state().is_mutable()
    }

    fn make_mutable(&mut self) {
        self.state_mut().make_mutable();
        self.invalidate();
    }

    /// Gate every setter: fail on immutable objects, then drop cached derivations.
    fn begin_mutation(&mut self, what: &str) -> Result<()> {
        self.state().check_mutable(what)?;
        self.invalidate();
        Ok(())
    }
}

/// Objects identified by the double SHA-256 of their serialized form.
pub trait Hashable: BitcoinObject {
    fn hash_cache(&self) -> &HashCache;

    /// Double SHA-256 of the serialization, in display order. Computed once and
    /// served from the cache until the next mutation.
    fn hash(&self) -> Sha256Hash {
        self.hash_cache()
            .get_or_compute(|| Sha256Hash::twice_of(&self.serialize()))
    }
}
