//! Per-tree attribute store.
//!
//! `TreeAttributes` keeps every attribute of one tree in two flat arrays:
//! a header list sorted by `(owner, key)` and a single pool of 8-byte words
//! holding the payloads. Lookups are a binary search over the headers, and
//! the whole store serializes as one contiguous block (headers followed by
//! the pool) without per-attribute framing or allocation.
//!
//! Payloads start on a word boundary, so `f64`/`u64`-typed attributes (the
//! tree vertices, for instance) can be viewed in place with `bytemuck`.

use crate::algs::wire::{WireAttr, WireReader, WireWriter};
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::CmeshError;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::mem::{align_of, size_of};

/// Namespace of the component that defined an attribute.
pub type OwnerId = u32;
/// Key of an attribute within its owner's namespace.
pub type AttrKey = u32;

/// Owner id reserved for the coarse mesh itself.
pub const CMESH_OWNER: OwnerId = 0;

/// Well-known keys under [`CMESH_OWNER`].
pub mod keys {
    use super::AttrKey;
    /// Tree vertex coordinates, `3 * num_vertices` `f64`s.
    pub const VERTICES: AttrKey = 0;
    /// First key free for other uses under the cmesh owner.
    pub const NEXT_POSSIBLE: AttrKey = 1;
}

const WORD: usize = size_of::<u64>();

/// `(owner, key)` pair identifying an attribute of a tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeId {
    pub owner: OwnerId,
    pub key: AttrKey,
}

impl AttributeId {
    #[inline]
    pub const fn new(owner: OwnerId, key: AttrKey) -> Self {
        Self { owner, key }
    }

    /// The vertex-array attribute.
    pub const VERTICES: AttributeId = AttributeId::new(CMESH_OWNER, keys::VERTICES);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Slot {
    id: AttributeId,
    /// Start of the payload in pool words.
    offset: u32,
    /// Payload length in bytes.
    len: u32,
}

impl Slot {
    #[inline]
    fn words(&self) -> usize {
        words_for(self.len as usize)
    }
}

#[inline]
fn words_for(len: usize) -> usize {
    len.div_ceil(WORD)
}

/// All attributes of one tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeAttributes {
    slots: Vec<Slot>,
    pool: Vec<u64>,
}

impl TreeAttributes {
    /// Store a copy of `bytes` under `id`, replacing any previous value.
    ///
    /// # Errors
    /// `AttributeTooLarge` if `bytes` does not fit the 32-bit length field.
    pub fn set(&mut self, id: AttributeId, bytes: &[u8]) -> Result<(), CmeshError> {
        let len = u32::try_from(bytes.len()).map_err(|_| CmeshError::AttributeTooLarge(bytes.len()))?;
        let words = words_for(bytes.len());
        match self.slots.binary_search_by_key(&id, |s| s.id) {
            Ok(i) if self.slots[i].words() == words => {
                let start = self.slots[i].offset as usize;
                self.write_payload(start, bytes);
                self.slots[i].len = len;
            }
            Ok(i) => {
                self.release(i);
                let offset = self.append_payload(bytes)?;
                self.slots[i].offset = offset;
                self.slots[i].len = len;
            }
            Err(i) => {
                let offset = self.append_payload(bytes)?;
                self.slots.insert(i, Slot { id, offset, len });
            }
        }
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(())
    }

    /// Copy of `value`'s bytes stored under `id`.
    pub fn set_pod<T: Pod>(&mut self, id: AttributeId, value: &T) -> Result<(), CmeshError> {
        self.set(id, bytemuck::bytes_of(value))
    }

    /// The bytes stored under `id`.
    #[inline]
    pub fn get(&self, id: AttributeId) -> Option<&[u8]> {
        let i = self.slots.binary_search_by_key(&id, |s| s.id).ok()?;
        let slot = &self.slots[i];
        let start = slot.offset as usize;
        let words = &self.pool[start..start + slot.words()];
        Some(&bytemuck::cast_slice::<u64, u8>(words)[..slot.len as usize])
    }

    /// Read the attribute as a single `T`; fails if the length differs.
    pub fn get_pod<T: Pod>(&self, id: AttributeId) -> Option<Result<T, CmeshError>> {
        let bytes = self.get(id)?;
        Some(if bytes.len() == size_of::<T>() {
            Ok(bytemuck::pod_read_unaligned(bytes))
        } else {
            Err(type_mismatch(id, bytes.len()))
        })
    }

    /// View the attribute as a slice of `T` without copying.
    ///
    /// Works for any `T` with alignment up to 8, since payloads are
    /// word-aligned.
    pub fn get_slice<T: Pod>(&self, id: AttributeId) -> Option<Result<&[T], CmeshError>> {
        let bytes = self.get(id)?;
        if align_of::<T>() > WORD {
            return Some(Err(type_mismatch(id, bytes.len())));
        }
        Some(bytemuck::try_cast_slice(bytes).map_err(|_| type_mismatch(id, bytes.len())))
    }

    #[inline]
    pub fn contains(&self, id: AttributeId) -> bool {
        self.slots.binary_search_by_key(&id, |s| s.id).is_ok()
    }

    /// Number of attributes.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Attributes in ascending `(owner, key)` order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeId, &[u8])> + '_ {
        self.slots.iter().map(move |s| {
            let start = s.offset as usize;
            let words = &self.pool[start..start + s.words()];
            (s.id, &bytemuck::cast_slice::<u64, u8>(words)[..s.len as usize])
        })
    }

    /// Size of the packed block produced by [`write_wire`](Self::write_wire).
    pub fn packed_len(&self) -> usize {
        self.slots.len() * size_of::<WireAttr>() + self.pool.len() * WORD
    }

    /// Number of pool words.
    #[inline]
    pub fn pool_words(&self) -> usize {
        self.pool.len()
    }

    /// Append the headers, then the raw pool, to `w`.
    pub(crate) fn write_wire(&self, w: &mut WireWriter) {
        for s in &self.slots {
            w.put(&WireAttr::new(s.id.owner, s.id.key, s.offset, s.len));
        }
        w.put_bytes(bytemuck::cast_slice(&self.pool));
    }

    /// Inverse of [`write_wire`](Self::write_wire); every header is checked
    /// against the pool before anything is accepted.
    pub(crate) fn read_wire(
        r: &mut WireReader<'_>,
        num_attrs: usize,
        pool_words: usize,
    ) -> Result<Self, CmeshError> {
        let mut slots = Vec::with_capacity(num_attrs.min(r.remaining() / size_of::<WireAttr>()));
        for _ in 0..num_attrs {
            let wa: WireAttr = r.get()?;
            let (owner, key, offset, len) = wa.decode();
            slots.push(Slot {
                id: AttributeId::new(owner, key),
                offset,
                len,
            });
        }
        let pool_bytes = pool_words
            .checked_mul(WORD)
            .ok_or_else(|| CmeshError::malformed("attribute pool size overflows"))?;
        let raw = r.take(pool_bytes)?;
        let pool: Vec<u64> = raw
            .chunks_exact(WORD)
            .map(bytemuck::pod_read_unaligned::<u64>)
            .collect();
        let out = Self { slots, pool };
        out.validate_invariants()
            .map_err(|e| CmeshError::malformed(format!("attribute block: {e}")))?;
        Ok(out)
    }

    fn write_payload(&mut self, start: usize, bytes: &[u8]) {
        let words = words_for(bytes.len());
        let dst = &mut self.pool[start..start + words];
        dst.fill(0);
        bytemuck::cast_slice_mut::<u64, u8>(dst)[..bytes.len()].copy_from_slice(bytes);
    }

    fn append_payload(&mut self, bytes: &[u8]) -> Result<u32, CmeshError> {
        let start = self.pool.len();
        let offset = u32::try_from(start).map_err(|_| CmeshError::AttributeTooLarge(bytes.len()))?;
        self.pool.resize(start + words_for(bytes.len()), 0);
        self.write_payload(start, bytes);
        Ok(offset)
    }

    /// Remove slot `i`'s payload from the pool, shifting later payloads down.
    fn release(&mut self, i: usize) {
        let start = self.slots[i].offset;
        let words = self.slots[i].words();
        if words == 0 {
            return;
        }
        self.pool.drain(start as usize..start as usize + words);
        for s in &mut self.slots {
            if s.offset > start {
                s.offset -= words as u32;
            }
        }
    }
}

fn type_mismatch(id: AttributeId, len: usize) -> CmeshError {
    CmeshError::AttributeTypeMismatch {
        owner: id.owner,
        key: id.key,
        len,
    }
}

impl DebugInvariants for TreeAttributes {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "TreeAttributes");
    }

    fn validate_invariants(&self) -> Result<(), CmeshError> {
        for pair in self.slots.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(CmeshError::malformed(format!(
                    "attribute headers not strictly sorted at {:?}",
                    pair[1].id
                )));
            }
        }
        for s in &self.slots {
            let (start, end) = (s.offset as usize, s.offset as usize + s.words());
            if end > self.pool.len() {
                return Err(CmeshError::malformed(format!(
                    "payload [{start}, {end}) exceeds pool of {} words",
                    self.pool.len()
                )));
            }
        }
        let mut spans: Vec<(usize, usize)> = self
            .slots
            .iter()
            .filter(|s| s.words() > 0)
            .map(|s| (s.offset as usize, s.offset as usize + s.words()))
            .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(CmeshError::malformed("overlapping attribute payloads"));
            }
        }
        Ok(())
    }
}
