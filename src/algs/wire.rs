//! Fixed, versioned, little-endian wire types for tree transfer.
//!
//! Every record is `Pod` with explicit padding so it can be appended to a
//! byte buffer with `bytemuck::bytes_of` and read back unaligned. Multi-byte
//! integers are stored pre-LE (`.to_le()`) and decoded with `from_le`.
//! Attribute payload words are opaque to the wire and copied verbatim.

use crate::mesh_error::CmeshError;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Message kinds carried in [`WireHdr::kind`].
pub mod kind {
    /// Committed tree blocks moved by the partitioner.
    pub const TREES: u16 = 1;
    /// Building-state content replicated from an authoritative rank.
    pub const DRAFT: u16 = 2;
    /// A single `u64` per rank (collective helpers).
    pub const COUNT: u16 = 3;
    /// First tree a refinement scheme rejects: `WireLen(global) | class code`.
    pub const UNSUPPORTED: u16 = 4;
}

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,  // = WIRE_VERSION.to_le()
    pub kind_le: u16,     // see `kind`
    pub reserved_le: u32, // future use; keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

/// Count or byte length of what follows.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}
impl WireLen {
    pub fn new(n: u64) -> Self {
        Self { n_le: n.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.n_le)
    }
}

// ===== Tree blocks =========================================================

/// Class byte of a draft tree that has no class yet.
pub const NO_CLASS: u8 = 0xFF;
/// `WireTree::flags` bit: the geometry field is meaningful.
pub const FLAG_HAS_GEOMETRY: u8 = 1;

/// Header of one tree block; followed by `num_faces` [`WireFace`]s,
/// `num_attrs` [`WireAttr`]s and `pool_words` 8-byte attribute words.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireTree {
    pub global_le: u64,
    pub geometry_le: u32,
    pub num_attrs_le: u32,
    pub pool_words_le: u32,
    pub class: u8,
    pub num_faces: u8,
    pub flags: u8,
    pub _pad: u8,
}

impl WireTree {
    pub fn global(&self) -> u64 {
        u64::from_le(self.global_le)
    }
    pub fn geometry(&self) -> Option<u32> {
        (self.flags & FLAG_HAS_GEOMETRY != 0).then(|| u32::from_le(self.geometry_le))
    }
    pub fn num_attrs(&self) -> usize {
        u32::from_le(self.num_attrs_le) as usize
    }
    pub fn pool_words(&self) -> usize {
        u32::from_le(self.pool_words_le) as usize
    }
}

/// `WireFace::kind` values.
pub const FACE_BOUNDARY: u8 = 0;
pub const FACE_TREE: u8 = 1;

/// One face of a committed tree; the neighbour is always a global index.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireFace {
    pub neighbor_le: u64,
    pub face: u8,
    pub orientation: u8,
    pub kind: u8,
    pub _pad: [u8; 5],
}

impl WireFace {
    pub fn boundary() -> Self {
        Self::zeroed()
    }
    pub fn tree(neighbor: u64, face: u8, orientation: u8) -> Self {
        Self {
            neighbor_le: neighbor.to_le(),
            face,
            orientation,
            kind: FACE_TREE,
            _pad: [0; 5],
        }
    }
    pub fn neighbor(&self) -> u64 {
        u64::from_le(self.neighbor_le)
    }
}

/// Attribute header: `(owner, key)` plus the payload's place in the pool.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireAttr {
    pub owner_le: u32,
    pub key_le: u32,
    pub offset_words_le: u32,
    pub len_le: u32,
}

impl WireAttr {
    pub fn new(owner: u32, key: u32, offset_words: u32, len: u32) -> Self {
        Self {
            owner_le: owner.to_le(),
            key_le: key.to_le(),
            offset_words_le: offset_words.to_le(),
            len_le: len.to_le(),
        }
    }
    pub fn decode(&self) -> (u32, u32, u32, u32) {
        (
            u32::from_le(self.owner_le),
            u32::from_le(self.key_le),
            u32::from_le(self.offset_words_le),
            u32::from_le(self.len_le),
        )
    }
}

/// A building-state join declaration (trees are draft indices).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireJoin {
    pub tree_a_le: u64,
    pub tree_b_le: u64,
    pub face_a: u8,
    pub face_b: u8,
    pub orientation: u8,
    pub _pad: [u8; 5],
}

impl WireJoin {
    pub fn new(tree_a: u64, face_a: u8, tree_b: u64, face_b: u8, orientation: u8) -> Self {
        Self {
            tree_a_le: tree_a.to_le(),
            tree_b_le: tree_b.to_le(),
            face_a,
            face_b,
            orientation,
            _pad: [0; 5],
        }
    }
    pub fn tree_a(&self) -> u64 {
        u64::from_le(self.tree_a_le)
    }
    pub fn tree_b(&self) -> u64 {
        u64::from_le(self.tree_b_le)
    }
}

// ===== Compile-time sanity checks =========================================

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireLen>(), 8);
const_assert_eq!(size_of::<WireTree>(), 24);
const_assert_eq!(size_of::<WireFace>(), 16);
const_assert_eq!(size_of::<WireAttr>(), 16);
const_assert_eq!(size_of::<WireJoin>(), 24);

// ===== Buffers =============================================================

/// Append-only message builder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn with_header(kind: u16) -> Self {
        let mut w = Self::default();
        w.put(&WireHdr::new(kind));
        w
    }

    #[inline]
    pub fn put<T: Pod>(&mut self, rec: &T) {
        self.buf.extend_from_slice(bytemuck::bytes_of(rec));
    }

    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received message. Reads are unaligned and bounds-checked.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Open a message and check its header against `kind`.
    pub fn open(buf: &'a [u8], kind: u16) -> Result<Self, CmeshError> {
        let mut r = Self::new(buf);
        let hdr: WireHdr = r.get()?;
        if hdr.version() != WIRE_VERSION {
            return Err(CmeshError::malformed(format!(
                "wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        if hdr.kind() != kind {
            return Err(CmeshError::malformed(format!(
                "message kind {} (expected {kind})",
                hdr.kind()
            )));
        }
        Ok(r)
    }

    pub fn get<T: Pod>(&mut self) -> Result<T, CmeshError> {
        let bytes = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CmeshError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                CmeshError::malformed(format!(
                    "expected {n} bytes at offset {}, message has {}",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail unless the whole message was consumed.
    pub fn finish(self) -> Result<(), CmeshError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(CmeshError::malformed(format!(
                "{} trailing bytes",
                self.remaining()
            )))
        }
    }
}
