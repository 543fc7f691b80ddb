//! Single-process-authoritative construction: one rank builds, then the
//! building-state content is broadcast to all ranks before commit.
//!
//! Message layout (`kind::DRAFT`):
//! `WireHdr | WireLen(#geometries) | (WireLen(len) | name bytes)* |
//!  WireLen(#trees) | (WireTree | WireAttr* | pool words)* | WireLen(#joins) | WireJoin*`
//!
//! Geometry capabilities cannot travel; their names do, and every rank must
//! have registered the same geometries in the same order.

use super::Cmesh;
use crate::algs::collective::broadcast_bytes;
use crate::algs::communicator::Communicator;
use crate::algs::wire::{
    FLAG_HAS_GEOMETRY, NO_CLASS, WireJoin, WireLen, WireReader, WireTree, WireWriter, kind,
};
use crate::data::attributes::TreeAttributes;
use crate::geometry::GeometryId;
use crate::mesh_error::CmeshError;
use crate::topology::eclass::TreeClass;
use crate::topology::orientation::FaceOrientation;
use crate::topology::tree::{JoinDecl, LocalIdx, TreeDraft};
use bytemuck::Zeroable;
use std::mem::size_of;

impl Cmesh {
    /// Replace the building-state content of every rank with `root`'s.
    ///
    /// Collective over `comm`; call it on every rank before `commit`. Trees,
    /// attributes and joins are taken from `root`; geometries are not sent,
    /// only checked by name against each rank's own registry.
    pub fn broadcast_from<C: Communicator>(&mut self, root: usize, comm: &C) -> Result<(), CmeshError> {
        self.ensure_trees_mutable()?;
        let me = comm.rank();
        let payload = if me == root {
            Some(self.encode_draft()?)
        } else {
            None
        };
        let bytes = broadcast_bytes(comm, root, payload)?;
        if me == root {
            return Ok(());
        }

        let (names, drafts, joins) = decode_draft(&bytes)?;
        let ours: Vec<&str> = self.geometries.names().collect();
        if ours != names {
            return Err(CmeshError::InconsistentReplication(format!(
                "rank {me} registered geometries {ours:?}, rank {root} {names:?}"
            )));
        }
        if !self.drafts.is_empty() || !self.joins.is_empty() {
            log::warn!(
                "[rank {me}] discarding {} local trees in favour of rank {root}'s content",
                self.drafts.len()
            );
        }
        log::debug!("[rank {me}] received {} trees from rank {root}", drafts.len());
        self.drafts = drafts;
        self.join_index.clear();
        for (i, j) in joins.iter().enumerate() {
            self.join_index.entry((j.tree_a, j.face_a)).or_insert(i);
            self.join_index.entry((j.tree_b, j.face_b)).or_insert(i);
        }
        self.joins = joins;
        Ok(())
    }

    fn encode_draft(&self) -> Result<Vec<u8>, CmeshError> {
        let mut w = WireWriter::with_header(kind::DRAFT);
        w.put(&WireLen::new(self.geometries.len() as u64));
        for name in self.geometries.names() {
            w.put(&WireLen::new(name.len() as u64));
            w.put_bytes(name.as_bytes());
        }
        w.put(&WireLen::new(self.drafts.len() as u64));
        for (i, d) in self.drafts.iter().enumerate() {
            let mut hdr = WireTree::zeroed();
            hdr.global_le = (i as u64).to_le();
            hdr.class = d.class.map_or(NO_CLASS, TreeClass::to_code);
            if let Some(g) = d.geometry {
                hdr.geometry_le = g.0.to_le();
                hdr.flags |= FLAG_HAS_GEOMETRY;
            }
            hdr.num_attrs_le = to_u32(d.attributes.len())?.to_le();
            hdr.pool_words_le = to_u32(d.attributes.pool_words())?.to_le();
            w.put(&hdr);
            d.attributes.write_wire(&mut w);
        }
        w.put(&WireLen::new(self.joins.len() as u64));
        for j in &self.joins {
            w.put(&WireJoin::new(
                j.tree_a as u64,
                j.face_a,
                j.tree_b as u64,
                j.face_b,
                j.orientation.get(),
            ));
        }
        Ok(w.into_bytes())
    }
}

fn to_u32(n: usize) -> Result<u32, CmeshError> {
    u32::try_from(n).map_err(|_| CmeshError::AttributeTooLarge(n))
}

fn read_count(r: &mut WireReader<'_>, item: usize) -> Result<usize, CmeshError> {
    let n = r.get::<WireLen>()?.get();
    // every item takes at least `item` bytes
    match usize::try_from(n) {
        Ok(n) if n.saturating_mul(item.max(1)) <= r.remaining() => Ok(n),
        _ => Err(CmeshError::malformed(format!("count {n} exceeds message"))),
    }
}

type Draft = (Vec<String>, Vec<TreeDraft>, Vec<JoinDecl>);

fn decode_draft(bytes: &[u8]) -> Result<Draft, CmeshError> {
    let mut r = WireReader::open(bytes, kind::DRAFT)?;

    let num_names = read_count(&mut r, size_of::<WireLen>())?;
    let mut names = Vec::with_capacity(num_names);
    for _ in 0..num_names {
        let len = read_count(&mut r, 1)?;
        let raw = r.take(len)?;
        let name = std::str::from_utf8(raw)
            .map_err(|e| CmeshError::malformed(format!("geometry name: {e}")))?;
        names.push(name.to_owned());
    }

    let num_trees = read_count(&mut r, size_of::<WireTree>())?;
    let mut drafts = Vec::with_capacity(num_trees);
    for i in 0..num_trees {
        let hdr: WireTree = r.get()?;
        if hdr.global() != i as u64 {
            return Err(CmeshError::malformed(format!(
                "draft {} at position {i}",
                hdr.global()
            )));
        }
        let class = match hdr.class {
            NO_CLASS => None,
            code => Some(
                TreeClass::from_code(code)
                    .ok_or_else(|| CmeshError::malformed(format!("draft {i}: class code {code}")))?,
            ),
        };
        let geometry = match hdr.geometry() {
            Some(g) if (g as usize) < names.len() => Some(GeometryId(g)),
            Some(g) => {
                return Err(CmeshError::malformed(format!("draft {i}: geometry {g}")));
            }
            None => None,
        };
        let attributes = TreeAttributes::read_wire(&mut r, hdr.num_attrs(), hdr.pool_words())?;
        drafts.push(TreeDraft {
            class,
            geometry,
            attributes,
        });
    }

    let num_joins = read_count(&mut r, size_of::<WireJoin>())?;
    let mut joins = Vec::with_capacity(num_joins);
    for _ in 0..num_joins {
        let wj: WireJoin = r.get()?;
        let (a, b) = (wj.tree_a(), wj.tree_b());
        if a >= num_trees as u64 || b >= num_trees as u64 {
            return Err(CmeshError::malformed(format!(
                "join {a}/{b} outside {num_trees} trees"
            )));
        }
        joins.push(JoinDecl {
            tree_a: a as LocalIdx,
            face_a: wj.face_a,
            tree_b: b as LocalIdx,
            face_b: wj.face_b,
            orientation: FaceOrientation(wj.orientation),
        });
    }
    r.finish()?;
    Ok((names, drafts, joins))
}
