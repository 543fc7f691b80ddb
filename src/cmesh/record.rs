//! Packing of tree blocks for transfer between processes.
//!
//! A block is self-contained: base record, every face (neighbours as global
//! indices) and the packed attribute store travel together, so a receiver
//! either has a tree completely or not at all.
//!
//! Message layout (`kind::TREES`):
//! `WireHdr | WireLen(count) | count × (WireTree | WireFace* | WireAttr* | pool words)`

use crate::algs::wire::{
    FACE_BOUNDARY, FACE_TREE, FLAG_HAS_GEOMETRY, WireFace, WireLen, WireReader, WireTree, WireWriter,
    kind,
};
use crate::data::attributes::TreeAttributes;
use crate::geometry::GeometryId;
use crate::mesh_error::CmeshError;
use crate::topology::eclass::TreeClass;
use crate::topology::orientation::FaceOrientation;
use crate::topology::tree::{FaceNeighbor, GlobalIdx, LocalIdx, Tree};
use bytemuck::Zeroable;
use std::mem::size_of;

/// A tree detached from any process: every non-boundary face refers to its
/// neighbour by global index (`FaceNeighbor::Remote`).
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TreeRecord {
    pub global: GlobalIdx,
    pub class: TreeClass,
    /// Geometry index in the *source* registry.
    pub geometry: GeometryId,
    pub faces: Vec<FaceNeighbor>,
    pub attributes: TreeAttributes,
}

fn globalize(face: FaceNeighbor, first_tree: GlobalIdx) -> FaceNeighbor {
    match face {
        FaceNeighbor::Local {
            tree,
            face,
            orientation,
        } => FaceNeighbor::Remote {
            global: first_tree + tree as GlobalIdx,
            face,
            orientation,
        },
        other => other,
    }
}

impl TreeRecord {
    /// Detach `tree`, held at `global` by a process whose range starts at
    /// `first_tree`.
    pub fn from_tree(tree: &Tree, global: GlobalIdx, first_tree: GlobalIdx) -> Self {
        Self {
            global,
            class: tree.class,
            geometry: tree.geometry,
            faces: tree.faces.iter().map(|&f| globalize(f, first_tree)).collect(),
            attributes: tree.attributes.clone(),
        }
    }

    /// Attach to a process holding `[first_tree, first_tree + num_local)` of
    /// `num_trees`, translating geometry ids through `geometry_map`.
    pub fn into_tree(
        self,
        geometry_map: &[GeometryId],
        first_tree: GlobalIdx,
        num_local: usize,
        num_trees: GlobalIdx,
    ) -> Result<Tree, CmeshError> {
        let geometry = *geometry_map.get(self.geometry.index()).ok_or_else(|| {
            CmeshError::malformed(format!(
                "tree {} references geometry {} of {}",
                self.global,
                self.geometry,
                geometry_map.len()
            ))
        })?;
        let faces = self
            .faces
            .into_iter()
            .map(|f| match f {
                FaceNeighbor::Boundary => Ok(FaceNeighbor::Boundary),
                FaceNeighbor::Remote {
                    global,
                    face,
                    orientation,
                } if global < num_trees => Ok(FaceNeighbor::resolve(
                    global,
                    face,
                    orientation,
                    first_tree,
                    num_local,
                )),
                _ => Err(CmeshError::malformed(format!(
                    "tree {} has a neighbour outside the {num_trees} global trees",
                    self.global
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tree {
            class: self.class,
            geometry,
            faces,
            attributes: self.attributes,
        })
    }

    /// Bytes this record occupies in a message.
    #[cfg(test)]
    pub fn packed_len(&self) -> usize {
        size_of::<WireTree>()
            + self.faces.len() * size_of::<WireFace>()
            + self.attributes.packed_len()
    }
}

/// Append the block of one tree. Local neighbours are rewritten to global
/// indices using `first_tree`.
pub(crate) fn write_tree(
    w: &mut WireWriter,
    tree: &Tree,
    global: GlobalIdx,
    first_tree: GlobalIdx,
) -> Result<(), CmeshError> {
    let mut hdr = WireTree::zeroed();
    hdr.global_le = global.to_le();
    hdr.geometry_le = tree.geometry.0.to_le();
    hdr.flags = FLAG_HAS_GEOMETRY;
    hdr.class = tree.class.to_code();
    hdr.num_faces = tree.class.num_faces();
    hdr.num_attrs_le = wire_u32(tree.attributes.len())?.to_le();
    hdr.pool_words_le = wire_u32(tree.attributes.pool_words())?.to_le();
    w.put(&hdr);
    for face in &tree.faces {
        let rec = match globalize(*face, first_tree) {
            FaceNeighbor::Remote {
                global,
                face,
                orientation,
            } => WireFace::tree(global, face, orientation.get()),
            _ => WireFace::boundary(),
        };
        w.put(&rec);
    }
    tree.attributes.write_wire(w);
    Ok(())
}

fn wire_u32(n: usize) -> Result<u32, CmeshError> {
    u32::try_from(n).map_err(|_| CmeshError::AttributeTooLarge(n))
}

/// Read one tree block.
pub(crate) fn read_tree(r: &mut WireReader<'_>) -> Result<TreeRecord, CmeshError> {
    let hdr: WireTree = r.get()?;
    let global = hdr.global();
    let class = TreeClass::from_code(hdr.class)
        .ok_or_else(|| CmeshError::malformed(format!("tree {global}: class code {}", hdr.class)))?;
    if hdr.num_faces != class.num_faces() {
        return Err(CmeshError::malformed(format!(
            "tree {global}: {} faces for {class:?}",
            hdr.num_faces
        )));
    }
    let geometry = hdr
        .geometry()
        .map(GeometryId)
        .ok_or_else(|| CmeshError::malformed(format!("tree {global} without geometry")))?;
    let mut faces = Vec::with_capacity(hdr.num_faces as usize);
    for f in 0..hdr.num_faces {
        let wf: WireFace = r.get()?;
        faces.push(match wf.kind {
            FACE_BOUNDARY => FaceNeighbor::Boundary,
            FACE_TREE => {
                let fc = class
                    .face_class(f)
                    .ok_or_else(|| CmeshError::malformed(format!("tree {global}: face {f}")))?;
                let orientation = FaceOrientation(wf.orientation);
                if !orientation.is_valid_for(fc) {
                    return Err(CmeshError::malformed(format!(
                        "tree {global}: orientation {} on face {f}",
                        wf.orientation
                    )));
                }
                FaceNeighbor::Remote {
                    global: wf.neighbor(),
                    face: wf.face,
                    orientation,
                }
            }
            k => {
                return Err(CmeshError::malformed(format!("tree {global}: face kind {k}")));
            }
        });
    }
    let attributes = TreeAttributes::read_wire(r, hdr.num_attrs(), hdr.pool_words())?;
    Ok(TreeRecord {
        global,
        class,
        geometry,
        faces,
        attributes,
    })
}

/// Pack the trees `local` (indices into `trees`) of a process starting at
/// `first_tree` into one message.
pub(crate) fn pack_trees(
    trees: &[Tree],
    local: std::ops::Range<LocalIdx>,
    first_tree: GlobalIdx,
) -> Result<Vec<u8>, CmeshError> {
    let mut w = WireWriter::with_header(kind::TREES);
    w.put(&WireLen::new(local.len() as u64));
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        let blocks = local
            .into_par_iter()
            .map(|l| {
                let mut b = WireWriter::default();
                write_tree(&mut b, &trees[l], first_tree + l as GlobalIdx, first_tree)?;
                Ok(b.into_bytes())
            })
            .collect::<Result<Vec<_>, CmeshError>>()?;
        for b in blocks {
            w.put_bytes(&b);
        }
    }
    #[cfg(not(feature = "rayon"))]
    {
        for l in local {
            write_tree(&mut w, &trees[l], first_tree + l as GlobalIdx, first_tree)?;
        }
    }
    Ok(w.into_bytes())
}

/// Inverse of [`pack_trees`].
pub(crate) fn unpack_trees(bytes: &[u8]) -> Result<Vec<TreeRecord>, CmeshError> {
    let mut r = WireReader::open(bytes, kind::TREES)?;
    let count = r.get::<WireLen>()?.get();
    let cap = (count as usize).min(r.remaining() / size_of::<WireTree>());
    let mut out = Vec::with_capacity(cap);
    for _ in 0..count {
        out.push(read_tree(&mut r)?);
    }
    r.finish()?;
    Ok(out)
}
