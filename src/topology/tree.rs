//! Tree records of the coarse mesh.
//!
//! A tree lives in two shapes: [`TreeDraft`] while the mesh is being built
//! (class may still be missing, joins are kept aside as [`JoinDecl`]s) and
//! [`Tree`] once committed (class fixed, one [`FaceNeighbor`] per face).
//!
//! Neighbour references are indices, never pointers: a committed neighbour is
//! either a local index into the same process's tree table or the stable
//! global index of a tree owned by another process.

use crate::data::attributes::TreeAttributes;
use crate::geometry::GeometryId;
use crate::topology::eclass::TreeClass;
use crate::topology::orientation::FaceOrientation;
use serde::{Deserialize, Serialize};

/// Dense, 0-based, per-process tree index.
pub type LocalIdx = usize;
/// Dense, process-ordered, mesh-wide tree index.
pub type GlobalIdx = u64;

/// What lies across one face of a committed tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FaceNeighbor {
    /// The face is part of the domain boundary.
    Boundary,
    /// The neighbour is stored on this process.
    Local {
        tree: LocalIdx,
        face: u8,
        orientation: FaceOrientation,
    },
    /// The neighbour is owned by another process; resolving it is left to a
    /// ghost layer built on top of the coarse mesh.
    Remote {
        global: GlobalIdx,
        face: u8,
        orientation: FaceOrientation,
    },
}

impl FaceNeighbor {
    #[inline]
    pub fn is_boundary(&self) -> bool {
        matches!(self, FaceNeighbor::Boundary)
    }

    /// Face index and orientation on the other side, if any.
    #[inline]
    pub fn partner_face(&self) -> Option<(u8, FaceOrientation)> {
        match *self {
            FaceNeighbor::Boundary => None,
            FaceNeighbor::Local {
                face, orientation, ..
            }
            | FaceNeighbor::Remote {
                face, orientation, ..
            } => Some((face, orientation)),
        }
    }

    /// Global index of the neighbour, given this process's first tree.
    #[inline]
    pub fn global(&self, first_tree: GlobalIdx) -> Option<GlobalIdx> {
        match *self {
            FaceNeighbor::Boundary => None,
            FaceNeighbor::Local { tree, .. } => Some(first_tree + tree as GlobalIdx),
            FaceNeighbor::Remote { global, .. } => Some(global),
        }
    }

    /// Classify a neighbour given by global index against the local range
    /// `[first_tree, first_tree + num_local)`.
    #[inline]
    pub fn resolve(
        global: GlobalIdx,
        face: u8,
        orientation: FaceOrientation,
        first_tree: GlobalIdx,
        num_local: usize,
    ) -> Self {
        if global >= first_tree && global < first_tree + num_local as GlobalIdx {
            FaceNeighbor::Local {
                tree: (global - first_tree) as LocalIdx,
                face,
                orientation,
            }
        } else {
            FaceNeighbor::Remote {
                global,
                face,
                orientation,
            }
        }
    }
}

/// A join as declared through the build API: `(tree_a, face_a)` meets
/// `(tree_b, face_b)` and `orientation` maps a's face numbering onto b's.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct JoinDecl {
    pub tree_a: LocalIdx,
    pub face_a: u8,
    pub tree_b: LocalIdx,
    pub face_b: u8,
    pub orientation: FaceOrientation,
}

impl JoinDecl {
    /// True if `other` joins the same two faces, in either direction.
    /// Orientations are not compared; they are checked against each other at
    /// commit, once the face classes are known.
    #[inline]
    pub fn same_faces(&self, other: &JoinDecl) -> bool {
        let forward = self.tree_a == other.tree_a
            && self.face_a == other.face_a
            && self.tree_b == other.tree_b
            && self.face_b == other.face_b;
        let backward = self.tree_a == other.tree_b
            && self.face_a == other.face_b
            && self.tree_b == other.tree_a
            && self.face_b == other.face_a;
        forward || backward
    }
}

/// Building-state tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeDraft {
    pub class: Option<TreeClass>,
    pub geometry: Option<GeometryId>,
    pub attributes: TreeAttributes,
}

/// Committed, immutable tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    pub class: TreeClass,
    pub geometry: GeometryId,
    pub faces: Vec<FaceNeighbor>,
    pub attributes: TreeAttributes,
}

impl Tree {
    /// A tree of `class` with every face on the boundary.
    pub fn new(class: TreeClass, geometry: GeometryId, attributes: TreeAttributes) -> Self {
        Self {
            class,
            geometry,
            faces: vec![FaceNeighbor::Boundary; class.num_faces() as usize],
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_splits_local_and_remote() {
        let o = FaceOrientation(0);
        assert_eq!(
            FaceNeighbor::resolve(5, 1, o, 4, 2),
            FaceNeighbor::Local {
                tree: 1,
                face: 1,
                orientation: o
            }
        );
        assert_eq!(
            FaceNeighbor::resolve(6, 1, o, 4, 2),
            FaceNeighbor::Remote {
                global: 6,
                face: 1,
                orientation: o
            }
        );
        assert!(matches!(
            FaceNeighbor::resolve(3, 0, o, 4, 2),
            FaceNeighbor::Remote { global: 3, .. }
        ));
    }

    #[test]
    fn global_of_local_neighbor() {
        let n = FaceNeighbor::Local {
            tree: 2,
            face: 0,
            orientation: FaceOrientation(0),
        };
        assert_eq!(n.global(10), Some(12));
        assert_eq!(FaceNeighbor::Boundary.global(10), None);
    }

    #[test]
    fn join_relation_is_symmetric() {
        let a = JoinDecl {
            tree_a: 0,
            face_a: 1,
            tree_b: 1,
            face_b: 0,
            orientation: FaceOrientation(0),
        };
        let b = JoinDecl {
            tree_a: 1,
            face_a: 0,
            tree_b: 0,
            face_b: 1,
            orientation: FaceOrientation(0),
        };
        assert!(a.same_faces(&b));
        let c = JoinDecl { tree_b: 2, ..b };
        assert!(!a.same_faces(&c));
    }

    #[test]
    fn new_tree_is_all_boundary() {
        let t = Tree::new(TreeClass::Prism, GeometryId(0), TreeAttributes::default());
        assert_eq!(t.faces.len(), 5);
        assert!(t.faces.iter().all(FaceNeighbor::is_boundary));
    }
}
