//! `building → committed`: validation, global numbering and freezing.

use super::{Cmesh, CmeshState, TransferStats};
use crate::algs::collective::all_gather_u64;
use crate::algs::communicator::Communicator;
use crate::data::attributes::AttributeId;
use crate::debug_invariants::{DebugInvariants, validate_all};
use crate::mesh_error::CmeshError;
use crate::partitioning::Layout;
use crate::topology::eclass::TreeClass;
use crate::topology::orientation::FaceOrientation;
use crate::topology::tree::{FaceNeighbor, GlobalIdx, JoinDecl, Tree};

impl Cmesh {
    /// Validate the building-state content and freeze it.
    ///
    /// Collective: every process of `comm` must call `commit` on its
    /// counterpart mesh. A mesh without derivation source is committed as
    /// replicated (global index == local index on every process); a derived
    /// mesh runs the partitioner against its source.
    ///
    /// Validation and transfer errors leave the mesh in the terminal
    /// [`CmeshState::Failed`] state. Usage errors (wrong state, bad
    /// directive) leave it in the building state.
    pub fn commit<C: Communicator>(&mut self, comm: &C) -> Result<(), CmeshError> {
        self.ensure_building()?;
        self.state = CmeshState::Committing;
        let derivation = self.derivation.take();
        let result = match &derivation {
            Some(d) => self.commit_derived(d, comm),
            None => self.commit_replicated(comm),
        };
        match result {
            Ok(()) => {
                self.state = CmeshState::Committed;
                self.drafts = Vec::new();
                self.joins = Vec::new();
                self.join_index.clear();
                crate::debug_invariants!(self.validate_invariants(), "committed cmesh");
                log::debug!(
                    "[rank {}] committed: trees [{}, {}) of {}",
                    comm.rank(),
                    self.first_tree,
                    self.first_tree + self.trees.len() as GlobalIdx,
                    self.num_trees
                );
                Ok(())
            }
            Err(e) if e.is_fatal_to_commit() => {
                log::debug!("[rank {}] commit failed: {e}", comm.rank());
                self.state = CmeshState::Failed(e.clone());
                Err(e)
            }
            Err(e) => {
                self.derivation = derivation;
                self.state = CmeshState::Building;
                Err(e)
            }
        }
    }

    fn commit_replicated<C: Communicator>(&mut self, comm: &C) -> Result<(), CmeshError> {
        let counts = all_gather_u64(comm, self.drafts.len() as u64)?;
        if counts.iter().all(|&n| n == 0) {
            return Err(CmeshError::EmptyMesh);
        }
        if let Some((rank, n)) = counts
            .iter()
            .enumerate()
            .find(|&(_, &n)| n != self.drafts.len() as u64)
        {
            return Err(CmeshError::InconsistentReplication(format!(
                "rank {rank} has {n} trees, rank {} has {}",
                comm.rank(),
                self.drafts.len()
            )));
        }

        let mut resolved = Vec::with_capacity(self.drafts.len());
        for (i, draft) in self.drafts.iter().enumerate() {
            let g = i as GlobalIdx;
            let class = draft.class.ok_or(CmeshError::MissingClass(g))?;
            let geometry = draft
                .geometry
                .or_else(|| self.geometries.sole())
                .ok_or(CmeshError::MissingGeometry(g))?;
            check_vertex_count(g, class, draft.attributes.get(AttributeId::VERTICES))?;
            resolved.push((class, geometry));
        }

        let mut trees: Vec<Tree> = std::mem::take(&mut self.drafts)
            .into_iter()
            .zip(resolved)
            .map(|(draft, (class, geometry))| Tree::new(class, geometry, draft.attributes))
            .collect();
        for decl in &self.joins {
            apply_join(&mut trees, decl)?;
        }

        self.trees = trees;
        self.first_tree = 0;
        self.num_trees = self.trees.len() as GlobalIdx;
        self.layout = Layout::Replicated;
        self.stats = TransferStats::default();
        self.validate_invariants()
    }
}

/// A tree's vertices, if present, must match its class.
pub(super) fn check_vertex_count(
    tree: GlobalIdx,
    class: TreeClass,
    vertices: Option<&[u8]>,
) -> Result<(), CmeshError> {
    let Some(bytes) = vertices else {
        return Ok(());
    };
    let point = 3 * std::mem::size_of::<f64>();
    let expected = class.num_vertices();
    if bytes.len() % point != 0 || bytes.len() / point != expected {
        return Err(CmeshError::VertexCountMismatch {
            tree,
            expected,
            got: bytes.len() / point,
        });
    }
    Ok(())
}

fn join_error(tree: usize, face: u8, reason: impl Into<String>) -> CmeshError {
    CmeshError::InconsistentJoin {
        tree: tree as GlobalIdx,
        face,
        reason: reason.into(),
    }
}

/// Record both halves of `decl`; a half that is already set must agree.
fn apply_join(trees: &mut [Tree], decl: &JoinDecl) -> Result<(), CmeshError> {
    let JoinDecl {
        tree_a,
        face_a,
        tree_b,
        face_b,
        orientation,
    } = *decl;
    let class_a = trees[tree_a].class;
    let class_b = trees[tree_b].class;
    let fc_a = class_a
        .face_class(face_a)
        .ok_or_else(|| join_error(tree_a, face_a, format!("{class_a:?} has no face {face_a}")))?;
    let fc_b = class_b
        .face_class(face_b)
        .ok_or_else(|| join_error(tree_b, face_b, format!("{class_b:?} has no face {face_b}")))?;
    if fc_a != fc_b {
        return Err(join_error(
            tree_a,
            face_a,
            format!("{fc_a:?} face joined to {fc_b:?} face of tree {tree_b}"),
        ));
    }
    if !orientation.is_valid_for(fc_a) {
        return Err(join_error(
            tree_a,
            face_a,
            format!("orientation {} invalid for a {fc_a:?} face", orientation.get()),
        ));
    }
    if tree_a == tree_b && face_a == face_b {
        return Err(join_error(tree_a, face_a, "face joined to itself"));
    }

    let halves = [
        (tree_a, face_a, tree_b, face_b, orientation),
        (tree_b, face_b, tree_a, face_a, orientation.inverse(fc_a)),
    ];
    for (tree, face, other, other_face, o) in halves {
        let wanted = FaceNeighbor::Local {
            tree: other,
            face: other_face,
            orientation: o,
        };
        let slot = &mut trees[tree].faces[face as usize];
        match *slot {
            FaceNeighbor::Boundary => *slot = wanted,
            existing if existing == wanted => {}
            existing => {
                return Err(join_error(
                    tree,
                    face,
                    format!("declared as {wanted:?}, already joined as {existing:?}"),
                ));
            }
        }
    }
    Ok(())
}

/// Check the partner half of a local join.
fn check_partner(
    trees: &[Tree],
    first_tree: GlobalIdx,
    tree: usize,
    face: u8,
    other: usize,
    other_face: u8,
    orientation: FaceOrientation,
) -> Result<(), CmeshError> {
    let g = first_tree + tree as GlobalIdx;
    let err = |reason: String| CmeshError::InconsistentJoin {
        tree: g,
        face,
        reason,
    };
    let partner = trees
        .get(other)
        .ok_or_else(|| err(format!("neighbour {other} is not a local tree")))?;
    let fc = trees[tree]
        .class
        .face_class(face)
        .ok_or_else(|| err("face has no shape".into()))?;
    let back = FaceNeighbor::Local {
        tree,
        face,
        orientation: orientation.inverse(fc),
    };
    match partner.faces.get(other_face as usize) {
        Some(n) if *n == back => Ok(()),
        Some(n) => Err(err(format!("partner face {other_face} of {other} points to {n:?}"))),
        None => Err(err(format!("partner {other} has no face {other_face}"))),
    }
}

impl DebugInvariants for Cmesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Cmesh");
    }

    /// Structural checks of the committed tables: face counts, geometry
    /// ids, local join symmetry, remote neighbours outside the local range,
    /// attribute stores.
    fn validate_invariants(&self) -> Result<(), CmeshError> {
        let local = self.first_tree..self.first_tree + self.trees.len() as GlobalIdx;
        if local.end > self.num_trees {
            return Err(CmeshError::malformed(format!(
                "local range {local:?} exceeds {} trees",
                self.num_trees
            )));
        }
        for (i, t) in self.trees.iter().enumerate() {
            let g = self.first_tree + i as GlobalIdx;
            if t.faces.len() != t.class.num_faces() as usize {
                return Err(CmeshError::InconsistentJoin {
                    tree: g,
                    face: 0,
                    reason: format!("{} face slots for {:?}", t.faces.len(), t.class),
                });
            }
            if self.geometries.get(t.geometry).is_err() {
                return Err(CmeshError::MissingGeometry(g));
            }
            for (f, n) in t.faces.iter().enumerate() {
                let f = f as u8;
                match *n {
                    FaceNeighbor::Boundary => {}
                    FaceNeighbor::Local {
                        tree,
                        face,
                        orientation,
                    } => check_partner(&self.trees, self.first_tree, i, f, tree, face, orientation)?,
                    FaceNeighbor::Remote { global, .. } => {
                        if global >= self.num_trees || local.contains(&global) {
                            return Err(CmeshError::InconsistentJoin {
                                tree: g,
                                face: f,
                                reason: format!("remote neighbour {global} misclassified"),
                            });
                        }
                    }
                }
            }
        }
        validate_all(self.trees.iter().map(|t| &t.attributes))
    }
}
