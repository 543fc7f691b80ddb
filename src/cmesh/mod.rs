//! The coarse mesh: trees, joins, attributes and geometries, distributed over
//! the processes of a communicator.
//!
//! A [`Cmesh`] starts in the *building* state, where trees, attributes and
//! joins can be added freely, and becomes immutable and globally consistent
//! with [`Cmesh::commit`]. Every accessor checks the state first and reports
//! a typed error when called in the wrong one.
//!
//! ```text
//! building ──commit──▶ committing ──▶ committed
//!                           │
//!                           └──────▶ failed (keeps the error)
//! ```

mod commit;
mod derive;
mod partition;
pub(crate) mod record;
mod replicate;

use crate::data::attributes::{AttrKey, AttributeId, OwnerId};
use crate::geometry::{Geometry, GeometryId, GeometryRegistry, TreeView};
use crate::mesh_error::CmeshError;
use crate::partitioning::{Layout, PartitionDirective, PartitionTable};
use crate::topology::eclass::TreeClass;
use crate::topology::orientation::FaceOrientation;
use crate::topology::tree::{FaceNeighbor, GlobalIdx, JoinDecl, LocalIdx, Tree, TreeDraft};
use bytemuck::Pod;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle state of a [`Cmesh`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CmeshState {
    Building,
    Committing,
    Committed,
    /// Terminal; the mesh can only report why it failed.
    Failed(CmeshError),
}

/// What the last commit moved between processes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    pub trees_sent: u64,
    pub trees_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Trees this process already held and copied into the new table.
    pub trees_copied_locally: u64,
}

impl TransferStats {
    /// True if nothing crossed a process boundary.
    pub fn is_local_only(&self) -> bool {
        self.trees_sent == 0
            && self.trees_received == 0
            && self.messages_sent == 0
            && self.messages_received == 0
    }
}

/// Back-reference of a derived mesh to the committed mesh it reads from.
#[derive(Debug)]
pub(crate) struct Derivation {
    pub(crate) source: Arc<Cmesh>,
    pub(crate) directive: Option<PartitionDirective>,
}

#[derive(Debug)]
pub struct Cmesh {
    state: CmeshState,
    // building
    drafts: Vec<TreeDraft>,
    joins: Vec<JoinDecl>,
    /// `(tree, face)` → first declaration touching that face.
    join_index: HashMap<(LocalIdx, u8), usize>,
    derivation: Option<Derivation>,
    // committed
    trees: Vec<Tree>,
    layout: Layout,
    first_tree: GlobalIdx,
    num_trees: GlobalIdx,
    stats: TransferStats,
    geometries: GeometryRegistry,
}

impl Default for Cmesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Cmesh {
    /// An empty mesh in the building state.
    pub fn new() -> Self {
        Self {
            state: CmeshState::Building,
            drafts: Vec::new(),
            joins: Vec::new(),
            join_index: HashMap::new(),
            derivation: None,
            trees: Vec::new(),
            layout: Layout::Replicated,
            first_tree: 0,
            num_trees: 0,
            stats: TransferStats::default(),
            geometries: GeometryRegistry::default(),
        }
    }

    /// Release the mesh. Consuming `self` makes a second destroy impossible;
    /// a derived mesh keeps its source alive until its own commit is done.
    pub fn destroy(self) {
        log::debug!(
            "destroying {} cmesh with {} local trees",
            self.state_name(),
            self.trees.len().max(self.drafts.len())
        );
    }

    // ----- state guards ----------------------------------------------------

    fn state_name(&self) -> &'static str {
        match self.state {
            CmeshState::Building => "building",
            CmeshState::Committing => "committing",
            CmeshState::Committed => "committed",
            CmeshState::Failed(_) => "failed",
        }
    }

    fn ensure_building(&self) -> Result<(), CmeshError> {
        match &self.state {
            CmeshState::Building => Ok(()),
            CmeshState::Failed(e) => Err(CmeshError::MeshFailed(Box::new(e.clone()))),
            _ => Err(CmeshError::AlreadyCommitted),
        }
    }

    fn ensure_trees_mutable(&self) -> Result<(), CmeshError> {
        self.ensure_building()?;
        if self.derivation.is_some() {
            return Err(CmeshError::DerivedTreeMutation);
        }
        Ok(())
    }

    fn ensure_committed(&self) -> Result<(), CmeshError> {
        match &self.state {
            CmeshState::Committed => Ok(()),
            CmeshState::Failed(e) => Err(CmeshError::MeshFailed(Box::new(e.clone()))),
            _ => Err(CmeshError::NotCommitted),
        }
    }

    fn draft(&self, tree: LocalIdx) -> Result<&TreeDraft, CmeshError> {
        self.drafts.get(tree).ok_or(CmeshError::TreeOutOfRange {
            tree: tree as u64,
            num_trees: self.drafts.len() as u64,
        })
    }

    fn draft_mut(&mut self, tree: LocalIdx) -> Result<&mut TreeDraft, CmeshError> {
        let n = self.drafts.len();
        self.drafts.get_mut(tree).ok_or(CmeshError::TreeOutOfRange {
            tree: tree as u64,
            num_trees: n as u64,
        })
    }

    // ----- build API -------------------------------------------------------

    /// Append a tree of `class`; returns its local index.
    pub fn add_tree(&mut self, class: TreeClass) -> Result<LocalIdx, CmeshError> {
        self.ensure_trees_mutable()?;
        self.drafts.push(TreeDraft {
            class: Some(class),
            ..TreeDraft::default()
        });
        Ok(self.drafts.len() - 1)
    }

    /// Set the class of `tree`. Indices past the end grow the table with
    /// class-less trees, which must be given a class before commit.
    pub fn set_tree_class(&mut self, tree: LocalIdx, class: TreeClass) -> Result<(), CmeshError> {
        self.ensure_trees_mutable()?;
        if tree >= self.drafts.len() {
            self.drafts.resize_with(tree + 1, TreeDraft::default);
        }
        self.drafts[tree].class = Some(class);
        Ok(())
    }

    /// Use the registered geometry `geometry` for `tree`.
    pub fn set_tree_geometry(&mut self, tree: LocalIdx, geometry: GeometryId) -> Result<(), CmeshError> {
        self.ensure_trees_mutable()?;
        self.geometries.get(geometry)?;
        self.draft_mut(tree)?.geometry = Some(geometry);
        Ok(())
    }

    /// Store the corner coordinates of `tree` (3 per vertex).
    pub fn set_vertices(&mut self, tree: LocalIdx, coords: &[f64]) -> Result<(), CmeshError> {
        self.ensure_trees_mutable()?;
        if coords.len() % 3 != 0 {
            return Err(CmeshError::InvalidVertices {
                tree,
                len: coords.len(),
            });
        }
        self.draft_mut(tree)?
            .attributes
            .set(AttributeId::VERTICES, bytemuck::cast_slice(coords))
    }

    /// Store a copy of `bytes` under `(owner, key)` for `tree`, replacing any
    /// previous value.
    pub fn set_attribute(
        &mut self,
        tree: LocalIdx,
        owner: OwnerId,
        key: AttrKey,
        bytes: &[u8],
    ) -> Result<(), CmeshError> {
        self.ensure_trees_mutable()?;
        self.draft_mut(tree)?
            .attributes
            .set(AttributeId::new(owner, key), bytes)
    }

    pub fn set_attribute_pod<T: Pod>(
        &mut self,
        tree: LocalIdx,
        owner: OwnerId,
        key: AttrKey,
        value: &T,
    ) -> Result<(), CmeshError> {
        self.set_attribute(tree, owner, key, bytemuck::bytes_of(value))
    }

    /// Declare that face `face_a` of `tree_a` meets face `face_b` of
    /// `tree_b`; `orientation` maps a's face numbering onto b's.
    ///
    /// Both halves are recorded. Declaring the same join again (in either
    /// direction) is accepted; its orientation is checked against the first
    /// declaration at commit.
    ///
    /// # Errors
    /// - `TreeOutOfRange` if either tree does not exist yet,
    /// - `FaceOutOfRange` / `OrientationOutOfRange` when the class is
    ///   already known and rules the value out,
    /// - `DuplicateJoin` if either face is already joined to another face.
    pub fn set_join(
        &mut self,
        tree_a: LocalIdx,
        face_a: u8,
        tree_b: LocalIdx,
        face_b: u8,
        orientation: u8,
    ) -> Result<(), CmeshError> {
        self.ensure_trees_mutable()?;
        let decl = JoinDecl {
            tree_a,
            face_a,
            tree_b,
            face_b,
            orientation: FaceOrientation(orientation),
        };
        for (tree, face) in [(tree_a, face_a), (tree_b, face_b)] {
            let Some(class) = self.draft(tree)?.class else {
                continue;
            };
            let num_faces = class.num_faces();
            if face >= num_faces {
                return Err(CmeshError::FaceOutOfRange {
                    tree: tree as u64,
                    face,
                    num_faces,
                });
            }
            if let Some(fc) = class.face_class(face) {
                if !decl.orientation.is_valid_for(fc) {
                    return Err(CmeshError::OrientationOutOfRange {
                        tree: tree as u64,
                        face,
                        orientation,
                    });
                }
            }
        }
        for (tree, face) in [(tree_a, face_a), (tree_b, face_b)] {
            if let Some(&i) = self.join_index.get(&(tree, face)) {
                if !self.joins[i].same_faces(&decl) {
                    return Err(CmeshError::DuplicateJoin { tree, face });
                }
            }
        }
        let i = self.joins.len();
        self.joins.push(decl);
        self.join_index.entry((tree_a, face_a)).or_insert(i);
        self.join_index.entry((tree_b, face_b)).or_insert(i);
        Ok(())
    }

    /// Add a geometry capability to this mesh's registry.
    pub fn register_geometry(&mut self, geometry: Arc<dyn Geometry>) -> Result<GeometryId, CmeshError> {
        self.ensure_building()?;
        self.geometries.register(geometry)
    }

    /// Number of trees added so far (building state).
    pub fn num_draft_trees(&self) -> usize {
        self.drafts.len()
    }

    // ----- read API --------------------------------------------------------

    pub fn is_committed(&self) -> bool {
        self.state == CmeshState::Committed
    }

    pub fn state(&self) -> &CmeshState {
        &self.state
    }

    /// Why the commit failed, if it did.
    pub fn failure(&self) -> Option<&CmeshError> {
        match &self.state {
            CmeshState::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn geometries(&self) -> &GeometryRegistry {
        &self.geometries
    }

    /// Committed tree at local index `tree`.
    pub fn tree(&self, tree: LocalIdx) -> Result<&Tree, CmeshError> {
        self.ensure_committed()?;
        self.trees.get(tree).ok_or(CmeshError::TreeOutOfRange {
            tree: tree as u64,
            num_trees: self.trees.len() as u64,
        })
    }

    /// Local trees with their global indices.
    pub fn trees(&self) -> Result<impl Iterator<Item = (GlobalIdx, &Tree)> + '_, CmeshError> {
        self.ensure_committed()?;
        let first = self.first_tree;
        Ok(self
            .trees
            .iter()
            .enumerate()
            .map(move |(i, t)| (first + i as GlobalIdx, t)))
    }

    pub fn tree_class(&self, tree: LocalIdx) -> Result<TreeClass, CmeshError> {
        Ok(self.tree(tree)?.class)
    }

    /// Corner coordinates of `tree`; empty if none were set.
    pub fn tree_vertices(&self, tree: LocalIdx) -> Result<&[f64], CmeshError> {
        let t = self.tree(tree)?;
        match t.attributes.get_slice::<f64>(AttributeId::VERTICES) {
            Some(v) => v,
            None => Ok(&[]),
        }
    }

    /// The bytes stored under `(owner, key)` for `tree`.
    pub fn attribute(&self, tree: LocalIdx, owner: OwnerId, key: AttrKey) -> Result<&[u8], CmeshError> {
        self.tree(tree)?
            .attributes
            .get(AttributeId::new(owner, key))
            .ok_or(CmeshError::AttributeNotFound { tree, owner, key })
    }

    /// Read an attribute as a single `T`.
    pub fn attribute_as<T: Pod>(&self, tree: LocalIdx, owner: OwnerId, key: AttrKey) -> Result<T, CmeshError> {
        self.tree(tree)?
            .attributes
            .get_pod(AttributeId::new(owner, key))
            .unwrap_or(Err(CmeshError::AttributeNotFound { tree, owner, key }))
    }

    /// View an attribute as a slice of `T`.
    pub fn attribute_slice<T: Pod>(
        &self,
        tree: LocalIdx,
        owner: OwnerId,
        key: AttrKey,
    ) -> Result<&[T], CmeshError> {
        self.tree(tree)?
            .attributes
            .get_slice(AttributeId::new(owner, key))
            .unwrap_or(Err(CmeshError::AttributeNotFound { tree, owner, key }))
    }

    pub fn tree_geometry(&self, tree: LocalIdx) -> Result<&Arc<dyn Geometry>, CmeshError> {
        let id = self.tree(tree)?.geometry;
        self.geometries.get(id)
    }

    /// What lies across `face` of local tree `tree`.
    pub fn face_neighbor(&self, tree: LocalIdx, face: u8) -> Result<FaceNeighbor, CmeshError> {
        let t = self.tree(tree)?;
        t.faces
            .get(face as usize)
            .copied()
            .ok_or(CmeshError::FaceOutOfRange {
                tree: tree as u64,
                face,
                num_faces: t.class.num_faces(),
            })
    }

    /// Map `ref_coords` of local tree `tree` to world coordinates.
    pub fn evaluate_geometry(
        &self,
        tree: LocalIdx,
        ref_coords: &[f64],
        out: &mut [f64; 3],
    ) -> Result<(), CmeshError> {
        let t = self.tree(tree)?;
        let view = TreeView {
            global: self.first_tree + tree as GlobalIdx,
            class: t.class,
            vertices: self.tree_vertices(tree)?,
        };
        self.geometries.get(t.geometry)?.evaluate(view, ref_coords, out)
    }

    pub fn num_local_trees(&self) -> Result<usize, CmeshError> {
        self.ensure_committed()?;
        Ok(self.trees.len())
    }

    /// Number of trees over all processes.
    pub fn num_trees(&self) -> Result<GlobalIdx, CmeshError> {
        self.ensure_committed()?;
        Ok(self.num_trees)
    }

    /// Global index of this process's first tree.
    pub fn first_tree(&self) -> Result<GlobalIdx, CmeshError> {
        self.ensure_committed()?;
        Ok(self.first_tree)
    }

    pub fn global_id(&self, tree: LocalIdx) -> Result<GlobalIdx, CmeshError> {
        self.tree(tree)?;
        Ok(self.first_tree + tree as GlobalIdx)
    }

    /// Local index of global tree `global`, if this process holds it.
    pub fn local_id(&self, global: GlobalIdx) -> Result<LocalIdx, CmeshError> {
        self.ensure_committed()?;
        global
            .checked_sub(self.first_tree)
            .filter(|&l| l < self.trees.len() as GlobalIdx)
            .map(|l| l as LocalIdx)
            .ok_or(CmeshError::TreeOutOfRange {
                tree: global,
                num_trees: self.num_trees,
            })
    }

    pub fn layout(&self) -> Result<&Layout, CmeshError> {
        self.ensure_committed()?;
        Ok(&self.layout)
    }

    /// Offsets of a partitioned mesh; `None` when replicated.
    pub fn partition_table(&self) -> Result<Option<&PartitionTable>, CmeshError> {
        Ok(match self.layout()? {
            Layout::Replicated => None,
            Layout::Partitioned(t) => Some(t),
        })
    }

    pub fn transfer_stats(&self) -> Result<TransferStats, CmeshError> {
        self.ensure_committed()?;
        Ok(self.stats)
    }

    /// True if both meshes are committed and hold the same trees at the same
    /// global indices, with equal classes, geometry names, faces and
    /// attributes.
    pub fn content_eq(&self, other: &Cmesh) -> bool {
        if !(self.is_committed() && other.is_committed()) {
            return false;
        }
        let geometry_name = |m: &Cmesh, id: GeometryId| m.geometries.get(id).ok().map(|g| g.name().to_owned());
        self.first_tree == other.first_tree
            && self.num_trees == other.num_trees
            && self.trees.len() == other.trees.len()
            && self.trees.iter().zip(&other.trees).all(|(a, b)| {
                a.class == b.class
                    && a.faces == b.faces
                    && a.attributes.iter().eq(b.attributes.iter())
                    && geometry_name(self, a.geometry) == geometry_name(other, b.geometry)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_guards() {
        let mut m = Cmesh::new();
        let t = m.add_tree(TreeClass::Quad).unwrap();
        assert_eq!(m.tree_class(t), Err(CmeshError::NotCommitted));
        assert_eq!(m.num_local_trees(), Err(CmeshError::NotCommitted));
        assert!(matches!(
            m.set_vertices(t, &[0.0; 4]),
            Err(CmeshError::InvalidVertices { len: 4, .. })
        ));
        assert!(matches!(
            m.set_attribute(5, 1, 1, b"x"),
            Err(CmeshError::TreeOutOfRange { tree: 5, num_trees: 1 })
        ));
    }

    #[test]
    fn join_range_checks() {
        let mut m = Cmesh::new();
        m.add_tree(TreeClass::Quad).unwrap();
        m.add_tree(TreeClass::Quad).unwrap();
        assert!(matches!(
            m.set_join(0, 1, 2, 0, 0),
            Err(CmeshError::TreeOutOfRange { tree: 2, .. })
        ));
        assert!(matches!(
            m.set_join(0, 4, 1, 0, 0),
            Err(CmeshError::FaceOutOfRange { face: 4, num_faces: 4, .. })
        ));
        assert!(matches!(
            m.set_join(0, 1, 1, 0, 2),
            Err(CmeshError::OrientationOutOfRange { orientation: 2, .. })
        ));
    }

    #[test]
    fn duplicate_join_fails_fast() {
        let mut m = Cmesh::new();
        for _ in 0..3 {
            m.add_tree(TreeClass::Hex).unwrap();
        }
        m.set_join(0, 1, 1, 0, 0).unwrap();
        // same faces, declared from the other side
        m.set_join(1, 0, 0, 1, 0).unwrap();
        assert_eq!(
            m.set_join(0, 1, 2, 0, 0),
            Err(CmeshError::DuplicateJoin { tree: 0, face: 1 })
        );
        assert_eq!(
            m.set_join(2, 3, 1, 0, 0),
            Err(CmeshError::DuplicateJoin { tree: 1, face: 0 })
        );
    }

    #[test]
    fn set_tree_class_grows() {
        let mut m = Cmesh::new();
        m.set_tree_class(2, TreeClass::Tet).unwrap();
        assert_eq!(m.num_draft_trees(), 3);
        assert_eq!(m.drafts[0].class, None);
        assert_eq!(m.drafts[2].class, Some(TreeClass::Tet));
    }

    #[test]
    fn derived_mesh_releases_source() {
        let mut src = Cmesh::new();
        src.add_tree(TreeClass::Line).unwrap();
        src.state = CmeshState::Committed;
        let src = Arc::new(src);
        let derived = Cmesh::derive(Arc::clone(&src)).unwrap();
        assert_eq!(Arc::strong_count(&src), 2);
        derived.destroy();
        assert_eq!(Arc::strong_count(&src), 1);
    }

    #[test]
    fn unknown_geometry_rejected() {
        let mut m = Cmesh::new();
        m.add_tree(TreeClass::Line).unwrap();
        assert_eq!(
            m.set_tree_geometry(0, GeometryId(3)),
            Err(CmeshError::UnknownGeometry(3))
        );
    }
}
