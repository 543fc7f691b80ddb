//! CmeshError: unified error type for the coarse-mesh public APIs.
//!
//! Every fallible operation returns `Result<_, CmeshError>`. Variants fall
//! into three families, see [`ErrorKind`]:
//! - *usage* errors are caller defects reported immediately and never retried,
//! - *validation* errors are detected during `commit` and leave the mesh in
//!   the terminal failed state,
//! - *transfer* errors are communication failures that abort the whole
//!   collective operation.

use crate::data::attributes::{AttrKey, OwnerId};
use crate::topology::eclass::TreeClass;
use crate::topology::tree::{GlobalIdx, LocalIdx};
use thiserror::Error;

/// Coarse classification of a [`CmeshError`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Programmer/caller defect (wrong state, out-of-range index, ...).
    Usage,
    /// The mesh content is not valid; raised by `commit`.
    Validation,
    /// A process-level communication failure or a corrupt message.
    Transfer,
}

/// Unified error type for coarse-mesh operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CmeshError {
    // ----- usage -----------------------------------------------------------
    /// A read accessor was called before the mesh was committed.
    #[error("mesh is not committed")]
    NotCommitted,
    /// A mutation or a second commit was attempted on a committed mesh.
    #[error("mesh is already committed")]
    AlreadyCommitted,
    /// The mesh previously failed to commit and can only be inspected.
    #[error("mesh failed to commit and is unusable: {0}")]
    MeshFailed(Box<CmeshError>),
    /// `derive` (or a derived commit) found its source uncommitted.
    #[error("derivation source is not committed")]
    SourceNotCommitted,
    /// A partition directive was set on a mesh that has no derivation source.
    #[error("partition directives require a derived mesh")]
    NotDerived,
    /// Trees cannot be added or modified on a derived mesh.
    #[error("trees of a derived mesh are taken from its source and cannot be modified")]
    DerivedTreeMutation,
    /// Tree index outside the currently known range.
    #[error("tree {tree} out of range (mesh has {num_trees} trees)")]
    TreeOutOfRange { tree: u64, num_trees: u64 },
    /// Face index outside the face range of the tree's class.
    #[error("face {face} out of range for tree {tree} ({num_faces} faces)")]
    FaceOutOfRange { tree: u64, face: u8, num_faces: u8 },
    /// Orientation value outside the range permitted by the face shape.
    #[error("orientation {orientation} out of range for face {face} of tree {tree}")]
    OrientationOutOfRange { tree: u64, face: u8, orientation: u8 },
    /// A face already carries a different join.
    #[error("face {face} of tree {tree} already has a different join")]
    DuplicateJoin { tree: LocalIdx, face: u8 },
    /// Vertex coordinates are not a whole number of 3D points.
    #[error("tree {tree}: {len} coordinates are not a multiple of 3")]
    InvalidVertices { tree: LocalIdx, len: usize },
    /// Geometry index not present in the registry.
    #[error("geometry {0} is not registered")]
    UnknownGeometry(usize),
    /// Another geometry with this name is already registered.
    #[error("a different geometry named `{0}` is already registered")]
    DuplicateGeometry(String),
    /// No attribute for this `(tree, owner, key)`.
    #[error("tree {tree} has no attribute (owner {owner}, key {key})")]
    AttributeNotFound { tree: LocalIdx, owner: OwnerId, key: AttrKey },
    /// Attribute payloads are limited to `u32::MAX` bytes.
    #[error("attribute of {0} bytes exceeds the supported size")]
    AttributeTooLarge(usize),
    /// A typed read asked for a layout the stored bytes do not have.
    #[error("attribute (owner {owner}, key {key}) has {len} bytes, incompatible with the requested type")]
    AttributeTypeMismatch { owner: OwnerId, key: AttrKey, len: usize },
    /// Root rank of a collective is not part of the communicator.
    #[error("root rank {root} is outside a communicator of size {size}")]
    InvalidRoot { root: usize, size: usize },
    /// The source layout was built for a different number of processes.
    #[error("source is distributed over {expected} processes, communicator has {actual}")]
    CommSizeMismatch { expected: usize, actual: usize },
    /// Malformed partition directive (offsets, weights).
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    // ----- validation ------------------------------------------------------
    /// A tree was never given a class.
    #[error("tree {0} has no class")]
    MissingClass(GlobalIdx),
    /// A join cannot be made symmetric.
    #[error("inconsistent join at face {face} of tree {tree}: {reason}")]
    InconsistentJoin { tree: GlobalIdx, face: u8, reason: String },
    /// The global tree count is zero.
    #[error("mesh has no trees on any process")]
    EmptyMesh,
    /// A tree has no resolvable geometry.
    #[error("tree {0} has no resolvable geometry")]
    MissingGeometry(GlobalIdx),
    /// Number of vertices does not match the tree class.
    #[error("tree {tree}: {got} vertices given, class needs {expected}")]
    VertexCountMismatch { tree: GlobalIdx, expected: usize, got: usize },
    /// Processes disagree on the content of a replicated mesh.
    #[error("replicated mesh differs across processes: {0}")]
    InconsistentReplication(String),
    /// The element scheme of the partition directive rejects a tree class.
    #[error("element scheme `{scheme}` does not support {class:?} (tree {tree})")]
    UnsupportedClass { tree: GlobalIdx, class: TreeClass, scheme: String },

    // ----- transfer --------------------------------------------------------
    /// Send or receive with `neighbor` failed.
    #[error("communication with rank {neighbor} failed: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// A received message could not be decoded.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

impl CmeshError {
    /// Which family of the error taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use CmeshError::*;
        match self {
            MissingClass(_)
            | InconsistentJoin { .. }
            | EmptyMesh
            | MissingGeometry(_)
            | VertexCountMismatch { .. }
            | InconsistentReplication(_)
            | UnsupportedClass { .. } => ErrorKind::Validation,
            CommError { .. } | MalformedRecord(_) => ErrorKind::Transfer,
            _ => ErrorKind::Usage,
        }
    }

    /// True for errors that put a committing mesh into the failed state.
    pub fn is_fatal_to_commit(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Transfer)
    }

    pub(crate) fn comm(neighbor: usize, reason: impl Into<String>) -> Self {
        CmeshError::CommError {
            neighbor,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CmeshError::MalformedRecord(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(CmeshError::NotCommitted.kind(), ErrorKind::Usage);
        assert_eq!(CmeshError::SourceNotCommitted.kind(), ErrorKind::Usage);
        assert_eq!(CmeshError::MissingClass(3).kind(), ErrorKind::Validation);
        assert_eq!(CmeshError::EmptyMesh.kind(), ErrorKind::Validation);
        assert_eq!(CmeshError::comm(1, "lost").kind(), ErrorKind::Transfer);
        assert_eq!(CmeshError::malformed("short").kind(), ErrorKind::Transfer);
        assert!(!CmeshError::DuplicateJoin { tree: 0, face: 1 }.is_fatal_to_commit());
        assert!(CmeshError::EmptyMesh.is_fatal_to_commit());
    }

    #[test]
    fn display_mentions_context() {
        let e = CmeshError::TreeOutOfRange {
            tree: 7,
            num_trees: 3,
        };
        assert_eq!(e.to_string(), "tree 7 out of range (mesh has 3 trees)");
        let e = CmeshError::MeshFailed(Box::new(CmeshError::EmptyMesh));
        assert!(e.to_string().contains("no trees"));
    }
}
