#![cfg_attr(docsrs, feature(doc_cfg))]
//! # coarse-mesh
//!
//! coarse-mesh manages a distributed *coarse mesh*: the trees (coarsest
//! elements) of an adaptive forest, each with a topological class, a
//! geometry, user attributes and face connections, spread over the processes
//! of a communicator.
//!
//! ## Features
//! - Two-phase lifecycle: build freely, then [`Cmesh::commit`] into an
//!   immutable, globally consistent mesh
//! - Compact per-tree attribute store keyed by `(owner, key)`, packed for
//!   transfer without per-attribute framing
//! - Contiguous-range partitioning (uniform, explicit offsets, weighted) with
//!   a locally computed send/receive schedule
//! - Pluggable communication backends (`NoComm`, in-process `RayonComm`,
//!   `MpiComm` behind `mpi-support`)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! coarse-mesh = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon", "check-invariants"]
//! ```
//!
//! A replicated mesh is built identically on every process (or on one
//! process followed by [`Cmesh::broadcast_from`]) and committed; a
//! partitioned mesh is obtained by deriving from it:
//!
//! ```ignore
//! let mut mesh = Cmesh::new();
//! let t = mesh.add_tree(TreeClass::Hex)?;
//! mesh.set_vertices(t, &coords)?;
//! mesh.register_geometry(geometry)?;
//! mesh.commit(&comm)?;
//!
//! let mut part = Cmesh::derive(Arc::new(mesh))?;
//! part.set_partition_uniform(false, Arc::new(DefaultScheme))?;
//! part.commit(&comm)?;
//! ```

pub mod algs;
pub mod cmesh;
pub mod data;
pub mod debug_invariants;
pub mod geometry;
pub mod mesh_error;
pub mod partitioning;
pub mod topology;

pub use cmesh::Cmesh;
pub use debug_invariants::DebugInvariants;
pub use mesh_error::CmeshError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    pub use crate::cmesh::{Cmesh, CmeshState, TransferStats};
    pub use crate::data::attributes::{AttrKey, AttributeId, CMESH_OWNER, OwnerId, keys};
    pub use crate::geometry::{Geometry, GeometryId, TreeView};
    pub use crate::mesh_error::{CmeshError, ErrorKind};
    pub use crate::partitioning::{
        DefaultScheme, ElementScheme, Layout, PartitionDirective, PartitionTable,
    };
    pub use crate::topology::eclass::TreeClass;
    pub use crate::topology::orientation::FaceOrientation;
    pub use crate::topology::tree::{FaceNeighbor, GlobalIdx, LocalIdx};
}
