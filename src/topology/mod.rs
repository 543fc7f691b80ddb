//! Topological vocabulary of the coarse mesh.
//!
//! - [`eclass`]: tree classes and their vertex/face tables,
//! - [`orientation`]: how two joined faces are aligned,
//! - [`tree`]: building-state and committed tree records, face neighbours.

pub mod eclass;
pub mod orientation;
pub mod tree;

pub use eclass::TreeClass;
pub use orientation::FaceOrientation;
pub use tree::{FaceNeighbor, GlobalIdx, LocalIdx};
