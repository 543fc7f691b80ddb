//! Per-tree data carried by the coarse mesh.

pub mod attributes;

pub use attributes::{AttrKey, AttributeId, OwnerId, TreeAttributes};
