//! Geometry capabilities and the per-mesh registry.
//!
//! The coarse mesh does not know how trees are embedded in space; it only
//! stores, per tree, an index into a registry of [`Geometry`] capabilities
//! that map reference coordinates to world coordinates. Concrete mappings
//! (linear, curved, analytic) are supplied by the caller.

use crate::mesh_error::CmeshError;
use crate::topology::eclass::TreeClass;
use crate::topology::tree::GlobalIdx;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Index of a geometry in a mesh's [`GeometryRegistry`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GeometryId(pub u32);

impl GeometryId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a geometry gets to see of the tree it evaluates.
#[derive(Copy, Clone, Debug)]
pub struct TreeView<'a> {
    pub global: GlobalIdx,
    pub class: TreeClass,
    /// Corner coordinates, 3 per vertex; empty if none were set.
    pub vertices: &'a [f64],
}

/// Map from a tree's reference element to world coordinates.
pub trait Geometry: Send + Sync + fmt::Debug {
    /// Unique name; registries reject two different geometries with the
    /// same name.
    fn name(&self) -> &str;

    /// Dimension of the reference coordinates this geometry accepts.
    fn dimension(&self) -> u8;

    /// Evaluate the map at `ref_coords` (length `dimension()`), writing the
    /// three world coordinates into `out`.
    fn evaluate(
        &self,
        tree: TreeView<'_>,
        ref_coords: &[f64],
        out: &mut [f64; 3],
    ) -> Result<(), CmeshError>;
}

/// Ordered list of geometries, referenced by index from trees.
#[derive(Clone, Default)]
pub struct GeometryRegistry {
    entries: Vec<Arc<dyn Geometry>>,
}

impl fmt::Debug for GeometryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|g| g.name()))
            .finish()
    }
}

impl GeometryRegistry {
    /// Append `geometry` and return its index.
    ///
    /// Registering the very same capability again (same `Arc`) returns the
    /// existing index.
    ///
    /// # Errors
    /// `DuplicateGeometry` if a different capability with the same name is
    /// already present.
    pub fn register(&mut self, geometry: Arc<dyn Geometry>) -> Result<GeometryId, CmeshError> {
        if let Some((i, existing)) = self
            .entries
            .iter()
            .enumerate()
            .find(|(_, g)| g.name() == geometry.name())
        {
            return if Arc::ptr_eq(existing, &geometry) {
                Ok(GeometryId(i as u32))
            } else {
                Err(CmeshError::DuplicateGeometry(geometry.name().to_string()))
            };
        }
        let id = GeometryId(self.entries.len() as u32);
        log::debug!("registered geometry `{}` as {id}", geometry.name());
        self.entries.push(geometry);
        Ok(id)
    }

    /// Reuse every geometry of `source`, returning the index each one has in
    /// `self` (position `i` of the result is the new id of source id `i`).
    pub fn adopt(&mut self, source: &GeometryRegistry) -> Result<Vec<GeometryId>, CmeshError> {
        source
            .entries
            .iter()
            .map(|g| self.register(Arc::clone(g)))
            .collect()
    }

    pub fn get(&self, id: GeometryId) -> Result<&Arc<dyn Geometry>, CmeshError> {
        self.entries
            .get(id.index())
            .ok_or(CmeshError::UnknownGeometry(id.index()))
    }

    pub fn find(&self, name: &str) -> Option<GeometryId> {
        self.entries
            .iter()
            .position(|g| g.name() == name)
            .map(|i| GeometryId(i as u32))
    }

    /// The geometry every tree falls back to when exactly one is registered.
    pub fn sole(&self) -> Option<GeometryId> {
        (self.entries.len() == 1).then_some(GeometryId(0))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|g| g.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Shift(&'static str, f64);

    impl Geometry for Shift {
        fn name(&self) -> &str {
            self.0
        }
        fn dimension(&self) -> u8 {
            1
        }
        fn evaluate(
            &self,
            _tree: TreeView<'_>,
            ref_coords: &[f64],
            out: &mut [f64; 3],
        ) -> Result<(), CmeshError> {
            *out = [ref_coords[0] + self.1, 0.0, 0.0];
            Ok(())
        }
    }

    #[test]
    fn register_dedups_by_identity() {
        let mut reg = GeometryRegistry::default();
        let a: Arc<dyn Geometry> = Arc::new(Shift("a", 1.0));
        let b: Arc<dyn Geometry> = Arc::new(Shift("b", 2.0));
        assert_eq!(reg.register(a.clone()).unwrap(), GeometryId(0));
        assert_eq!(reg.register(b).unwrap(), GeometryId(1));
        assert_eq!(reg.register(a).unwrap(), GeometryId(0));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.sole(), None);

        let impostor: Arc<dyn Geometry> = Arc::new(Shift("a", 5.0));
        assert_eq!(
            reg.register(impostor),
            Err(CmeshError::DuplicateGeometry("a".into()))
        );
    }

    #[test]
    fn adopt_remaps_indices() {
        let a: Arc<dyn Geometry> = Arc::new(Shift("a", 1.0));
        let b: Arc<dyn Geometry> = Arc::new(Shift("b", 2.0));
        let mut source = GeometryRegistry::default();
        source.register(a.clone()).unwrap();
        source.register(b.clone()).unwrap();

        let mut derived = GeometryRegistry::default();
        derived.register(b).unwrap();
        let map = derived.adopt(&source).unwrap();
        assert_eq!(map, vec![GeometryId(1), GeometryId(0)]);
        assert_eq!(derived.find("a"), Some(GeometryId(1)));
        assert!(derived.get(GeometryId(2)).is_err());
    }
}
