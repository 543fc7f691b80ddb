//! Derived meshes: a building-state mesh that takes its trees from a
//! committed source when it commits.

use super::{Cmesh, Derivation};
use crate::mesh_error::CmeshError;
use crate::partitioning::{ElementScheme, PartitionDirective, PartitionTable};
use crate::topology::tree::GlobalIdx;
use std::sync::Arc;

impl Cmesh {
    /// A new building-state mesh reading from `source`.
    ///
    /// Nothing is copied now; the derived mesh keeps `source` alive and pulls
    /// the trees it needs during its own commit. Without a partition
    /// directive the commit reproduces `source` with its layout unchanged.
    ///
    /// # Errors
    /// `SourceNotCommitted` unless `source` is committed.
    pub fn derive(source: Arc<Cmesh>) -> Result<Cmesh, CmeshError> {
        if !source.is_committed() {
            return Err(CmeshError::SourceNotCommitted);
        }
        let mut mesh = Cmesh::new();
        mesh.derivation = Some(Derivation {
            source,
            directive: None,
        });
        Ok(mesh)
    }

    /// The mesh this one is derived from, until its commit completes.
    pub fn source(&self) -> Option<&Arc<Cmesh>> {
        self.derivation.as_ref().map(|d| &d.source)
    }

    /// Realise `directive` at commit, replacing any earlier one.
    pub fn set_partition(&mut self, directive: PartitionDirective) -> Result<(), CmeshError> {
        self.ensure_building()?;
        let d = self.derivation.as_mut().ok_or(CmeshError::NotDerived)?;
        log::debug!("partition directive: {}", directive.label());
        d.directive = Some(directive);
        Ok(())
    }

    /// Split the source's trees evenly over the committing communicator.
    pub fn set_partition_uniform(
        &mut self,
        allow_for_coarsening: bool,
        scheme: Arc<dyn ElementScheme>,
    ) -> Result<(), CmeshError> {
        self.set_partition(PartitionDirective::Uniform {
            allow_for_coarsening,
            scheme,
        })
    }

    /// Give rank `r` the global trees `[offsets[r], offsets[r + 1])`.
    pub fn set_partition_offsets(&mut self, offsets: Vec<GlobalIdx>) -> Result<(), CmeshError> {
        let table = PartitionTable::from_offsets(offsets)?;
        self.set_partition(PartitionDirective::Offsets(table))
    }

    /// Balance per-tree costs; `weights[i]` belongs to the `i`-th source tree
    /// held by this process.
    pub fn set_partition_weighted(&mut self, weights: Vec<f64>) -> Result<(), CmeshError> {
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(CmeshError::InvalidPartition(format!("weight {w}")));
        }
        self.set_partition(PartitionDirective::Weighted(weights))
    }
}
