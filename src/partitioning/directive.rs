//! Target distributions a derived mesh can be asked to realise.

use crate::partitioning::table::PartitionTable;
use crate::topology::eclass::TreeClass;
use std::fmt;
use std::sync::Arc;

/// Refinement scheme the partitioned mesh will be used with. The coarse
/// mesh only asks whether the scheme can handle a tree class.
pub trait ElementScheme: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn supports(&self, class: TreeClass) -> bool;
}

/// Scheme supporting every tree class.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultScheme;

impl ElementScheme for DefaultScheme {
    fn name(&self) -> &str {
        "default"
    }
    fn supports(&self, _class: TreeClass) -> bool {
        true
    }
}

/// How trees are to be distributed when a derived mesh commits.
#[derive(Clone, Debug)]
pub enum PartitionDirective {
    /// Even split by tree count. `allow_for_coarsening` is kept for the
    /// forest layer; at tree granularity it does not move range boundaries.
    Uniform {
        allow_for_coarsening: bool,
        scheme: Arc<dyn ElementScheme>,
    },
    /// Explicit target offsets, one range per process.
    Offsets(PartitionTable),
    /// Per-tree costs of the source trees held by this process.
    Weighted(Vec<f64>),
}

impl PartitionDirective {
    /// Uniform split with the [`DefaultScheme`].
    pub fn uniform() -> Self {
        PartitionDirective::Uniform {
            allow_for_coarsening: false,
            scheme: Arc::new(DefaultScheme),
        }
    }

    pub fn scheme(&self) -> Option<&Arc<dyn ElementScheme>> {
        match self {
            PartitionDirective::Uniform { scheme, .. } => Some(scheme),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PartitionDirective::Uniform { .. } => "uniform",
            PartitionDirective::Offsets(_) => "offsets",
            PartitionDirective::Weighted(_) => "weighted",
        }
    }
}
