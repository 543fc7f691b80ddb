//! Contiguous-range partitioning of the global tree ordering.
//!
//! - [`table`]: offsets of the per-process ranges (uniform, explicit, weighted),
//! - [`schedule`]: which ranges move between which ranks,
//! - [`directive`]: what a derived mesh is asked to realise.

pub mod directive;
pub mod schedule;
pub mod table;

pub use directive::{DefaultScheme, ElementScheme, PartitionDirective};
pub use schedule::TransferSchedule;
pub use table::{Layout, PartitionTable};
