//! Contiguous distribution of global tree indices over processes.
//!
//! A [`PartitionTable`] stores `P + 1` offsets: process `r` owns the
//! half-open range `[offsets[r], offsets[r + 1])`. Offsets start at 0, never
//! decrease and end at the global tree count, so the ranges cover `[0, T)`
//! exactly and are ordered by rank.

use crate::mesh_error::CmeshError;
use crate::topology::tree::GlobalIdx;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PartitionTable {
    offsets: Vec<GlobalIdx>,
}

impl PartitionTable {
    /// Even split of `num_trees` over `num_procs`: rank `r` gets
    /// `floor(T/P)` trees plus one if `r < T mod P`.
    pub fn uniform(num_trees: GlobalIdx, num_procs: usize) -> Result<Self, CmeshError> {
        if num_procs == 0 {
            return Err(CmeshError::InvalidPartition("zero processes".into()));
        }
        let p = num_procs as GlobalIdx;
        let (base, extra) = (num_trees / p, num_trees % p);
        let offsets = (0..=p).map(|r| r * base + r.min(extra)).collect();
        Ok(Self { offsets })
    }

    /// Table from explicit offsets.
    ///
    /// # Errors
    /// `InvalidPartition` unless there are at least two offsets, the first is
    /// zero and they never decrease.
    pub fn from_offsets(offsets: Vec<GlobalIdx>) -> Result<Self, CmeshError> {
        if offsets.len() < 2 {
            return Err(CmeshError::InvalidPartition(format!(
                "{} offsets given, need at least 2",
                offsets.len()
            )));
        }
        if offsets[0] != 0 {
            return Err(CmeshError::InvalidPartition(format!(
                "first offset is {}, must be 0",
                offsets[0]
            )));
        }
        if let Some((r, _)) = offsets.iter().tuple_windows().find_position(|(a, b)| a > b) {
            return Err(CmeshError::InvalidPartition(format!(
                "offsets decrease at rank {r}: {} > {}",
                offsets[r],
                offsets[r + 1]
            )));
        }
        Ok(Self { offsets })
    }

    /// Contiguous split with near-equal cumulative weight per process.
    ///
    /// Tree `g` goes to the process whose share `[r W/P, (r+1) W/P)` contains
    /// the midpoint of `g`'s weight interval. All-zero weights fall back to
    /// [`uniform`](Self::uniform).
    pub fn weighted(weights: &[f64], num_procs: usize) -> Result<Self, CmeshError> {
        if num_procs == 0 {
            return Err(CmeshError::InvalidPartition("zero processes".into()));
        }
        if let Some((g, w)) = weights.iter().find_position(|w| !w.is_finite() || **w < 0.0) {
            return Err(CmeshError::InvalidPartition(format!("weight {w} of tree {g}")));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Self::uniform(weights.len() as GlobalIdx, num_procs);
        }
        let p = num_procs as f64;
        let mut offsets = Vec::with_capacity(num_procs + 1);
        offsets.push(0);
        let mut prefix = 0.0;
        let mut next_rank = 1;
        for (g, w) in weights.iter().enumerate() {
            let mid = prefix + w / 2.0;
            let owner = ((mid * p / total).floor() as usize).min(num_procs - 1);
            while next_rank <= owner {
                offsets.push(g as GlobalIdx);
                next_rank += 1;
            }
            prefix += w;
        }
        offsets.resize(num_procs + 1, weights.len() as GlobalIdx);
        Self::from_offsets(offsets)
    }

    #[inline]
    pub fn num_procs(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    pub fn num_trees(&self) -> GlobalIdx {
        self.offsets[self.offsets.len() - 1]
    }

    #[inline]
    pub fn offsets(&self) -> &[GlobalIdx] {
        &self.offsets
    }

    /// Global indices owned by `rank`; empty for ranks outside the table.
    #[inline]
    pub fn range(&self, rank: usize) -> Range<GlobalIdx> {
        match (self.offsets.get(rank), self.offsets.get(rank + 1)) {
            (Some(&a), Some(&b)) => a..b,
            _ => 0..0,
        }
    }

    /// Rank owning global tree `g`, if `g < num_trees()`.
    pub fn owner_of(&self, g: GlobalIdx) -> Option<usize> {
        if g >= self.num_trees() {
            return None;
        }
        // last offset <= g, skipping empty ranges
        Some(self.offsets.partition_point(|&o| o <= g) - 1)
    }
}

/// How a committed mesh's trees are spread over the processes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Layout {
    /// Every process holds all trees.
    Replicated,
    /// Each process holds the range the table assigns to its rank.
    Partitioned(PartitionTable),
}

impl Layout {
    /// Global range held by `rank` in a mesh of `num_trees` trees.
    pub fn range(&self, rank: usize, num_trees: GlobalIdx) -> Range<GlobalIdx> {
        match self {
            Layout::Replicated => 0..num_trees,
            Layout::Partitioned(table) => table.range(rank),
        }
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self, Layout::Replicated)
    }
}
