//! Send/receive schedule for moving trees from an old to a new layout.
//!
//! Both layouts are known on every process, so each rank derives its own
//! schedule locally in O(P): it sends the part of its old range that lies in
//! each peer's new range and receives the part of its new range that lies in
//! each peer's old range. No negotiation is needed.

use crate::partitioning::table::{Layout, PartitionTable};
use crate::topology::tree::GlobalIdx;
use std::ops::Range;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferSchedule {
    /// `(peer, global range)` this rank sends, ascending by peer.
    pub sends: Vec<(usize, Range<GlobalIdx>)>,
    /// `(peer, global range)` this rank receives, ascending by peer.
    pub recvs: Vec<(usize, Range<GlobalIdx>)>,
}

fn intersect(a: &Range<GlobalIdx>, b: &Range<GlobalIdx>) -> Option<Range<GlobalIdx>> {
    let r = a.start.max(b.start)..a.end.min(b.end);
    (!r.is_empty()).then_some(r)
}

impl TransferSchedule {
    /// Schedule for `rank` when going from `source` to `target`.
    ///
    /// A replicated source already holds every tree on every rank, so each
    /// rank only copies its new range from itself.
    pub fn compute(source: &Layout, target: &PartitionTable, rank: usize) -> Self {
        let mine = target.range(rank);
        match source {
            Layout::Replicated => {
                let both = if mine.is_empty() {
                    Vec::new()
                } else {
                    vec![(rank, mine)]
                };
                Self {
                    sends: both.clone(),
                    recvs: both,
                }
            }
            Layout::Partitioned(old) => {
                let held = old.range(rank);
                let sends = (0..target.num_procs())
                    .filter_map(|q| intersect(&held, &target.range(q)).map(|r| (q, r)))
                    .collect();
                let recvs = (0..old.num_procs())
                    .filter_map(|q| intersect(&mine, &old.range(q)).map(|r| (q, r)))
                    .collect();
                Self { sends, recvs }
            }
        }
    }

    /// True if every transfer is from this rank to itself.
    pub fn is_local_only(&self, rank: usize) -> bool {
        self.sends.iter().chain(&self.recvs).all(|(q, _)| *q == rank)
    }

    /// Trees leaving this rank for other ranks.
    pub fn trees_out(&self, rank: usize) -> u64 {
        self.sends
            .iter()
            .filter(|(q, _)| *q != rank)
            .map(|(_, r)| r.end - r.start)
            .sum()
    }

    /// Trees arriving from other ranks.
    pub fn trees_in(&self, rank: usize) -> u64 {
        self.recvs
            .iter()
            .filter(|(q, _)| *q != rank)
            .map(|(_, r)| r.end - r.start)
            .sum()
    }

    /// Peers (other than `rank`) this rank receives from.
    pub fn recv_peers(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.recvs.iter().map(|(q, _)| *q).filter(move |q| *q != rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replicated_source_is_local() {
        let target = PartitionTable::uniform(5, 2).unwrap();
        let s = TransferSchedule::compute(&Layout::Replicated, &target, 1);
        assert_eq!(s.recvs, vec![(1, 3..5)]);
        assert!(s.is_local_only(1));
    }

    #[test]
    fn shift_between_partitions() {
        let old = Layout::Partitioned(PartitionTable::from_offsets(vec![0, 4, 6]).unwrap());
        let new = PartitionTable::uniform(6, 2).unwrap(); // [0,3,6]
        let s0 = TransferSchedule::compute(&old, &new, 0);
        assert_eq!(s0.sends, vec![(0, 0..3), (1, 3..4)]);
        assert_eq!(s0.recvs, vec![(0, 0..3)]);
        let s1 = TransferSchedule::compute(&old, &new, 1);
        assert_eq!(s1.sends, vec![(1, 4..6)]);
        assert_eq!(s1.recvs, vec![(0, 3..4), (1, 4..6)]);
        assert_eq!(s0.trees_out(0), 1);
        assert_eq!(s1.trees_in(1), 1);
        assert_eq!(s1.recv_peers(1).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn same_layout_is_idempotent() {
        let t = PartitionTable::uniform(7, 3).unwrap();
        let old = Layout::Partitioned(t.clone());
        for r in 0..3 {
            let s = TransferSchedule::compute(&old, &t, r);
            assert!(s.is_local_only(r));
            assert_eq!(s.trees_out(r), 0);
        }
    }
}
