//! Commit of a derived mesh: compute the target layout, move tree blocks
//! between processes and assemble the local table.

use super::commit::check_vertex_count;
use super::record::{TreeRecord, pack_trees, unpack_trees};
use super::{Cmesh, Derivation, TransferStats};
use crate::algs::collective::{agree_on_outcome, all_gather_bytes};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{EXCHANGE_TAGS, exchange_bytes};
use crate::algs::wire::{WireLen, WireReader, WireWriter, kind};
use crate::data::attributes::AttributeId;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::GeometryId;
use crate::mesh_error::CmeshError;
use crate::partitioning::{Layout, PartitionDirective, PartitionTable, TransferSchedule};
use crate::topology::eclass::TreeClass;
use crate::topology::tree::{GlobalIdx, LocalIdx, Tree};
use std::ops::Range;

fn to_local(range: &Range<GlobalIdx>, first_tree: GlobalIdx) -> Range<LocalIdx> {
    (range.start - first_tree) as LocalIdx..(range.end - first_tree) as LocalIdx
}

impl Cmesh {
    pub(super) fn commit_derived<C: Communicator>(
        &mut self,
        derivation: &Derivation,
        comm: &C,
    ) -> Result<(), CmeshError> {
        let source = &*derivation.source;
        if !source.is_committed() {
            return Err(CmeshError::SourceNotCommitted);
        }
        let (me, size) = (comm.rank(), comm.size());
        let num_trees = source.num_trees;
        if let Layout::Partitioned(old) = &source.layout {
            if old.num_procs() != size {
                return Err(CmeshError::CommSizeMismatch {
                    expected: old.num_procs(),
                    actual: size,
                });
            }
        }
        let geometry_map = self.geometries.adopt(&source.geometries)?;

        let target = match &derivation.directive {
            None => match &source.layout {
                Layout::Replicated => {
                    return self.copy_replicated(source, &geometry_map);
                }
                Layout::Partitioned(old) => old.clone(),
            },
            Some(PartitionDirective::Uniform { .. }) => PartitionTable::uniform(num_trees, size)?,
            Some(PartitionDirective::Offsets(table)) => {
                if table.num_procs() != size {
                    return Err(CmeshError::CommSizeMismatch {
                        expected: table.num_procs(),
                        actual: size,
                    });
                }
                if table.num_trees() != num_trees {
                    return Err(CmeshError::InvalidPartition(format!(
                        "offsets end at {}, mesh has {num_trees} trees",
                        table.num_trees()
                    )));
                }
                table.clone()
            }
            Some(PartitionDirective::Weighted(weights)) => {
                let all = gather_weights(comm, source, weights)?;
                PartitionTable::weighted(&all, size)?
            }
        };
        log::debug!(
            "[rank {me}] partition ({}): {num_trees} trees, offsets {:?}",
            derivation.directive.as_ref().map_or("keep", |d| d.label()),
            target.offsets()
        );

        check_scheme(comm, source, derivation.directive.as_ref())?;

        let schedule = TransferSchedule::compute(&source.layout, &target, me);
        log::debug!(
            "[rank {me}] schedule: send {:?} ({} trees away), receive {:?} ({} trees in)",
            schedule.sends,
            schedule.trees_out(me),
            schedule.recvs,
            schedule.trees_in(me)
        );
        let tags = comm.reserve_tag_range(EXCHANGE_TAGS)?;
        let local = self.transfer(comm, tags, source, &schedule, target, &geometry_map);
        agree_on_outcome(comm, local)
    }

    /// Move the blocks of `schedule` and install the local table. Every
    /// scheduled send is posted even when packing fails, so peers never wait
    /// on a message that will not come.
    fn transfer<C: Communicator>(
        &mut self,
        comm: &C,
        tags: CommTag,
        source: &Cmesh,
        schedule: &TransferSchedule,
        target: PartitionTable,
        geometry_map: &[GeometryId],
    ) -> Result<(), CmeshError> {
        let me = comm.rank();
        let num_trees = source.num_trees;
        let mine = target.range(me);
        let src_first = source.first_tree;

        let mut stats = TransferStats::default();
        let mut sends = Vec::new();
        let mut pack_error = None;
        for (peer, range) in schedule.sends.iter().filter(|(q, _)| *q != me) {
            let bytes = match pack_trees(&source.trees, to_local(range, src_first), src_first) {
                Ok(bytes) => bytes,
                Err(e) => {
                    pack_error.get_or_insert(e);
                    Vec::new()
                }
            };
            stats.trees_sent += range.end - range.start;
            stats.bytes_sent += bytes.len() as u64;
            stats.messages_sent += 1;
            sends.push((*peer, bytes));
        }
        let recv_from: Vec<usize> = schedule.recv_peers(me).collect();
        let received = exchange_bytes(comm, tags, &sends, &recv_from)?;
        if let Some(e) = pack_error {
            return Err(e);
        }

        let mut records: Vec<TreeRecord> = Vec::with_capacity((mine.end - mine.start) as usize);
        for (_, range) in schedule.recvs.iter().filter(|(q, _)| *q == me) {
            let local = to_local(range, src_first);
            records.extend(
                source.trees[local.clone()]
                    .iter()
                    .zip(local)
                    .map(|(t, l)| TreeRecord::from_tree(t, src_first + l as GlobalIdx, src_first)),
            );
            stats.trees_copied_locally += range.end - range.start;
        }
        for (peer, bytes) in &received {
            let recs = unpack_trees(bytes)?;
            let expected = schedule
                .recvs
                .iter()
                .find(|(q, _)| q == peer)
                .map(|(_, r)| r.clone())
                .unwrap_or(0..0);
            if let Some(bad) = recs.iter().find(|r| !expected.contains(&r.global)) {
                return Err(CmeshError::malformed(format!(
                    "rank {peer} sent tree {}, expected {expected:?}",
                    bad.global
                )));
            }
            stats.trees_received += recs.len() as u64;
            stats.bytes_received += bytes.len() as u64;
            stats.messages_received += 1;
            records.extend(recs);
        }

        let trees = assemble(records, &mine, geometry_map, num_trees)?;
        for (l, t) in trees.iter().enumerate() {
            let vertices = t.attributes.get(AttributeId::VERTICES);
            check_vertex_count(mine.start + l as GlobalIdx, t.class, vertices)?;
        }

        self.trees = trees;
        self.first_tree = mine.start;
        self.num_trees = num_trees;
        self.layout = Layout::Partitioned(target);
        self.stats = stats;
        log::debug!("[rank {me}] transfer: {stats:?}");
        self.validate_invariants()
    }

    /// Derive without directive from a replicated source: every process
    /// copies the whole mesh.
    fn copy_replicated(
        &mut self,
        source: &Cmesh,
        geometry_map: &[GeometryId],
    ) -> Result<(), CmeshError> {
        let n = source.trees.len();
        let mut trees = Vec::with_capacity(n);
        for t in &source.trees {
            let geometry = *geometry_map
                .get(t.geometry.index())
                .ok_or(CmeshError::UnknownGeometry(t.geometry.index()))?;
            trees.push(Tree {
                geometry,
                ..t.clone()
            });
        }
        self.trees = trees;
        self.first_tree = 0;
        self.num_trees = source.num_trees;
        self.layout = Layout::Replicated;
        self.stats = TransferStats {
            trees_copied_locally: n as u64,
            ..TransferStats::default()
        };
        self.validate_invariants()
    }
}

/// Weights of all trees in global order.
///
/// Reject a directive whose scheme cannot refine some tree, before any block
/// moves.
///
/// A replicated source holds every tree, so the check is local. A
/// partitioned source checks its own range and the ranks agree on the lowest
/// rejected global index, so every rank reports the same tree.
fn check_scheme<C: Communicator>(
    comm: &C,
    source: &Cmesh,
    directive: Option<&PartitionDirective>,
) -> Result<(), CmeshError> {
    let Some(scheme) = directive.and_then(|d| d.scheme()) else {
        return Ok(());
    };
    let first_bad = source
        .trees
        .iter()
        .enumerate()
        .find(|(_, t)| !scheme.supports(t.class))
        .map(|(l, t)| (source.first_tree + l as GlobalIdx, t.class));
    let rejected = match source.layout {
        Layout::Replicated => first_bad,
        Layout::Partitioned(_) => {
            let (global, code) = first_bad.map_or((u64::MAX, 0), |(g, c)| (g, c.to_code()));
            let mut w = WireWriter::with_header(kind::UNSUPPORTED);
            w.put(&WireLen::new(global));
            w.put_bytes(&[code]);
            let mut lowest: Option<(GlobalIdx, TreeClass)> = None;
            for (rank, bytes) in all_gather_bytes(comm, w.into_bytes())?.iter().enumerate() {
                let mut r = WireReader::open(bytes, kind::UNSUPPORTED)?;
                let global = r.get::<WireLen>()?.get();
                let code = r.take(1)?[0];
                r.finish()?;
                if global == u64::MAX || lowest.is_some_and(|(g, _)| g <= global) {
                    continue;
                }
                let class = TreeClass::from_code(code).ok_or_else(|| {
                    CmeshError::malformed(format!("rank {rank} sent class code {code}"))
                })?;
                lowest = Some((global, class));
            }
            lowest
        }
    };
    match rejected {
        Some((tree, class)) => Err(CmeshError::UnsupportedClass {
            tree,
            class,
            scheme: scheme.name().to_string(),
        }),
        None => Ok(()),
    }
}

/// A replicated source holds every tree on every rank, so the local weights
/// already cover the whole mesh; a partitioned source gathers each rank's
/// share.
fn gather_weights<C: Communicator>(
    comm: &C,
    source: &Cmesh,
    weights: &[f64],
) -> Result<Vec<f64>, CmeshError> {
    let table = match &source.layout {
        Layout::Replicated => {
            if weights.len() as GlobalIdx != source.num_trees {
                return Err(CmeshError::InvalidPartition(format!(
                    "{} weights for {} trees",
                    weights.len(),
                    source.num_trees
                )));
            }
            return Ok(weights.to_vec());
        }
        Layout::Partitioned(table) => table,
    };
    let mine: Vec<u8> = weights
        .iter()
        .flat_map(|w| w.to_bits().to_le_bytes())
        .collect();
    let all = all_gather_bytes(comm, mine)?;
    let mut out = Vec::with_capacity(source.num_trees as usize);
    for (rank, bytes) in all.iter().enumerate() {
        let held = table.range(rank);
        let expected = (held.end - held.start) as usize;
        if bytes.len() != expected * 8 {
            return Err(CmeshError::InvalidPartition(format!(
                "rank {rank} gave {} weights for {expected} trees",
                bytes.len() / 8
            )));
        }
        out.extend(bytes.chunks_exact(8).map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_bits(u64::from_le_bytes(b))
        }));
    }
    Ok(out)
}

/// Place records by global index into `mine`; every slot must be filled
/// exactly once.
fn assemble(
    records: Vec<TreeRecord>,
    mine: &Range<GlobalIdx>,
    geometry_map: &[GeometryId],
    num_trees: GlobalIdx,
) -> Result<Vec<Tree>, CmeshError> {
    let n = (mine.end - mine.start) as usize;
    let mut slots: Vec<Option<Tree>> = vec![None; n];
    for rec in records {
        if !mine.contains(&rec.global) {
            return Err(CmeshError::malformed(format!(
                "tree {} outside local range {mine:?}",
                rec.global
            )));
        }
        let l = (rec.global - mine.start) as usize;
        if slots[l].is_some() {
            return Err(CmeshError::malformed(format!("tree {} received twice", rec.global)));
        }
        slots[l] = Some(rec.into_tree(geometry_map, mine.start, n, num_trees)?);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(l, t)| {
            t.ok_or_else(|| {
                CmeshError::malformed(format!("tree {} never arrived", mine.start + l as GlobalIdx))
            })
        })
        .collect()
}
