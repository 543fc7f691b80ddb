//! Collectives built from [`exchange_bytes`]: broadcast and all-gather.
//!
//! Every rank of the communicator must call the same collectives in the
//! same order, since each one reserves its own tag block.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{EXCHANGE_TAGS, exchange_bytes};
use crate::algs::wire::{WireLen, WireReader, WireWriter, kind};
use crate::mesh_error::CmeshError;

/// Send `payload` from `root` to every rank; returns it on all ranks.
///
/// Only the root's `payload` is used; other ranks may pass `None`.
pub fn broadcast_bytes<C: Communicator>(
    comm: &C,
    root: usize,
    payload: Option<Vec<u8>>,
) -> Result<Vec<u8>, CmeshError> {
    let size = comm.size();
    if root >= size {
        return Err(CmeshError::InvalidRoot { root, size });
    }
    if comm.is_no_comm() {
        return Ok(payload.unwrap_or_default());
    }
    let tags = comm.reserve_tag_range(EXCHANGE_TAGS)?;
    let me = comm.rank();
    if me == root {
        let payload = payload.unwrap_or_default();
        let sends: Vec<_> = (0..size)
            .filter(|&r| r != root)
            .map(|r| (r, payload.clone()))
            .collect();
        exchange_bytes(comm, tags, &sends, &[])?;
        log::debug!("[rank {me}] broadcast {} bytes to {} ranks", payload.len(), size - 1);
        Ok(payload)
    } else {
        let mut got = exchange_bytes(comm, tags, &[], &[root])?;
        got.remove(&root)
            .ok_or_else(|| CmeshError::comm(root, "broadcast payload missing"))
    }
}

/// Every rank contributes `mine`; returns all contributions indexed by rank.
pub fn all_gather_bytes<C: Communicator>(comm: &C, mine: Vec<u8>) -> Result<Vec<Vec<u8>>, CmeshError> {
    if comm.is_no_comm() {
        return Ok(vec![mine]);
    }
    let size = comm.size();
    let tags = comm.reserve_tag_range(EXCHANGE_TAGS)?;
    let sends: Vec<_> = (0..size).map(|r| (r, mine.clone())).collect();
    let peers: Vec<usize> = (0..size).collect();
    let mut got = exchange_bytes(comm, tags, &sends, &peers)?;
    (0..size)
        .map(|r| {
            got.remove(&r)
                .ok_or_else(|| CmeshError::comm(r, "all-gather contribution missing"))
        })
        .collect()
}

/// All-gather of one `u64` per rank.
pub fn all_gather_u64<C: Communicator>(comm: &C, value: u64) -> Result<Vec<u64>, CmeshError> {
    let mut w = WireWriter::with_header(kind::COUNT);
    w.put(&WireLen::new(value));
    let all = all_gather_bytes(comm, w.into_bytes())?;
    all.iter()
        .map(|bytes| {
            let mut r = WireReader::open(bytes, kind::COUNT)?;
            let v: WireLen = r.get()?;
            r.finish()?;
            Ok(v.get())
        })
        .collect()
}

/// Combine the local outcome of a collective step with every other rank's.
///
/// Returns the local error if this rank failed. Otherwise, if some other
/// rank failed, returns a `CommError` naming the lowest such rank, so either
/// all ranks succeed or all of them fail.
pub fn agree_on_outcome<C: Communicator>(
    comm: &C,
    local: Result<(), CmeshError>,
) -> Result<(), CmeshError> {
    let status = u64::from(local.is_err());
    let all = match all_gather_u64(comm, status) {
        Ok(all) => all,
        Err(e) => return local.and(Err(e)),
    };
    local?;
    match all.iter().position(|&s| s != 0) {
        Some(r) => Err(CmeshError::comm(r, format!("rank {r} failed to commit"))),
        None => Ok(()),
    }
}
