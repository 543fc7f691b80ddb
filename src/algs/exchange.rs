//! Sparse two-phase point-to-point exchange of byte payloads.
//!
//! Phase one sends each destination a [`WireLen`] with the payload size;
//! phase two moves the payloads themselves into buffers of exactly that
//! size. Both sides must derive the same schedule locally: a rank lists every
//! peer it sends to and every peer it expects data from.
//!
//! Every posted handle is drained before returning, even on error; the first
//! error observed is reported.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::WireLen;
use crate::mesh_error::CmeshError;
use std::collections::BTreeMap;
use std::mem::size_of;

/// Tags consumed by one [`exchange_bytes`] call.
pub const EXCHANGE_TAGS: u16 = 2;

/// Send `sends[i].1` to rank `sends[i].0` and receive one payload from each
/// rank in `recv_from`.
///
/// `tags` must be a block of [`EXCHANGE_TAGS`] tags reserved identically on
/// all participating ranks. A payload addressed to the calling rank itself is
/// returned directly without touching the communicator.
pub fn exchange_bytes<C: Communicator>(
    comm: &C,
    tags: CommTag,
    sends: &[(usize, Vec<u8>)],
    recv_from: &[usize],
) -> Result<BTreeMap<usize, Vec<u8>>, CmeshError> {
    let me = comm.rank();
    let size = comm.size();
    if let Some(&(peer, _)) = sends.iter().find(|(p, _)| *p >= size) {
        return Err(CmeshError::comm(peer, format!("rank {peer} outside communicator of size {size}")));
    }
    if let Some(&peer) = recv_from.iter().find(|&&p| p >= size) {
        return Err(CmeshError::comm(peer, format!("rank {peer} outside communicator of size {size}")));
    }
    debug_assert!(
        sends.iter().enumerate().all(|(i, (p, _))| sends[..i].iter().all(|(q, _)| q != p)),
        "duplicate destination in exchange schedule"
    );

    let mut out = BTreeMap::new();
    if recv_from.contains(&me) {
        let own = sends
            .iter()
            .find(|(p, _)| *p == me)
            .map(|(_, b)| b.clone())
            .unwrap_or_default();
        out.insert(me, own);
    }
    let remote_sends: Vec<&(usize, Vec<u8>)> = sends.iter().filter(|(p, _)| *p != me).collect();
    let remote_recvs: Vec<usize> = recv_from.iter().copied().filter(|&p| p != me).collect();
    if remote_sends.is_empty() && remote_recvs.is_empty() {
        return Ok(out);
    }

    // ---- phase 1: sizes ----
    let size_tag = tags.as_u16();
    let mut len_bufs = vec![[0u8; size_of::<WireLen>()]; remote_recvs.len()];
    let recv_handles: Vec<_> = remote_recvs
        .iter()
        .zip(len_bufs.iter_mut())
        .map(|(&peer, buf)| comm.irecv(peer, size_tag, buf))
        .collect();
    let send_handles: Vec<_> = remote_sends
        .iter()
        .map(|(peer, payload)| {
            let len = WireLen::new(payload.len() as u64);
            comm.isend(*peer, size_tag, bytemuck::bytes_of(&len))
        })
        .collect();

    let mut expected = Vec::with_capacity(remote_recvs.len());
    let mut maybe_err = None;
    for (&peer, h) in remote_recvs.iter().zip(recv_handles) {
        match h.wait() {
            Some(data) if data.len() == size_of::<WireLen>() => {
                let len: WireLen = bytemuck::pod_read_unaligned(&data);
                match usize::try_from(len.get()) {
                    Ok(n) => expected.push((peer, n)),
                    Err(_) if maybe_err.is_none() => {
                        maybe_err = Some(CmeshError::comm(peer, format!("announced {} bytes", len.get())));
                    }
                    Err(_) => {}
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(CmeshError::comm(
                    peer,
                    format!(
                        "expected {} bytes for size header, got {}",
                        size_of::<WireLen>(),
                        data.len()
                    ),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(CmeshError::comm(peer, format!("failed to receive size from rank {peer}")));
            }
            _ => {}
        }
    }
    for h in send_handles {
        let _ = h.wait();
    }
    // Phase 2 runs even after a size failure, for every peer whose size arrived.

    // ---- phase 2: payloads ----
    let data_tag = tags.offset(1).as_u16();
    let mut payload_bufs: Vec<Vec<u8>> = expected.iter().map(|&(_, n)| vec![0u8; n]).collect();
    let recv_handles: Vec<_> = expected
        .iter()
        .zip(payload_bufs.iter_mut())
        .filter(|((_, n), _)| *n > 0)
        .map(|(&(peer, n), buf)| (peer, n, comm.irecv(peer, data_tag, buf)))
        .collect();
    let send_handles: Vec<_> = remote_sends
        .iter()
        .filter(|(_, payload)| !payload.is_empty())
        .map(|(peer, payload)| {
            log::trace!("[rank {me}] exchange: {} bytes to {peer}", payload.len());
            comm.isend(*peer, data_tag, payload)
        })
        .collect();

    for &(peer, n) in &expected {
        if n == 0 {
            out.insert(peer, Vec::new());
        }
    }
    for (peer, n, h) in recv_handles {
        match h.wait() {
            Some(data) if data.len() == n => {
                out.insert(peer, data);
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(CmeshError::comm(
                    peer,
                    format!("expected {n} payload bytes, got {}", data.len()),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(CmeshError::comm(peer, format!("failed to receive payload from rank {peer}")));
            }
            _ => {}
        }
    }
    for h in send_handles {
        let _ = h.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}
