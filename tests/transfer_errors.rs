mod util;

use coarse_mesh::algs::communicator::{CommTag, Communicator, RayonComm, Wait};
use coarse_mesh::prelude::*;
use std::sync::Arc;
use util::*;

/// Delivers sends normally; when `lose` is set, every incoming message is
/// lost.
struct LossyComm<'a> {
    inner: &'a RayonComm,
    lose: bool,
}

enum Recv {
    Delivered(<RayonComm as Communicator>::RecvHandle),
    Lost,
}

impl Wait for Recv {
    fn wait(self) -> Option<Vec<u8>> {
        match self {
            Recv::Delivered(h) => h.wait(),
            Recv::Lost => None,
        }
    }
}

impl Communicator for LossyComm<'_> {
    type SendHandle = <RayonComm as Communicator>::SendHandle;
    type RecvHandle = Recv;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.inner.isend(peer, tag, buf)
    }
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Recv {
        if self.lose {
            Recv::Lost
        } else {
            Recv::Delivered(self.inner.irecv(peer, tag, buf))
        }
    }
    fn rank(&self) -> usize {
        self.inner.rank()
    }
    fn size(&self) -> usize {
        self.inner.size()
    }
    fn reserve_tag_range(&self, n: u16) -> Result<CommTag, CmeshError> {
        self.inner.reserve_tag_range(n)
    }
}

#[test]
fn lost_message_fails_every_rank() {
    run_ranks(2, |comm| {
        let part = Arc::new(partitioned_row(4, comm)); // [0, 2, 4]
        let mut shifted = Cmesh::derive(part).unwrap();
        shifted.set_partition_offsets(vec![0, 1, 4]).unwrap();
        // rank 0 only sends, rank 1 loses the block it waits for
        let lossy = LossyComm {
            inner: comm,
            lose: comm.rank() == 1,
        };
        let err = shifted.commit(&lossy).unwrap_err();
        let peer = 1 - comm.rank();
        assert!(
            matches!(err, CmeshError::CommError { neighbor, .. } if neighbor == peer),
            "{err}"
        );
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(shifted.failure(), Some(&err));
        assert!(matches!(
            shifted.num_local_trees(),
            Err(CmeshError::MeshFailed(_))
        ));
    });
}

#[test]
fn transfer_over_reliable_links_commits() {
    run_ranks(2, |comm| {
        let part = Arc::new(partitioned_row(4, comm));
        let mut shifted = Cmesh::derive(part).unwrap();
        shifted.set_partition_offsets(vec![0, 1, 4]).unwrap();
        let lossy = LossyComm {
            inner: comm,
            lose: false,
        };
        shifted.commit(&lossy).unwrap();
        assert_row_content(&shifted, 4);
    });
}
